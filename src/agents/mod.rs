//! 外部协作者：OCR / Solver / Tutor
//!
//! 有 OPENAI_API_KEY 时走 OpenAI 兼容端点，否则使用确定性启发式实现；
//! Mock 实现供测试脚本化调用计数。

pub mod mock;
pub mod ocr;
pub mod solver;
pub mod traits;
pub mod tutor;

use std::sync::Arc;

pub use ocr::TextOcr;
pub use solver::{HeuristicSolver, OpenAiSolver};
pub use traits::{HintContext, OcrAgent, SolverAgent, TutorAgent};
pub use tutor::{HeuristicTutor, OpenAiTutor};

use crate::config::AppConfig;

/// 根据环境选择协作者实现（无 Key 时退回启发式，流程仍可跑通）
pub fn create_agents_from_config(
    cfg: &AppConfig,
) -> (Arc<dyn OcrAgent>, Arc<dyn SolverAgent>, Arc<dyn TutorAgent>) {
    let ocr: Arc<dyn OcrAgent> = Arc::new(TextOcr);
    if std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!(
            solver = %cfg.models.solver_model,
            tutor = %cfg.models.tutor_model,
            "Using OpenAI-backed agents"
        );
        (
            ocr,
            Arc::new(OpenAiSolver::new(&cfg.models.solver_model, "high", None)),
            Arc::new(OpenAiTutor::new(&cfg.models.tutor_model, None)),
        )
    } else {
        tracing::warn!("No OPENAI_API_KEY set, using heuristic agents");
        (ocr, Arc::new(HeuristicSolver), Arc::new(HeuristicTutor))
    }
}

/// 从模型输出中提取首个 JSON 对象；模型常把 JSON 包在说明文字里
pub(crate) fn extract_json_object(text: &str) -> serde_json::Value {
    let raw = text.trim();
    if raw.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if value.is_object() {
            return value;
        }
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw[start..=end]) {
                if value.is_object() {
                    return value;
                }
            }
        }
    }
    serde_json::Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_plain() {
        let value = extract_json_object(r#"{"status": "ok"}"#);
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn test_extract_json_object_embedded() {
        let value = extract_json_object("Here you go:\n{\"confidence\": 0.7}\nDone.");
        assert_eq!(value["confidence"], 0.7);
    }

    #[test]
    fn test_extract_json_object_garbage() {
        assert!(extract_json_object("no json here").is_null());
        assert!(extract_json_object("").is_null());
    }
}
