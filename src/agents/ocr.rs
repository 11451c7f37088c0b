//! OCR 协作者：手动文本优先的归一
//!
//! 取材顺序：problem_text > ocr_text > latex_text > 图片。内置实现只处理
//! 文本；仅有图片时降级并留 note，视觉转写属于外部协作者。

use async_trait::async_trait;

use super::traits::OcrAgent;
use crate::schemas::{IngestEventRequest, OcrPrepResult, Usage};

/// 文本优先 OCR 归一
#[derive(Debug, Default)]
pub struct TextOcr;

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
impl OcrAgent for TextOcr {
    async fn prepare(&self, request: &IngestEventRequest) -> OcrPrepResult {
        let mut notes: Vec<String> = Vec::new();

        let mut normalized_problem = trimmed(&request.problem_text).unwrap_or("").to_string();
        let mut normalized_working = trimmed(&request.user_message).unwrap_or("").to_string();
        let mut source = "manual_problem_text";

        if normalized_problem.is_empty() {
            if let Some(ocr_text) = trimmed(&request.ocr_text) {
                normalized_problem = ocr_text.to_string();
                source = "provided_ocr_text";
            }
        }
        if normalized_problem.is_empty() {
            if let Some(latex_text) = trimmed(&request.latex_text) {
                normalized_problem = latex_text.to_string();
                source = "provided_latex_text";
            }
        }
        if normalized_problem.is_empty() && request.image_base64.is_some() {
            notes.push("vlm_unavailable".to_string());
        }

        if normalized_working.is_empty() {
            if matches!(source, "provided_ocr_text" | "provided_latex_text") {
                normalized_working = normalized_problem.clone();
                notes.push("working_text_derived_from_problem".to_string());
            } else {
                normalized_working = "(no explicit student working provided)".to_string();
            }
        }

        if normalized_problem.is_empty() {
            normalized_problem =
                "(problem text unavailable; ask student to provide statement)".to_string();
            source = "missing_problem";
        }

        OcrPrepResult {
            normalized_problem,
            normalized_working,
            source: source.to_string(),
            usage: Usage::default(),
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IngestEventRequest {
        IngestEventRequest::default()
    }

    #[tokio::test]
    async fn test_manual_problem_text_wins() {
        let mut req = request();
        req.problem_text = Some("Find v.".to_string());
        req.ocr_text = Some("garbled".to_string());
        req.user_message = Some("my attempt".to_string());
        let prep = TextOcr.prepare(&req).await;
        assert_eq!(prep.normalized_problem, "Find v.");
        assert_eq!(prep.normalized_working, "my attempt");
        assert_eq!(prep.source, "manual_problem_text");
    }

    #[tokio::test]
    async fn test_ocr_text_fallback_derives_working() {
        let mut req = request();
        req.ocr_text = Some("  2x + 1 = 5  ".to_string());
        let prep = TextOcr.prepare(&req).await;
        assert_eq!(prep.normalized_problem, "2x + 1 = 5");
        assert_eq!(prep.normalized_working, "2x + 1 = 5");
        assert_eq!(prep.source, "provided_ocr_text");
        assert!(prep
            .notes
            .contains(&"working_text_derived_from_problem".to_string()));
    }

    #[tokio::test]
    async fn test_image_only_upload_degrades_with_note() {
        let mut req = request();
        req.image_base64 = Some("dGVzdA==".to_string());
        let prep = TextOcr.prepare(&req).await;
        assert_eq!(prep.source, "missing_problem");
        assert!(prep.notes.contains(&"vlm_unavailable".to_string()));
        assert!(prep.normalized_problem.contains("problem text unavailable"));
    }

    #[tokio::test]
    async fn test_empty_request_yields_placeholders() {
        let prep = TextOcr.prepare(&request()).await;
        assert_eq!(prep.source, "missing_problem");
        assert_eq!(
            prep.normalized_working,
            "(no explicit student working provided)"
        );
    }
}
