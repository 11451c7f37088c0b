//! Solver 协作者：错误定位与符号断言
//!
//! OpenAI 实现要求模型只回严格 JSON；任何请求 / 解析失败都降级为启发式
//! 结果并在 raw 里留下失败原因，status 置为 uncertain。

use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::json;

use super::extract_json_object;
use super::traits::SolverAgent;
use crate::schemas::{SolverClaim, SolverResult, Usage};

const SOLVER_SYSTEM_PROMPT: &str = "You are Solver Agent for olympiad physics/mathematics diagnostics.\n\
Given problem statement and student work, return JSON only with keys:\n\
{\"status\": \"ok|uncertain\", \"explanation\": str, \"error_found\": bool, \
\"error_type\": str|null, \"error_step\": int|null, \"confidence\": float(0..1), \
\"symbolic_claims\": [\
{\"claim_type\":\"equality\",\"lhs\":\"...\",\"rhs\":\"...\"}, \
{\"claim_type\":\"derivative\",\"expr\":\"...\",\"var\":\"x\",\"equals\":\"...\"}, \
{\"claim_type\":\"integral\",\"expr\":\"...\",\"var\":\"x\",\"equals\":\"...\"}\
]}.\n\
Keep symbolic claims only for statements you are reasonably sure are present.";

/// 确定性启发式 Solver：按关键词粗定位错误类别
#[derive(Debug, Default)]
pub struct HeuristicSolver;

pub(crate) fn heuristic_solve(problem_text: &str, working_text: &str, model: &str) -> SolverResult {
    let text = format!("{problem_text}\n{working_text}").to_lowercase();
    let (error_type, error_step, explanation) = if text.contains("cos")
        && text.contains("sin")
        && text.contains("projection")
    {
        (
            Some("trigonometry_projection"),
            Some(3),
            "Likely projection mismatch: check whether sine/cosine was selected for the chosen axis in step 3.",
        )
    } else if text.contains("integral") && (text.contains("dx") || text.contains('∫')) {
        (
            Some("integration_constant"),
            Some(2),
            "Check antiderivative and constant of integration.",
        )
    } else if text.contains("newton") || text.contains("force") {
        (
            Some("sign_convention"),
            Some(2),
            "Verify sign convention and axis orientation before summing forces.",
        )
    } else {
        (
            None,
            None,
            "Need more formal steps from student to localize the exact error.",
        )
    };

    SolverResult {
        status: "ok".to_string(),
        model: model.to_string(),
        explanation: explanation.to_string(),
        error_found: error_type.is_some(),
        error_type: error_type.map(String::from),
        error_step,
        confidence: if error_type.is_some() { 0.52 } else { 0.40 },
        symbolic_claims: Vec::new(),
        usage: Usage::default(),
        latency_ms: 5,
        raw: json!({"mode": "heuristic_fallback"}),
    }
}

#[async_trait]
impl SolverAgent for HeuristicSolver {
    async fn solve(&self, problem_text: &str, working_text: &str) -> SolverResult {
        heuristic_solve(problem_text, working_text, "heuristic")
    }
}

/// OpenAI 兼容 Solver
pub struct OpenAiSolver {
    client: Client<OpenAIConfig>,
    model: String,
    reasoning_effort: String,
}

impl OpenAiSolver {
    pub fn new(model: &str, reasoning_effort: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key)),
            model: model.to_string(),
            reasoning_effort: reasoning_effort.to_string(),
        }
    }

    async fn request(&self, problem_text: &str, working_text: &str) -> Result<(String, Usage), String> {
        let system = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SOLVER_SYSTEM_PROMPT.to_string())
                .build()
                .map_err(|e| e.to_string())?,
        );
        let user_text = format!(
            "Problem:\n{}\n\nStudent work / context:\n{}\n\nReturn strict JSON.",
            if problem_text.is_empty() { "(missing)" } else { problem_text },
            if working_text.is_empty() { "(missing)" } else { working_text },
        );
        let user = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()
                .map_err(|e| e.to_string())?,
        );
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system, user])
            .build()
            .map_err(|e| e.to_string())?;

        tracing::debug!(model = %self.model, effort = %self.reasoning_effort, "solver request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let mut usage = Usage::default();
        if let Some(raw) = &response.usage {
            usage.prompt_tokens = raw.prompt_tokens as u64;
            usage.completion_tokens = raw.completion_tokens as u64;
        }
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok((content, usage))
    }
}

fn normalize_claims(items: Option<&Vec<serde_json::Value>>) -> Vec<SolverClaim> {
    let mut claims = Vec::new();
    for item in items.into_iter().flatten() {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let field = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        claims.push(SolverClaim {
            claim_type: field("claim_type").unwrap_or_else(|| "equality".to_string()),
            lhs: field("lhs"),
            rhs: field("rhs"),
            expr: field("expr"),
            var: field("var"),
            equals: field("equals"),
        });
    }
    claims
}

#[async_trait]
impl SolverAgent for OpenAiSolver {
    async fn solve(&self, problem_text: &str, working_text: &str) -> SolverResult {
        let started = Instant::now();
        match self.request(problem_text, working_text).await {
            Ok((content, usage)) => {
                let payload = extract_json_object(&content);
                if payload.is_null() {
                    tracing::warn!(model = %self.model, "solver returned no parseable JSON");
                    let mut fallback = heuristic_solve(problem_text, working_text, &self.model);
                    fallback.status = "uncertain".to_string();
                    fallback.raw = json!({
                        "mode": "heuristic_after_parse_failure",
                        "raw_text": content.chars().take(2000).collect::<String>(),
                    });
                    return fallback;
                }
                let latency_ms = started.elapsed().as_millis() as u64;
                let claims = normalize_claims(
                    payload.get("symbolic_claims").and_then(|v| v.as_array()),
                );
                SolverResult {
                    status: payload["status"].as_str().unwrap_or("ok").to_string(),
                    model: self.model.clone(),
                    explanation: payload["explanation"]
                        .as_str()
                        .unwrap_or("Solver completed.")
                        .to_string(),
                    error_found: payload["error_found"].as_bool().unwrap_or(false),
                    error_type: payload["error_type"].as_str().map(String::from),
                    error_step: payload["error_step"].as_u64().map(|v| v as u32),
                    confidence: payload["confidence"].as_f64().unwrap_or(0.55),
                    symbolic_claims: claims,
                    usage,
                    latency_ms,
                    raw: payload,
                }
            }
            Err(error) => {
                tracing::warn!(model = %self.model, %error, "solver request failed, falling back");
                let mut fallback = heuristic_solve(problem_text, working_text, &self.model);
                fallback.status = "uncertain".to_string();
                fallback.latency_ms = started.elapsed().as_millis() as u64;
                fallback.raw = json!({"error": error, "mode": "heuristic_after_exception"});
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heuristic_detects_projection_error() {
        let result = HeuristicSolver
            .solve(
                "Projectile motion, find the y projection.",
                "I used cos for the vertical axis and sin elsewhere.",
            )
            .await;
        assert!(result.error_found);
        assert_eq!(result.error_type.as_deref(), Some("trigonometry_projection"));
        assert_eq!(result.error_step, Some(3));
        assert!(result.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_heuristic_without_signal_stays_humble() {
        let result = HeuristicSolver.solve("Solve the riddle.", "No work shown.").await;
        assert!(!result.error_found);
        assert!(result.error_type.is_none());
        assert_eq!(result.confidence, 0.40);
    }

    #[test]
    fn test_normalize_claims_skips_non_objects() {
        let items = vec![
            json!({"claim_type": "equality", "lhs": "2", "rhs": "2"}),
            json!("not a claim"),
            json!({"lhs": "a", "rhs": "a"}),
        ];
        let claims = normalize_claims(Some(&items));
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[1].claim_type, "equality");
    }
}
