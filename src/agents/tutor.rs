//! Tutor 协作者：苏格拉底式提示草稿
//!
//! 模型只回严格 JSON；请求失败时退回按错误类别查表的启发式提示，
//! 并带 tutor_fallback_after_exception 标志。护栏在编排器侧统一应用。

use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use super::extract_json_object;
use super::traits::{HintContext, TutorAgent};
use crate::schemas::{TutorResult, Usage};

const TUTOR_SYSTEM_PROMPT: &str = "You are Tutor Agent 'Friday'. Return strict JSON with keys:\n\
{\"message\": str, \"confidence\": float(0..1), \"requires_attempt\": bool, \"flags\": [str]}.\n\
Rules:\n\
- Use Socratic style.\n\
- Do not provide full final answer unless explicitly requested after multiple attempts.\n\
- Keep hint concise (1-3 sentences).\n\
- If verifier is uncertain/disagreeing, admit uncertainty and guide validation.";

/// 按错误类别查表的启发式提示
pub(crate) fn heuristic_hint(error_type: Option<&str>, verifier_disagreement: f64) -> String {
    if verifier_disagreement >= 0.5 {
        return "I'm not sure about the current branch. Let's check the step before the disputed \
                one: which physical quantity are you expressing, and what are its units?"
            .to_string();
    }
    match error_type {
        Some("trigonometry_projection") => {
            "Look at the projection under the angle: why did you pick that particular \
             trigonometric function?"
                .to_string()
        }
        Some("integration_constant") => {
            "Before you finish, check: what happens to the constant of integration?".to_string()
        }
        Some("sign_convention") => {
            "Check the axis orientation and the signs of the forces: where could a minus sign \
             appear?"
                .to_string()
        }
        _ => "Pick the step you are least sure about and check its dimensions or a boundary case."
            .to_string(),
    }
}

/// 确定性启发式 Tutor
#[derive(Debug, Default)]
pub struct HeuristicTutor;

#[async_trait]
impl TutorAgent for HeuristicTutor {
    async fn compose_hint(&self, ctx: HintContext<'_>) -> TutorResult {
        let disagreement = ctx.verifier.disagreement_rate;
        let mut flags = vec!["heuristic_tutor".to_string()];
        if disagreement >= 0.5 {
            flags.push("uncertain_mode".to_string());
        }
        TutorResult {
            model: "heuristic".to_string(),
            message: heuristic_hint(ctx.solver.error_type.as_deref(), disagreement),
            confidence: if disagreement < 0.5 { 0.52 } else { 0.40 },
            requires_attempt: ctx.no_direct_answer_before_attempt,
            usage: Usage::default(),
            latency_ms: 5,
            flags,
        }
    }
}

/// OpenAI 兼容 Tutor
pub struct OpenAiTutor {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTutor {
    pub fn new(model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key)),
            model: model.to_string(),
        }
    }

    async fn request(&self, ctx: &HintContext<'_>) -> Result<(String, Usage), String> {
        let user_text = format!(
            "Problem:\n{}\n\nStudent work:\n{}\n\nSolver result:\n{}\n\nVerifier result:\n{}\n\n\
             Setpoints:\n{}\n\nPolicy:\n{}\n\nReturn strict JSON only.",
            if ctx.problem_text.is_empty() { "(missing)" } else { ctx.problem_text },
            if ctx.working_text.is_empty() { "(missing)" } else { ctx.working_text },
            serde_json::to_string(ctx.solver).map_err(|e| e.to_string())?,
            serde_json::to_string(ctx.verifier).map_err(|e| e.to_string())?,
            serde_json::to_string(ctx.setpoints).map_err(|e| e.to_string())?,
            serde_json::json!({
                "no_direct_answer_before_attempt": ctx.no_direct_answer_before_attempt,
                "max_hint_depth": ctx.max_hint_depth,
            }),
        );
        let system = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(TUTOR_SYSTEM_PROMPT.to_string())
                .build()
                .map_err(|e| e.to_string())?,
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

#[async_trait]
impl TutorAgent for OpenAiTutor {
    async fn compose_hint(&self, ctx: HintContext<'_>) -> TutorResult {
        let started = Instant::now();
        let disagreement = ctx.verifier.disagreement_rate;
        let requires_attempt_default = ctx.no_direct_answer_before_attempt;
        match self.request(&ctx).await {
            Ok((content, usage)) => {
                let payload = extract_json_object(&content);
                let message = payload["message"]
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| {
                        heuristic_hint(ctx.solver.error_type.as_deref(), disagreement)
                    });
                let mut flags: Vec<String> = payload["flags"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if disagreement >= 0.5 && !flags.iter().any(|f| f == "uncertain_mode") {
                    flags.push("uncertain_mode".to_string());
                }
                TutorResult {
                    model: self.model.clone(),
                    message,
                    confidence: payload["confidence"].as_f64().unwrap_or(0.55),
                    requires_attempt: payload["requires_attempt"]
                        .as_bool()
                        .unwrap_or(requires_attempt_default),
                    usage,
                    latency_ms: started.elapsed().as_millis() as u64,
                    flags,
                }
            }
            Err(error) => {
                tracing::warn!(model = %self.model, %error, "tutor request failed, falling back");
                TutorResult {
                    model: self.model.clone(),
                    message: heuristic_hint(ctx.solver.error_type.as_deref(), disagreement),
                    confidence: 0.40,
                    requires_attempt: requires_attempt_default,
                    usage: Usage::default(),
                    latency_ms: started.elapsed().as_millis() as u64,
                    flags: vec!["tutor_fallback_after_exception".to_string()],
                }
            }
        }
    }
}
