//! 请求 / 响应 DTO 与流水线契约
//!
//! 对外 API 与各阶段之间传递的结构体。治理专用的隐藏评分（GoodhartScore）
//! 不在此处：它故意不可序列化，见 governance::goodhart。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ingest 触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// 学生长时间无活动
    Pause,
    /// 显式求助（/help 或 HELP_REQUEST）
    HelpRequest,
    /// 切换题目 / 话题
    ContextSwitch,
    /// 手动上传题目或解答
    ManualUpload,
}

impl Default for TriggerType {
    fn default() -> Self {
        TriggerType::ManualUpload
    }
}

/// 一次辅导轮次对外可见的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    Uncertain,
    BudgetBlocked,
    Error,
}

/// 创建会话请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateRequest {
    pub student_alias: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

/// 会话创建响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub active_setpoints: BTreeMap<String, f64>,
}

/// ingest 请求体（来自网关或 API 客户端）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestEventRequest {
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub problem_text: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub latex_text: Option<String>,
    #[serde(default)]
    pub idle_seconds: Option<f64>,
    #[serde(default)]
    pub user_message: Option<String>,
}

/// 编排器单轮最终响应（学生可见通道；不含任何隐藏评分字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorTurnResponse {
    pub status: TurnStatus,
    pub tutor_message: String,
    pub confidence: f64,
    pub requires_attempt: bool,
    pub flags: Vec<String>,
    pub trace_id: String,
}

/// 当前压力快照（学生侧字段名沿用 viktor）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressState {
    pub stress_ai: f64,
    pub stress_viktor: f64,
}

impl Default for StressState {
    fn default() -> Self {
        Self {
            stress_ai: 0.0,
            stress_viktor: 0.0,
        }
    }
}

/// 预算快照：当月 / 单会话累计与上限
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub monthly_cap_usd: f64,
    pub monthly_spent_usd: f64,
    pub monthly_remaining_usd: f64,
    pub per_session_soft_cap_usd: f64,
    pub session_spent_usd: f64,
}

/// 已持久化事件（get_state / 最近错误回放用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub created_at: String,
    pub payload: serde_json::Value,
}

/// 会话状态快照响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub setpoints: BTreeMap<String, f64>,
    pub stress: StressState,
    pub last_events: Vec<EventRecord>,
    pub budget_snapshot: BudgetSnapshot,
}

/// 单次协作者调用的用量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// OCR 归一化结果：供 Solver 阶段使用的文本负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPrepResult {
    pub normalized_problem: String,
    pub normalized_working: String,
    /// 取材来源：manual_problem_text / provided_ocr_text / provided_latex_text / missing_problem
    pub source: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Solver 给出的符号断言
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverClaim {
    #[serde(default = "default_claim_type")]
    pub claim_type: String,
    #[serde(default)]
    pub lhs: Option<String>,
    #[serde(default)]
    pub rhs: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub equals: Option<String>,
}

fn default_claim_type() -> String {
    "equality".to_string()
}

/// Solver 输出，供 Verifier / Tutor 消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResult {
    pub status: String,
    pub model: String,
    pub explanation: String,
    pub error_found: bool,
    pub error_type: Option<String>,
    pub error_step: Option<u32>,
    pub confidence: f64,
    pub symbolic_claims: Vec<SolverClaim>,
    pub usage: Usage,
    pub latency_ms: u64,
    /// 原始模型输出或降级说明，仅用于审计
    pub raw: serde_json::Value,
}

/// 单条断言的校验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim_type: String,
    pub ok: bool,
    pub canonical: String,
}

/// Verifier 对 Solver 断言的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierResult {
    /// ok / no_claims / disagreement
    pub status: String,
    pub checked_claims: u32,
    pub passed_claims: u32,
    pub failed_claims: u32,
    pub disagreement_rate: f64,
    pub details: Vec<ClaimCheck>,
}

impl Default for VerifierResult {
    fn default() -> Self {
        Self {
            status: "no_claims".to_string(),
            checked_claims: 0,
            passed_claims: 0,
            failed_claims: 0,
            disagreement_rate: 0.0,
            details: Vec::new(),
        }
    }
}

/// Tutor 草稿（进入护栏之前）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorResult {
    pub model: String,
    pub message: String,
    pub confidence: f64,
    pub requires_attempt: bool,
    pub usage: Usage,
    pub latency_ms: u64,
    pub flags: Vec<String>,
}
