//! 协作者抽象
//!
//! 所有实现（OpenAI 兼容 / 启发式 / Mock）遵守同一契约：失败在实现内部
//! 吸收为带标志的降级结果，方法永不向编排器抛错。

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::schemas::{
    IngestEventRequest, OcrPrepResult, SolverResult, TutorResult, VerifierResult,
};

/// OCR 协作者：把题面 / OCR / LaTeX / 自由文本 / 图片归一为 Solver 输入
#[async_trait]
pub trait OcrAgent: Send + Sync {
    async fn prepare(&self, request: &IngestEventRequest) -> OcrPrepResult;
}

/// Solver 协作者：定位学生解答中的错误并给出符号断言
#[async_trait]
pub trait SolverAgent: Send + Sync {
    async fn solve(&self, problem_text: &str, working_text: &str) -> SolverResult;
}

/// Tutor 生成提示所需的上下文
#[derive(Debug)]
pub struct HintContext<'a> {
    pub problem_text: &'a str,
    pub working_text: &'a str,
    pub solver: &'a SolverResult,
    pub verifier: &'a VerifierResult,
    pub setpoints: &'a BTreeMap<String, f64>,
    pub no_direct_answer_before_attempt: bool,
    pub max_hint_depth: u32,
}

/// Tutor 协作者：给出苏格拉底式提示草稿（护栏在编排器侧）
#[async_trait]
pub trait TutorAgent: Send + Sync {
    async fn compose_hint(&self, ctx: HintContext<'_>) -> TutorResult;
}
