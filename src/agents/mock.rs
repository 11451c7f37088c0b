//! Mock 协作者（用于测试，无需 API）
//!
//! 返回脚本化结果并计数调用次数，供预算闸门等「零调用」断言使用。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::traits::{HintContext, OcrAgent, SolverAgent, TutorAgent};
use crate::schemas::{
    IngestEventRequest, OcrPrepResult, SolverResult, TutorResult, Usage, VerifierResult,
};
use crate::verifier::ClaimVerifier;

/// 脚本化 Solver：固定返回 + 调用计数
pub struct ScriptedSolver {
    result: SolverResult,
    pub calls: AtomicUsize,
}

impl ScriptedSolver {
    pub fn new(result: SolverResult) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SolverAgent for ScriptedSolver {
    async fn solve(&self, _problem_text: &str, _working_text: &str) -> SolverResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// 脚本化 Tutor
pub struct ScriptedTutor {
    result: TutorResult,
    pub calls: AtomicUsize,
}

impl ScriptedTutor {
    pub fn new(result: TutorResult) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TutorAgent for ScriptedTutor {
    async fn compose_hint(&self, _ctx: HintContext<'_>) -> TutorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// 计数 OCR：委托给文本归一实现
pub struct CountingOcr {
    inner: super::ocr::TextOcr,
    pub calls: AtomicUsize,
}

impl CountingOcr {
    pub fn new() -> Self {
        Self {
            inner: super::ocr::TextOcr,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CountingOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrAgent for CountingOcr {
    async fn prepare(&self, request: &IngestEventRequest) -> OcrPrepResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.prepare(request).await
    }
}

/// 脚本化 Verifier
pub struct ScriptedVerifier {
    result: VerifierResult,
    pub calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new(result: VerifierResult) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClaimVerifier for ScriptedVerifier {
    fn verify(&self, _claims: &[crate::schemas::SolverClaim]) -> VerifierResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// 常用脚本结果的便捷构造
pub fn scripted_solver_result(error_type: Option<&str>, cost: f64) -> SolverResult {
    SolverResult {
        status: "ok".to_string(),
        model: "mock-solver".to_string(),
        explanation: "Scripted diagnosis.".to_string(),
        error_found: error_type.is_some(),
        error_type: error_type.map(String::from),
        error_step: error_type.map(|_| 2),
        confidence: 0.8,
        symbolic_claims: Vec::new(),
        usage: Usage {
            cost,
            ..Usage::default()
        },
        latency_ms: 10,
        raw: serde_json::json!({"mode": "mock"}),
    }
}

pub fn scripted_tutor_result(message: &str, confidence: f64) -> TutorResult {
    TutorResult {
        model: "mock-tutor".to_string(),
        message: message.to_string(),
        confidence,
        requires_attempt: true,
        usage: Usage::default(),
        latency_ms: 10,
        flags: Vec::new(),
    }
}

pub fn scripted_verifier_result(disagreement_rate: f64) -> VerifierResult {
    let failed: u32 = if disagreement_rate >= 0.5 { 1 } else { 0 };
    VerifierResult {
        status: if failed == 1 { "disagreement" } else { "ok" }.to_string(),
        checked_claims: 1,
        passed_claims: 1 - failed,
        failed_claims: failed,
        disagreement_rate,
        details: Vec::new(),
    }
}
