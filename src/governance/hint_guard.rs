//! 提示护栏：降低直接答案泄漏
//!
//! 对 Tutor 草稿做模式扫描；策略禁止且学生尚未尝试时整条替换为苏格拉底式
//! 反问（不做局部涂抹，避免残留可拼出答案）。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

static DIRECT_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn direct_patterns() -> &'static [Regex] {
    DIRECT_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\bfinal answer\b").unwrap(),
            Regex::new(r"(?i)\banswer is\b").unwrap(),
            Regex::new(r"(?i)\btherefore\b").unwrap(),
            Regex::new(r"\bx\s*=\s*[-+*/0-9a-zA-Z().]+").unwrap(),
            Regex::new(r"\bv\s*=\s*[-+*/0-9a-zA-Z().]+").unwrap(),
        ]
    })
}

/// 护栏替换文本：引导学生回到关键推理步骤
const SOCRATIC_REDIRECT: &str = "Let's not jump to the final answer. Check the key transition: \
which formula or projection should apply here, and why?";

/// 泄漏检测结果
#[derive(Debug, Clone)]
pub struct LeakageReport {
    pub has_leak: bool,
    /// 命中数归一化到 [0,1]：hits / (max_hint_depth + 1)
    pub penalty: f64,
    pub flags: Vec<String>,
}

/// 扫描 Tutor 消息中的直接答案信号
pub fn detect_leakage(message: &str, requires_attempt: bool, max_hint_depth: u32) -> LeakageReport {
    let mut flags: Vec<String> = Vec::new();
    let mut hits = 0u32;
    for pattern in direct_patterns() {
        if pattern.is_match(message) {
            hits += 1;
        }
    }

    // 首轮提示里出现多个等号的密集公式同样可疑
    if message.matches('=').count() >= 2 {
        hits += 1;
        flags.push("dense_equation_leak".to_string());
    }

    if requires_attempt && hits > 0 {
        flags.push("direct_answer_risk".to_string());
    }

    let penalty = (f64::from(hits) / f64::from(max_hint_depth + 1)).min(1.0);
    LeakageReport {
        has_leak: hits > 0,
        penalty,
        flags,
    }
}

/// 护栏输出：最终消息 + 排序去重后的标志 + 泄漏惩罚
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    pub message: String,
    pub flags: Vec<String>,
    pub penalty: f64,
}

/// 应用泄漏检测；策略禁止直接答案且检测到泄漏时整条替换
pub fn apply_hint_guard(
    message: &str,
    requires_attempt: bool,
    no_direct_answer_before_attempt: bool,
    max_hint_depth: u32,
) -> GuardOutcome {
    let report = detect_leakage(message, requires_attempt, max_hint_depth);
    let mut flags: BTreeSet<String> = report.flags.into_iter().collect();

    if no_direct_answer_before_attempt && requires_attempt && report.has_leak {
        flags.insert("hint_sanitized_by_guard".to_string());
        return GuardOutcome {
            message: SOCRATIC_REDIRECT.to_string(),
            flags: flags.into_iter().collect(),
            penalty: report.penalty,
        };
    }

    GuardOutcome {
        message: message.to_string(),
        flags: flags.into_iter().collect(),
        penalty: report.penalty,
    }
}
