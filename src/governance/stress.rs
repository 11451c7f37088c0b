//! 双侧压力估计：AI 侧与学生侧共用的加权归一
//!
//! 两组因子分别与独立配置的权重表做加权平均，输出始终落在 [0,1]。

use std::collections::BTreeMap;

use super::clamp01;

/// 加权压力：仅累计正权重项；权重和非正时返回 0。缺失因子按 0 计。
pub fn weighted_stress(factors: &BTreeMap<String, f64>, weights: &BTreeMap<String, f64>) -> f64 {
    let mut w_total = 0.0;
    let mut score = 0.0;
    for (key, weight) in weights {
        let w = weight.max(0.0);
        let v = clamp01(factors.get(key).copied().unwrap_or(0.0));
        score += v * w;
        w_total += w;
    }
    if w_total <= 0.0 {
        return 0.0;
    }
    clamp01(score / w_total)
}

/// AI 侧压力因子（全部归一到 [0,1]）
pub fn make_ai_factors(
    verifier_disagreement_rate: f64,
    repeated_confusion_after_hints: f64,
    direct_answer_pressure_incidents: f64,
    latency_ms: u64,
    sla_ms: u64,
    non_transfer_recurrence: f64,
) -> BTreeMap<String, f64> {
    let sla = sla_ms as f64;
    let latency_over_sla = ((latency_ms as f64 - sla) / sla.max(1.0)).max(0.0);
    BTreeMap::from([
        (
            "verifier_disagreement_rate".to_string(),
            clamp01(verifier_disagreement_rate),
        ),
        (
            "repeated_confusion_after_hints".to_string(),
            clamp01(repeated_confusion_after_hints),
        ),
        (
            "direct_answer_pressure_incidents".to_string(),
            clamp01(direct_answer_pressure_incidents),
        ),
        ("latency_over_sla".to_string(), clamp01(latency_over_sla)),
        (
            "non_transfer_recurrence".to_string(),
            clamp01(non_transfer_recurrence),
        ),
    ])
}

/// 学生侧压力代理因子
pub fn make_viktor_factors(
    idle_seconds: f64,
    idle_threshold_seconds: f64,
    hint_to_progress_lag: f64,
    repeated_error_signature: f64,
) -> BTreeMap<String, f64> {
    let idle_blocks =
        ((idle_seconds - idle_threshold_seconds) / idle_threshold_seconds.max(1.0)).max(0.0);
    BTreeMap::from([
        (
            "idle_blocks_over_threshold".to_string(),
            clamp01(idle_blocks),
        ),
        (
            "hint_to_progress_lag".to_string(),
            clamp01(hint_to_progress_lag),
        ),
        (
            "repeated_error_signature".to_string(),
            clamp01(repeated_error_signature),
        ),
    ])
}

/// 同时计算 AI 侧与学生侧压力
pub fn compute_shared_stress(
    ai_factors: &BTreeMap<String, f64>,
    viktor_factors: &BTreeMap<String, f64>,
    stress_weights_ai: &BTreeMap<String, f64>,
    stress_weights_viktor: &BTreeMap<String, f64>,
) -> (f64, f64) {
    (
        weighted_stress(ai_factors, stress_weights_ai),
        weighted_stress(viktor_factors, stress_weights_viktor),
    )
}
