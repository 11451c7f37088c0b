//! 隐藏（抗 Goodhart）评分
//!
//! 治理专用评分通道，与 Tutor 可见指标在结构上分离：[`GoodhartScore`] 故意
//! 不实现 Serialize，任何序列化路径都无法把 hidden_score 带进学生可见响应。
//! 持久化只以标量列形式写入辅导轮次记录。

use std::collections::BTreeMap;

use super::clamp01;
use crate::config::GoodhartThresholds;

/// 隐藏评分输出。注意：没有 Serialize 派生，这是信息隐藏契约的一部分。
#[derive(Debug, Clone)]
pub struct GoodhartScore {
    pub hidden_score: f64,
    pub leakage_penalty: f64,
    pub flags: Vec<String>,
    pub competency_credit: f64,
}

/// 同一错误签名在近期历史中的复发率，[0,1]
///
/// 当前错误为空或历史为空时返回 0。
pub fn non_transfer_recurrence(current_error_type: Option<&str>, recent_error_types: &[String]) -> f64 {
    let curr = current_error_type.unwrap_or("").trim();
    if curr.is_empty() {
        return 0.0;
    }
    let recent: Vec<&str> = recent_error_types
        .iter()
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .collect();
    if recent.is_empty() {
        return 0.0;
    }
    let hits = recent.iter().filter(|x| **x == curr).count();
    clamp01(hits as f64 / recent.len().max(1) as f64)
}

/// 计算隐藏评分
///
/// 能力分（competency_credit）：提示后出现独立进展 1.0；仍要求尝试 0.5；否则 0.3。
/// raw = 0.65 + 0.20·credit − 0.45·penalty − 0.25·disagreement − 0.15·confusion。
pub fn evaluate_hidden_score(
    leakage_penalty: f64,
    verifier_disagreement_rate: f64,
    repeated_confusion_after_hints: f64,
    post_hint_progress: bool,
    requires_attempt: bool,
    thresholds: &GoodhartThresholds,
) -> GoodhartScore {
    let penalty = clamp01(leakage_penalty);
    let disagreement = clamp01(verifier_disagreement_rate);
    let confusion = clamp01(repeated_confusion_after_hints);

    let competency_credit = if post_hint_progress {
        1.0
    } else if requires_attempt {
        0.5
    } else {
        0.3
    };
    let raw = 0.65 + 0.20 * competency_credit
        - 0.45 * penalty
        - 0.25 * disagreement
        - 0.15 * confusion;
    let score = clamp01(raw);

    let mut flags: Vec<String> = Vec::new();
    if penalty > 0.0 {
        flags.push("leakage_penalty_applied".to_string());
    }
    if disagreement >= 0.5 {
        flags.push("verifier_disagreement_high".to_string());
    }
    if confusion >= 0.5 {
        flags.push("repeated_confusion_high".to_string());
    }
    if score < thresholds.min_hidden_score {
        flags.push("hidden_score_low".to_string());
    }

    GoodhartScore {
        hidden_score: score,
        leakage_penalty: penalty,
        flags,
        competency_credit: clamp01(competency_credit),
    }
}

/// 将隐藏评分映射为设定点观测目标（稳态器输入），全部夹到 [0,1]
pub fn model_observed_setpoint_targets(
    goodhart: &GoodhartScore,
    verifier_disagreement_rate: f64,
    non_transfer_rate: f64,
) -> BTreeMap<String, f64> {
    BTreeMap::from([
        (
            "competency".to_string(),
            clamp01(goodhart.competency_credit * (1.0 - goodhart.leakage_penalty)),
        ),
        ("transfer".to_string(), clamp01(1.0 - non_transfer_rate)),
        (
            "horizon".to_string(),
            clamp01(1.0 - verifier_disagreement_rate),
        ),
        (
            "error_signature".to_string(),
            clamp01(1.0 - non_transfer_rate * 0.7),
        ),
        ("safety_agency".to_string(), clamp01(goodhart.hidden_score)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> GoodhartThresholds {
        GoodhartThresholds::default()
    }

    #[test]
    fn test_non_transfer_recurrence_ratio() {
        let recent = vec![
            "sign_convention".to_string(),
            "sign_convention".to_string(),
            "integration_constant".to_string(),
            "sign_convention".to_string(),
        ];
        let rate = non_transfer_recurrence(Some("sign_convention"), &recent);
        assert_eq!(rate, 0.75);
    }

    #[test]
    fn test_non_transfer_recurrence_empty_inputs() {
        assert_eq!(non_transfer_recurrence(None, &["x".to_string()]), 0.0);
        assert_eq!(non_transfer_recurrence(Some(""), &["x".to_string()]), 0.0);
        assert_eq!(non_transfer_recurrence(Some("x"), &[]), 0.0);
    }

    #[test]
    fn test_hidden_score_rewards_post_hint_progress() {
        let progressed = evaluate_hidden_score(0.0, 0.0, 0.0, true, true, &thresholds());
        let stuck = evaluate_hidden_score(0.0, 0.0, 0.0, false, true, &thresholds());
        assert!(progressed.hidden_score > stuck.hidden_score);
        assert_eq!(progressed.competency_credit, 1.0);
        assert_eq!(stuck.competency_credit, 0.5);
    }

    #[test]
    fn test_hidden_score_flags() {
        let score = evaluate_hidden_score(0.8, 0.6, 0.7, false, false, &thresholds());
        assert!(score.flags.contains(&"leakage_penalty_applied".to_string()));
        assert!(score
            .flags
            .contains(&"verifier_disagreement_high".to_string()));
        assert!(score.flags.contains(&"repeated_confusion_high".to_string()));
        assert!(score.flags.contains(&"hidden_score_low".to_string()));
        assert!(score.hidden_score >= 0.0 && score.hidden_score <= 1.0);
    }

    #[test]
    fn test_clean_turn_has_no_flags() {
        let score = evaluate_hidden_score(0.0, 0.0, 0.0, true, true, &thresholds());
        assert!(score.flags.is_empty());
        // 0.65 + 0.20*1.0
        assert!((score.hidden_score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_observed_targets_clamped_and_complete() {
        let score = evaluate_hidden_score(0.3, 0.2, 0.0, false, true, &thresholds());
        let targets = model_observed_setpoint_targets(&score, 0.2, 0.4);
        for key in [
            "competency",
            "transfer",
            "horizon",
            "error_signature",
            "safety_agency",
        ] {
            let v = targets.get(key).copied().unwrap();
            assert!((0.0..=1.0).contains(&v), "{key}={v}");
        }
        assert!((targets["error_signature"] - (1.0 - 0.4 * 0.7)).abs() < 1e-9);
    }
}
