//! 设定点稳态器：EWMA + 漂移上限
//!
//! 单次观测最多把设定点拉动 max_daily_drift × clamp(间隔天数, 1, 7)，
//! 是与隐藏评分配套的抗操纵后挡。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use super::{clamp01, round6};

/// 稳态器输出：新设定点与逐键绝对漂移，均已保留 6 位小数
#[derive(Debug, Clone)]
pub struct SetpointUpdate {
    pub setpoints: BTreeMap<String, f64>,
    pub drift: BTreeMap<String, f64>,
}

/// EWMA 更新 + 按时间缩放的漂移上限
///
/// 间隔天数夹到 [1,7]；无上次更新时间时按 1 天计（首次更新即获得整日漂移预算）。
/// 亚日级的多次更新同样各得整日预算——该下限按现行策略保留，勿私自收紧。
/// 键取两个映射的并集：缺 current 按 0.5，缺 observed 按当前值。
pub fn update_setpoints(
    current: &BTreeMap<String, f64>,
    observed: &BTreeMap<String, f64>,
    ewma_alpha: f64,
    max_daily_drift: f64,
    now: DateTime<Utc>,
    previous_updated_at: Option<DateTime<Utc>>,
) -> SetpointUpdate {
    let alpha = clamp01(ewma_alpha);
    let daily_cap = max_daily_drift.max(0.0);
    let elapsed_days = previous_updated_at
        .map(|prev| ((now - prev).num_milliseconds() as f64 / 86_400_000.0).clamp(1.0, 7.0))
        .unwrap_or(1.0);
    let cap = daily_cap * elapsed_days;

    let keys: BTreeSet<&String> = current.keys().chain(observed.keys()).collect();
    let mut setpoints = BTreeMap::new();
    let mut drift = BTreeMap::new();
    for key in keys {
        let cur = clamp01(current.get(key).copied().unwrap_or(0.5));
        let target = clamp01(observed.get(key).copied().unwrap_or(cur));
        let proposed_delta = alpha * (target - cur);
        let bounded_delta = proposed_delta.clamp(-cap, cap);
        let updated = clamp01(cur + bounded_delta);
        setpoints.insert(key.clone(), round6(updated));
        drift.insert(key.clone(), round6((updated - cur).abs()));
    }

    SetpointUpdate { setpoints, drift }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_setpoint_drift_clamp() {
        let now = Utc::now();
        let update = update_setpoints(
            &map(&[("competency", 0.5), ("transfer", 0.5)]),
            &map(&[("competency", 1.0), ("transfer", 0.0)]),
            1.0,
            0.05,
            now,
            Some(now - Duration::minutes(1)),
        );
        assert!(update.drift["competency"] <= 0.05);
        assert!(update.drift["transfer"] <= 0.05);
        assert!(update.setpoints["competency"] <= 0.55);
        assert!(update.setpoints["transfer"] >= 0.45);
    }

    #[test]
    fn test_all_values_stay_in_unit_interval() {
        let now = Utc::now();
        let update = update_setpoints(
            &map(&[("a", -3.0), ("b", 5.0)]),
            &map(&[("a", 9.0), ("b", -9.0)]),
            0.8,
            10.0,
            now,
            None,
        );
        for (key, v) in &update.setpoints {
            assert!((0.0..=1.0).contains(v), "{key}={v}");
        }
    }

    #[test]
    fn test_elapsed_days_scales_cap_up_to_seven() {
        let now = Utc::now();
        let run = |days: i64| {
            update_setpoints(
                &map(&[("competency", 0.0)]),
                &map(&[("competency", 1.0)]),
                1.0,
                0.05,
                now,
                Some(now - Duration::days(days)),
            )
            .drift["competency"]
        };
        assert!((run(3) - 0.15).abs() < 1e-6);
        // 超过 7 天按 7 天封顶
        assert!((run(30) - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_missing_previous_timestamp_gets_one_day_budget() {
        let now = Utc::now();
        let update = update_setpoints(
            &map(&[("transfer", 0.2)]),
            &map(&[("transfer", 1.0)]),
            1.0,
            0.05,
            now,
            None,
        );
        assert!((update.drift["transfer"] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_key_union_with_defaults() {
        let now = Utc::now();
        let update = update_setpoints(
            &map(&[("only_current", 0.9)]),
            &map(&[("only_observed", 1.0)]),
            0.5,
            1.0,
            now,
            None,
        );
        // 缺 observed：目标=当前值，不动
        assert_eq!(update.setpoints["only_current"], 0.9);
        assert_eq!(update.drift["only_current"], 0.0);
        // 缺 current：从 0.5 出发
        assert_eq!(update.setpoints["only_observed"], 0.75);
    }

    #[test]
    fn test_values_rounded_to_six_decimals() {
        let now = Utc::now();
        let update = update_setpoints(
            &map(&[("competency", 0.1)]),
            &map(&[("competency", 0.2)]),
            1.0 / 3.0,
            1.0,
            now,
            None,
        );
        let v = update.setpoints["competency"];
        assert_eq!(v, (v * 1e6).round() / 1e6);
    }
}
