//! 治理控制环
//!
//! 触发器归一、提示护栏、隐藏（抗 Goodhart）评分、设定点稳态器、双侧压力估计。
//! 全部为纯函数，参数显式传入，不读全局配置。

pub mod goodhart;
pub mod hint_guard;
pub mod setpoints;
pub mod stress;
pub mod triggers;

/// 夹到 [0,1]，治理数值的统一边界
pub(crate) fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// 保留 6 位小数（快照持久化前的归一）
pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
