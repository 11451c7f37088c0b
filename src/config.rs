//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FRIDAY__*` 覆盖（双下划线表示嵌套，
//! 如 `FRIDAY__POLICY__MAX_HINT_DEPTH=3`）。治理函数不读取配置整体，
//! 编排器在调用点拆出具名参数传入。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub api: ApiSection,
}

/// [app] 段：数据目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    /// 数据目录，未设置时用 ./data/friday
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/friday"))
    }
}

/// [models] 段：各阶段模型名
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsSection {
    #[serde(default = "default_solver_model")]
    pub solver_model: String,
    #[serde(default = "default_tutor_model")]
    pub tutor_model: String,
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            solver_model: default_solver_model(),
            tutor_model: default_tutor_model(),
            ocr_model: default_ocr_model(),
        }
    }
}

fn default_solver_model() -> String {
    "o3".to_string()
}

fn default_tutor_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_ocr_model() -> String {
    "gpt-4.1".to_string()
}

/// [policy] 段：辅导策略与治理阈值
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    /// 学生未尝试前禁止直接给出答案
    #[serde(default = "default_true")]
    pub no_direct_answer_before_attempt: bool,
    #[serde(default = "default_max_hint_depth")]
    pub max_hint_depth: u32,
    /// PAUSE 触发的空闲阈值（秒），低于则降级为 CONTEXT_SWITCH
    #[serde(default = "default_idle_threshold_seconds")]
    pub idle_threshold_seconds: f64,
    /// repeated_confusion 判定所需的最少历史事件数
    #[serde(default = "default_repeated_confusion_min_events")]
    pub repeated_confusion_min_events: usize,
    /// repeated_confusion 判定所需的最低复发率
    #[serde(default = "default_repeated_confusion_min_rate")]
    pub repeated_confusion_min_rate: f64,
    /// 复发率统计的事件窗口
    #[serde(default = "default_recent_error_window")]
    pub recent_error_window: usize,
    /// Solver+Tutor 合计延迟 SLA（毫秒），用于 AI 压力因子
    #[serde(default = "default_sla_ms")]
    pub sla_ms: u64,
    #[serde(default = "default_setpoints")]
    pub setpoints: BTreeMap<String, f64>,
    #[serde(default)]
    pub setpoint_update: SetpointUpdateSection,
    #[serde(default = "default_stress_weights_ai")]
    pub stress_weights_ai: BTreeMap<String, f64>,
    #[serde(default = "default_stress_weights_viktor")]
    pub stress_weights_viktor: BTreeMap<String, f64>,
    #[serde(default)]
    pub goodhart_thresholds: GoodhartThresholds,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            no_direct_answer_before_attempt: true,
            max_hint_depth: default_max_hint_depth(),
            idle_threshold_seconds: default_idle_threshold_seconds(),
            repeated_confusion_min_events: default_repeated_confusion_min_events(),
            repeated_confusion_min_rate: default_repeated_confusion_min_rate(),
            recent_error_window: default_recent_error_window(),
            sla_ms: default_sla_ms(),
            setpoints: default_setpoints(),
            setpoint_update: SetpointUpdateSection::default(),
            stress_weights_ai: default_stress_weights_ai(),
            stress_weights_viktor: default_stress_weights_viktor(),
            goodhart_thresholds: GoodhartThresholds::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_hint_depth() -> u32 {
    2
}

fn default_idle_threshold_seconds() -> f64 {
    40.0
}

fn default_repeated_confusion_min_events() -> usize {
    2
}

fn default_repeated_confusion_min_rate() -> f64 {
    0.5
}

fn default_recent_error_window() -> usize {
    12
}

fn default_sla_ms() -> u64 {
    8000
}

fn default_setpoints() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("competency".to_string(), 0.50),
        ("transfer".to_string(), 0.45),
        ("horizon".to_string(), 0.40),
        ("error_signature".to_string(), 0.45),
        ("safety_agency".to_string(), 0.80),
    ])
}

/// [policy.setpoint_update] 段：EWMA 平滑与漂移上限
#[derive(Debug, Clone, Deserialize)]
pub struct SetpointUpdateSection {
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    #[serde(default = "default_max_daily_drift")]
    pub max_daily_drift: f64,
}

impl Default for SetpointUpdateSection {
    fn default() -> Self {
        Self {
            ewma_alpha: default_ewma_alpha(),
            max_daily_drift: default_max_daily_drift(),
        }
    }
}

fn default_ewma_alpha() -> f64 {
    0.15
}

fn default_max_daily_drift() -> f64 {
    0.05
}

fn default_stress_weights_ai() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("verifier_disagreement_rate".to_string(), 0.25),
        ("repeated_confusion_after_hints".to_string(), 0.20),
        ("direct_answer_pressure_incidents".to_string(), 0.20),
        ("latency_over_sla".to_string(), 0.20),
        ("non_transfer_recurrence".to_string(), 0.15),
    ])
}

fn default_stress_weights_viktor() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("idle_blocks_over_threshold".to_string(), 0.35),
        ("hint_to_progress_lag".to_string(), 0.35),
        ("repeated_error_signature".to_string(), 0.30),
    ])
}

/// [policy.goodhart_thresholds] 段：隐藏评分的告警阈值
#[derive(Debug, Clone, Deserialize)]
pub struct GoodhartThresholds {
    #[serde(default = "default_max_leakage_penalty")]
    pub max_leakage_penalty: f64,
    #[serde(default = "default_min_hidden_score")]
    pub min_hidden_score: f64,
}

impl Default for GoodhartThresholds {
    fn default() -> Self {
        Self {
            max_leakage_penalty: default_max_leakage_penalty(),
            min_hidden_score: default_min_hidden_score(),
        }
    }
}

fn default_max_leakage_penalty() -> f64 {
    0.2
}

fn default_min_hidden_score() -> f64 {
    0.45
}

/// [budget] 段：花费上限（美元）
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_monthly_cap_usd")]
    pub monthly_cap_usd: f64,
    #[serde(default = "default_per_session_soft_cap_usd")]
    pub per_session_soft_cap_usd: f64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            monthly_cap_usd: default_monthly_cap_usd(),
            per_session_soft_cap_usd: default_per_session_soft_cap_usd(),
        }
    }
}

fn default_monthly_cap_usd() -> f64 {
    150.0
}

fn default_per_session_soft_cap_usd() -> f64 {
    8.0
}

/// [api] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

/// 从 config 目录加载配置，环境变量 FRIDAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FRIDAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FRIDAY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_document() {
        let cfg = AppConfig::default();
        assert!(cfg.policy.no_direct_answer_before_attempt);
        assert_eq!(cfg.policy.max_hint_depth, 2);
        assert_eq!(cfg.policy.idle_threshold_seconds, 40.0);
        assert_eq!(cfg.policy.setpoints.get("safety_agency"), Some(&0.80));
        assert_eq!(cfg.policy.setpoint_update.ewma_alpha, 0.15);
        assert_eq!(cfg.budget.monthly_cap_usd, 150.0);
    }

    #[test]
    fn test_stress_weight_keys_cover_factor_builders() {
        let cfg = AppConfig::default();
        for key in [
            "verifier_disagreement_rate",
            "repeated_confusion_after_hints",
            "direct_answer_pressure_incidents",
            "latency_over_sla",
            "non_transfer_recurrence",
        ] {
            assert!(cfg.policy.stress_weights_ai.contains_key(key), "{key}");
        }
        for key in [
            "idle_blocks_over_threshold",
            "hint_to_progress_lag",
            "repeated_error_signature",
        ] {
            assert!(cfg.policy.stress_weights_viktor.contains_key(key), "{key}");
        }
    }
}
