//! 触发器归一
//!
//! 将请求的触发类型 + 空闲时长 + 自由文本归一为规范触发：/help 强制求助；
//! 短暂停顿降级为话题切换。

use chrono::{DateTime, Utc};

use crate::schemas::TriggerType;

/// 归一化触发类型，规则按序：
/// 1. 消息以 /help 开头（忽略大小写与首尾空白）=> HELP_REQUEST
/// 2. 请求为 PAUSE 且空闲低于阈值 => CONTEXT_SWITCH
/// 3. 其余保持原样
pub fn normalize_trigger(
    requested: TriggerType,
    idle_seconds: Option<f64>,
    user_message: Option<&str>,
    idle_threshold_seconds: f64,
) -> TriggerType {
    let msg = user_message.unwrap_or("").trim().to_lowercase();
    if msg.starts_with("/help") {
        return TriggerType::HelpRequest;
    }
    if requested == TriggerType::Pause && idle_seconds.unwrap_or(0.0) < idle_threshold_seconds {
        return TriggerType::ContextSwitch;
    }
    requested
}

/// 空闲达到阈值时才发 PAUSE 触发
pub fn should_emit_pause_trigger(idle_seconds: Option<f64>, threshold_seconds: f64) -> bool {
    idle_seconds.unwrap_or(0.0) >= threshold_seconds
}

/// 轮询式集成用的简单状态机：记录最近活动时刻，按阈值判定是否触发 PAUSE
#[derive(Debug, Clone)]
pub struct PauseBatcher {
    pub threshold_seconds: f64,
    last_activity_at: DateTime<Utc>,
}

impl PauseBatcher {
    pub fn new(threshold_seconds: f64, now: DateTime<Utc>) -> Self {
        Self {
            threshold_seconds,
            last_activity_at: now,
        }
    }

    pub fn mark_activity(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn idle_seconds(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.last_activity_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        self.idle_seconds(now) >= self.threshold_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const THRESHOLD: f64 = 40.0;

    #[test]
    fn test_pause_trigger_threshold() {
        assert!(should_emit_pause_trigger(Some(40.0), THRESHOLD));
        assert!(!should_emit_pause_trigger(Some(39.9), THRESHOLD));
        assert!(!should_emit_pause_trigger(None, THRESHOLD));
    }

    #[test]
    fn test_normalize_short_pause_to_context_switch() {
        let trig = normalize_trigger(
            TriggerType::Pause,
            Some(10.0),
            Some("thinking"),
            THRESHOLD,
        );
        assert_eq!(trig, TriggerType::ContextSwitch);
    }

    #[test]
    fn test_long_pause_stays_pause() {
        let trig = normalize_trigger(TriggerType::Pause, Some(90.0), None, THRESHOLD);
        assert_eq!(trig, TriggerType::Pause);
    }

    #[test]
    fn test_help_command_forces_help_trigger() {
        let trig = normalize_trigger(
            TriggerType::ManualUpload,
            Some(0.0),
            Some("/help stuck on step 3"),
            THRESHOLD,
        );
        assert_eq!(trig, TriggerType::HelpRequest);
    }

    #[test]
    fn test_help_command_case_and_whitespace_insensitive() {
        let trig = normalize_trigger(TriggerType::Pause, Some(5.0), Some("  /HELP  "), THRESHOLD);
        assert_eq!(trig, TriggerType::HelpRequest);
    }

    #[test]
    fn test_pause_batcher_fires_after_threshold() {
        let start = Utc::now();
        let mut batcher = PauseBatcher::new(THRESHOLD, start);
        assert!(!batcher.should_fire(start + Duration::seconds(10)));
        assert!(batcher.should_fire(start + Duration::seconds(41)));

        batcher.mark_activity(start + Duration::seconds(41));
        assert!(!batcher.should_fire(start + Duration::seconds(50)));
    }
}
