// 定时控制 - 暂停/恢复、每日自动开始、采集间隔

use chrono::{DateTime, DurationRound, NaiveDate, NaiveTime, Timelike, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use super::SessionError;
use crate::models::SchedulerSettings;

const SCHEDULE_PATTERN: &str = r"^([01]\d|2[0-3]):[0-5]\d$";

/// 定时控制器
///
/// 只保存状态，不涉及采集逻辑；由会话管理器在同一把锁下访问
#[derive(Debug, Clone)]
pub struct TimingController {
    paused: bool,
    scheduled_start: Option<String>,
    interval_minutes: u32,
    schedule_tolerance_minutes: u32,
    /// 最近一次定时自动恢复的日期，同一天只触发一次
    last_auto_start: Option<NaiveDate>,
}

impl Default for TimingController {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl TimingController {
    /// 根据持久化配置恢复状态，非法的定时计划会被忽略
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        let scheduled_start = settings
            .scheduled_start
            .as_deref()
            .map(str::trim)
            .filter(|s| is_valid_schedule(s))
            .map(str::to_string);

        Self {
            paused: settings.paused,
            scheduled_start,
            interval_minutes: settings.interval_minutes.max(1),
            schedule_tolerance_minutes: settings.schedule_tolerance_minutes,
            last_auto_start: None,
        }
    }

    /// 导出当前状态用于持久化
    pub fn to_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            paused: self.paused,
            scheduled_start: self.scheduled_start.clone(),
            interval_minutes: self.interval_minutes,
            schedule_tolerance_minutes: self.schedule_tolerance_minutes,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn scheduled_start(&self) -> Option<&str> {
        self.scheduled_start.as_deref()
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    /// 两轮采集之间的最小间隔
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.interval_minutes as i64)
    }

    /// 距上次采集是否已满一个间隔
    ///
    /// 按整分钟比较，节拍唤醒的毫秒级延迟不影响判断
    pub fn interval_elapsed(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        floor_to_minute(now) - floor_to_minute(last) >= self.interval()
    }

    pub fn schedule_tolerance_minutes(&self) -> u32 {
        self.schedule_tolerance_minutes
    }

    /// 设置每日自动开始时间，`None` 或空字符串表示取消
    pub fn set_schedule(&mut self, time: Option<&str>) -> Result<(), SessionError> {
        match time.map(str::trim).filter(|s| !s.is_empty()) {
            None => {
                self.scheduled_start = None;
            }
            Some(value) => {
                if !is_valid_schedule(value) {
                    return Err(SessionError::InvalidSchedule(value.to_string()));
                }
                self.scheduled_start = Some(value.to_string());
            }
        }
        self.last_auto_start = None;
        Ok(())
    }

    /// 设置采集间隔，最小为1分钟，返回实际生效的值
    pub fn set_interval(&mut self, minutes: i64) -> u32 {
        self.interval_minutes = minutes.clamp(1, u32::MAX as i64) as u32;
        self.interval_minutes
    }

    pub fn set_schedule_tolerance(&mut self, minutes: u32) {
        self.schedule_tolerance_minutes = minutes;
    }

    /// 判断本次节拍是否允许继续
    ///
    /// 暂停状态下命中每日定时计划时会自动恢复
    pub fn should_proceed(&mut self, now: DateTime<Utc>, force: bool) -> bool {
        if force || !self.paused {
            return true;
        }

        if self.schedule_matches(now) {
            info!(
                "到达定时开始时间 {}，自动恢复采集",
                self.scheduled_start.as_deref().unwrap_or_default()
            );
            self.last_auto_start = Some(now.date_naive());
            self.resume();
            return true;
        }

        false
    }

    fn schedule_matches(&self, now: DateTime<Utc>) -> bool {
        let Some(target) = self
            .scheduled_start
            .as_deref()
            .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
        else {
            return false;
        };

        if self.last_auto_start == Some(now.date_naive()) {
            return false;
        }

        // 按分钟比较，秒数忽略
        let now_minutes = now.hour() * 60 + now.minute();
        let target_minutes = target.hour() * 60 + target.minute();

        now_minutes >= target_minutes
            && now_minutes - target_minutes <= self.schedule_tolerance_minutes
    }
}

fn is_valid_schedule(value: &str) -> bool {
    static SCHEDULE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    SCHEDULE_RE
        .get_or_init(|| Regex::new(SCHEDULE_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn floor_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(chrono::Duration::minutes(1))
        .unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, second).unwrap()
    }

    fn paused_with_schedule(schedule: &str) -> TimingController {
        let mut timing = TimingController::default();
        timing.pause();
        timing.set_schedule(Some(schedule)).unwrap();
        timing
    }

    #[test]
    fn test_unpaused_always_proceeds() {
        let mut timing = TimingController::default();
        assert!(timing.should_proceed(at(3, 17, 0), false));
    }

    #[test]
    fn test_paused_without_schedule_is_gated() {
        let mut timing = TimingController::default();
        timing.pause();
        assert!(!timing.should_proceed(at(9, 0, 0), false));
        assert!(timing.is_paused());

        // 强制触发不受暂停影响，且不改变暂停状态
        assert!(timing.should_proceed(at(9, 0, 0), true));
        assert!(timing.is_paused());
    }

    #[test]
    fn test_schedule_exact_minute_resumes() {
        let mut timing = paused_with_schedule("09:00");
        assert!(timing.should_proceed(at(9, 0, 42), false));
        assert!(!timing.is_paused());
    }

    #[test]
    fn test_schedule_neighbouring_minutes_do_not_match() {
        let mut timing = paused_with_schedule("09:00");
        assert!(!timing.should_proceed(at(8, 59, 59), false));
        assert!(!timing.should_proceed(at(9, 1, 0), false));
        assert!(timing.is_paused());
    }

    #[test]
    fn test_schedule_tolerance_window() {
        let mut timing = paused_with_schedule("09:00");
        timing.set_schedule_tolerance(3);
        assert!(!timing.should_proceed(at(8, 59, 0), false));
        assert!(timing.should_proceed(at(9, 3, 0), false));
    }

    #[test]
    fn test_auto_start_once_per_day() {
        let mut timing = paused_with_schedule("09:00");
        timing.set_schedule_tolerance(10);
        assert!(timing.should_proceed(at(9, 0, 0), false));

        // 当天再次暂停后不会被同一计划重复恢复
        timing.pause();
        assert!(!timing.should_proceed(at(9, 5, 0), false));

        let next_day = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();
        assert!(timing.should_proceed(next_day, false));
    }

    #[test]
    fn test_set_schedule_validation() {
        let mut timing = TimingController::default();
        assert!(timing.set_schedule(Some("9:00")).is_err());
        assert!(timing.set_schedule(Some("24:00")).is_err());
        assert!(timing.set_schedule(Some("12:60")).is_err());

        timing.set_schedule(Some("23:59")).unwrap();
        assert_eq!(timing.scheduled_start(), Some("23:59"));

        timing.set_schedule(Some("")).unwrap();
        assert_eq!(timing.scheduled_start(), None);

        timing.set_schedule(Some("07:30")).unwrap();
        timing.set_schedule(None).unwrap();
        assert_eq!(timing.scheduled_start(), None);
    }

    #[test]
    fn test_set_interval_clamps_to_one() {
        let mut timing = TimingController::default();
        assert_eq!(timing.interval_minutes(), 5);
        assert_eq!(timing.set_interval(0), 1);
        assert_eq!(timing.set_interval(-3), 1);
        assert_eq!(timing.set_interval(10), 10);
        assert_eq!(timing.interval(), chrono::Duration::minutes(10));
    }

    #[test]
    fn test_interval_elapsed_ignores_tick_jitter() {
        let timing = TimingController::default();
        let first = at(9, 0, 0) + chrono::Duration::milliseconds(10);

        assert!(timing.interval_elapsed(first, at(9, 5, 0) + chrono::Duration::milliseconds(2)));
        assert!(!timing.interval_elapsed(first, at(9, 4, 59)));

        // 启动时的非整分钟节拍不推迟后续采集
        assert!(timing.interval_elapsed(at(9, 0, 37), at(9, 5, 0)));
    }

    #[test]
    fn test_settings_roundtrip_drops_invalid_schedule() {
        let settings = SchedulerSettings {
            paused: true,
            scheduled_start: Some("bad".to_string()),
            interval_minutes: 0,
            schedule_tolerance_minutes: 2,
        };
        let timing = TimingController::from_settings(&settings);
        assert!(timing.is_paused());
        assert_eq!(timing.scheduled_start(), None);
        assert_eq!(timing.interval_minutes(), 1);
        assert_eq!(timing.to_settings().schedule_tolerance_minutes, 2);
    }
}
