//! 定时任务领域模型

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

/// 调度容差：下一次触发时间与当前时间相差不超过 1 秒即视为到期
const TOLERANCE_MS: i64 = 1000;

/// 按 crontab 编号（0 = 周日）排列的星期名称
const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// 定时执行 run-only layer 的条目
#[derive(Clone, Debug)]
pub struct Cron {
    application: String,
    name: String,
    expression: String,
    schedule: Schedule,
    run: String,
    command: Vec<String>,
}

impl Cron {
    /// 解析 cron 表达式
    ///
    /// 支持 5 段（分钟精度，秒固定为 0）、6 段（含秒）和 7 段（含年）。
    /// 5 段表达式按 crontab 习惯解释星期字段：0 和 7 都是周日。
    pub fn new(
        application: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
        run: impl Into<String>,
        command: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let expression = expression.into();
        let invalid = |reason: String| Error::InvalidCron {
            cron: name.clone(),
            expression: expression.clone(),
            reason,
        };
        let normalized = normalize_expression(&expression).map_err(invalid)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            application: application.into(),
            name,
            expression,
            schedule,
            run: run.into(),
            command,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 目标 run-only layer
    pub fn run(&self) -> &str {
        &self.run
    }

    /// 追加到目标 layer 命令之后的参数
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// 当前时刻是否应执行
    pub fn should_execute(&self) -> bool {
        self.should_execute_at(Utc::now())
    }

    /// 下一次触发时间落在 `now` 前后 1 秒内时返回 true
    ///
    /// 调用方按约 1 秒的粒度轮询。
    pub fn should_execute_at(&self, now: DateTime<Utc>) -> bool {
        self.due_at(now).is_some()
    }

    /// 落在 `now` 前后 1 秒内的触发时间
    pub fn due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // `after` 不含起点本身，往前多留 1ms 让窗口两端对称
        let window_start = now - Duration::milliseconds(TOLERANCE_MS + 1);
        self.schedule
            .after(&window_start)
            .next()
            .filter(|next| (*next - now).num_milliseconds().abs() <= TOLERANCE_MS)
    }

    /// `now` 之后的下一次触发时间
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

/// 5 段表达式补上秒字段，并把星期字段换成名称
fn normalize_expression(expression: &str) -> std::result::Result<String, String> {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if fields.len() == 5 {
        fields[4] = crontab_weekdays(&fields[4])?;
        fields.insert(0, "0".to_string());
    }
    Ok(fields.join(" "))
}

/// crontab 星期字段（0-7，支持列表、范围和步长）转换为名称列表
///
/// `cron` crate 的星期从周日 = 1 开始编号，名称不受编号差异影响。
/// 已经使用名称的字段原样保留。
fn crontab_weekdays(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (base, step),
                _ => return Err(format!("invalid day-of-week step '{}'", item)),
            },
            None => (item, 1),
        };
        let (start, end) = match base.split_once('-') {
            _ if base == "*" => (0, 6),
            Some((from, to)) => (weekday(from)?, weekday(to)?),
            None if step > 1 => (weekday(base)?, 7),
            None => {
                let day = weekday(base)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{}'", item));
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    Ok(WEEKDAYS
        .iter()
        .zip(days)
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{}'", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap() + Duration::milliseconds(ms)
    }

    fn cron(expression: &str) -> Cron {
        Cron::new("shop", "nightly", expression, "report", Vec::new()).unwrap()
    }

    #[test]
    fn test_every_second_always_due() {
        assert!(cron("* * * * * *").should_execute());
    }

    #[test]
    fn test_within_tolerance_window() {
        let cron = cron("30 * * * * *");
        assert!(cron.should_execute_at(at(12, 0, 29, 500)));
        assert!(cron.should_execute_at(at(12, 0, 30, 0)));
        assert!(cron.should_execute_at(at(12, 0, 30, 800)));
    }

    #[test]
    fn test_due_at_reports_fire_time() {
        let cron = cron("30 * * * * *");
        assert_eq!(cron.due_at(at(12, 0, 29, 500)), Some(at(12, 0, 30, 0)));
        assert_eq!(cron.due_at(at(12, 0, 30, 900)), Some(at(12, 0, 30, 0)));
        assert_eq!(cron.due_at(at(12, 0, 20, 0)), None);
    }

    #[test]
    fn test_outside_tolerance_window() {
        let cron = cron("30 * * * * *");
        // 触发时间在 3 秒之后
        assert!(!cron.should_execute_at(at(12, 0, 27, 0)));
        // 触发时间已过去 1.5 秒
        assert!(!cron.should_execute_at(at(12, 0, 31, 500)));
    }

    #[test]
    fn test_far_future_never_due() {
        assert!(!cron("0 0 0 1 1 * 2099").should_execute());
    }

    #[test]
    fn test_five_field_expression() {
        let cron = cron("15 3 * * *");
        assert!(cron.should_execute_at(at(3, 15, 0, 300)));
        assert!(!cron.should_execute_at(at(3, 16, 0, 0)));
        assert_eq!(cron.next_after(at(3, 0, 0, 0)), Some(at(3, 15, 0, 0)));
    }

    #[test]
    fn test_tolerance_window_is_symmetric() {
        let cron = cron("30 * * * * *");
        // 触发时间恰好在 1 秒之前 / 之后
        assert_eq!(cron.due_at(at(12, 0, 31, 0)), Some(at(12, 0, 30, 0)));
        assert_eq!(cron.due_at(at(12, 0, 29, 0)), Some(at(12, 0, 30, 0)));
        assert_eq!(cron.due_at(at(12, 0, 31, 1)), None);
        assert_eq!(cron.due_at(at(12, 0, 28, 999)), None);
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        // 2024-03-01 是周五，03-03 周日，03-04 周一
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_crontab_sunday_as_zero_or_seven() {
        assert_eq!(cron("0 9 * * 0").next_after(day(1, 0)), Some(day(3, 9)));
        assert_eq!(cron("0 9 * * 7").next_after(day(1, 0)), Some(day(3, 9)));
    }

    #[test]
    fn test_crontab_monday_is_one() {
        let cron = cron("0 9 * * 1");
        assert_eq!(cron.next_after(day(1, 0)), Some(day(4, 9)));
        assert!(cron.should_execute_at(day(4, 9)));
        assert!(!cron.should_execute_at(day(3, 9)));
    }

    #[test]
    fn test_crontab_weekday_ranges_and_lists() {
        // 周一到周五，从周五上午 10 点起下一次是周一
        assert_eq!(cron("0 9 * * 1-5").next_after(day(1, 10)), Some(day(4, 9)));
        // 周五到周日（7）
        assert_eq!(cron("0 9 * * 5-7").next_after(day(1, 10)), Some(day(2, 9)));
        assert_eq!(cron("0 9 * * 0,3").next_after(day(1, 10)), Some(day(3, 9)));
        assert_eq!(cron("0 9 * * */2").next_after(day(1, 10)), Some(day(2, 9)));
        assert_eq!(cron("0 9 * * MON").next_after(day(1, 10)), Some(day(4, 9)));
    }

    #[test]
    fn test_crontab_weekday_out_of_range() {
        let result = Cron::new("shop", "broken", "0 9 * * 8", "report", Vec::new());
        assert!(matches!(result, Err(Error::InvalidCron { .. })));
        assert_eq!(crontab_weekdays("1-5").unwrap(), "MON,TUE,WED,THU,FRI");
        assert_eq!(crontab_weekdays("0,7").unwrap(), "SUN");
    }

    #[test]
    fn test_invalid_expression() {
        let result = Cron::new("shop", "broken", "every day", "report", Vec::new());
        assert!(matches!(result, Err(Error::InvalidCron { .. })));
    }
}
