use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 请求侧支持的 K 线周期集合。具体 Provider 是否原生支持由各 Client 自行映射
/// 到 `providerInterval`，本类型只负责表达"用户可以请求什么"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::Minute1),
            "5m" => Ok(Interval::Minute5),
            "15m" => Ok(Interval::Minute15),
            "30m" => Ok(Interval::Minute30),
            "1h" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1d" => Ok(Interval::Day1),
            other => Err(CoreError::InvalidInterval(other.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
        };
        f.write_str(s)
    }
}

/// # Summary
/// 请求侧支持的历史区间集合，由 Client 翻译为 `period1` 起始时间戳。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Range {
    Day1,
    Day5,
    Month1,
    Month3,
    Month6,
    Year1,
    Year2,
    Year5,
    Year10,
    Ytd,
    Max,
}

impl FromStr for Range {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Range::Day1),
            "5d" => Ok(Range::Day5),
            "1mo" => Ok(Range::Month1),
            "3mo" => Ok(Range::Month3),
            "6mo" => Ok(Range::Month6),
            "1y" => Ok(Range::Year1),
            "2y" => Ok(Range::Year2),
            "5y" => Ok(Range::Year5),
            "10y" => Ok(Range::Year10),
            "ytd" => Ok(Range::Ytd),
            "max" => Ok(Range::Max),
            other => Err(CoreError::InvalidRange(other.to_string())),
        }
    }
}

impl Range {
    /// # Summary
    /// 将区间枚举翻译为相对 `now` 的起始时间戳 (`period1`)。
    ///
    /// # Logic
    /// - `Ytd` 取当年 1 月 1 日 00:00:00 UTC。
    /// - `Max` 返回 Unix 纪元起点，交由 Provider 自行裁剪到其历史数据边界。
    /// - 其余区间按日历天数/年数做固定偏移，不考虑月份天数差异（与 Provider
    ///   的宽松解释保持一致）。
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Range::Day1 => now - Duration::days(1),
            Range::Day5 => now - Duration::days(5),
            Range::Month1 => now - Duration::days(30),
            Range::Month3 => now - Duration::days(90),
            Range::Month6 => now - Duration::days(182),
            Range::Year1 => now - Duration::days(365),
            Range::Year2 => now - Duration::days(365 * 2),
            Range::Year5 => now - Duration::days(365 * 5),
            Range::Year10 => now - Duration::days(365 * 10),
            Range::Ytd => now
                .date_naive()
                .with_month(1)
                .and_then(|d| d.with_day(1))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or(now),
            Range::Max => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
