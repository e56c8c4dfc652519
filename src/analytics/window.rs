//! 查询时间窗口
//!
//! 只接受 `PT<n>H` / `PT<n>M` / `PT<n>S` 形式的 ISO-8601 时长，n >= 1，且不超过 [`MAX_WINDOW_DAYS`] 天

use std::fmt;

use chrono::TimeDelta;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Hours,
    Minutes,
    Seconds,
}

impl WindowUnit {
    fn kql_suffix(&self) -> &'static str {
        match self {
            Self::Hours => "h",
            Self::Minutes => "m",
            Self::Seconds => "s",
        }
    }
}

/// 最大回溯天数
pub const MAX_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid window '{0}': expected an ISO-8601 duration like PT1H, PT30M or PT90S")]
    Malformed(String),
    #[error("window '{0}' exceeds {} days", MAX_WINDOW_DAYS)]
    TooLong(String),
}

/// 回溯时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    amount: u32,
    unit: WindowUnit,
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            amount: 1,
            unit: WindowUnit::Hours,
        }
    }
}

impl QueryWindow {
    pub fn parse(raw: &str) -> Result<Self, WindowError> {
        let shown = || crate::common::truncate_str_safe(raw, 64).to_string();
        let err = || WindowError::Malformed(shown());

        let rest = raw.strip_prefix("PT").ok_or_else(err)?;
        let (digits, unit) = match rest.as_bytes().last() {
            Some(b'H') => (&rest[..rest.len() - 1], WindowUnit::Hours),
            Some(b'M') => (&rest[..rest.len() - 1], WindowUnit::Minutes),
            Some(b'S') => (&rest[..rest.len() - 1], WindowUnit::Seconds),
            _ => return Err(err()),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let amount: u32 = digits.parse().map_err(|_| err())?;
        if amount == 0 {
            return Err(err());
        }

        let window = Self { amount, unit };
        if window.duration() > TimeDelta::days(MAX_WINDOW_DAYS) {
            return Err(WindowError::TooLong(shown()));
        }
        Ok(window)
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn unit(&self) -> WindowUnit {
        self.unit
    }

    /// 窗口时长
    pub fn duration(&self) -> TimeDelta {
        let amount = i64::from(self.amount);
        match self.unit {
            WindowUnit::Hours => TimeDelta::hours(amount),
            WindowUnit::Minutes => TimeDelta::minutes(amount),
            WindowUnit::Seconds => TimeDelta::seconds(amount),
        }
    }

    /// KQL timespan 字面量，例如 `1h`
    pub fn to_kql(&self) -> String {
        format!("{}{}", self.amount, self.unit.kql_suffix())
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            WindowUnit::Hours => 'H',
            WindowUnit::Minutes => 'M',
            WindowUnit::Seconds => 'S',
        };
        write!(f, "PT{}{}", self.amount, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_windows() {
        let w = QueryWindow::parse("PT1H").unwrap();
        assert_eq!(w, QueryWindow::default());
        assert_eq!(w.to_kql(), "1h");
        assert_eq!(w.duration(), TimeDelta::hours(1));

        let w = QueryWindow::parse("PT30M").unwrap();
        assert_eq!((w.amount(), w.unit()), (30, WindowUnit::Minutes));
        assert_eq!(w.to_kql(), "30m");
        assert_eq!(QueryWindow::parse("PT90S").unwrap().duration(), TimeDelta::seconds(90));
        assert_eq!(QueryWindow::parse("PT24H").unwrap().to_string(), "PT24H");
    }

    #[test]
    fn test_reject_malformed_windows() {
        for raw in [
            "", "PT", "PTH", "1H", "PT1D", "P1D", "pt1h", "PT1h", "PT-1H", "PT+1H", "PT1.5H",
            "PT0H", "PT 1H", "PT1H ", "PT99999999999H",
        ] {
            assert!(
                matches!(QueryWindow::parse(raw), Err(WindowError::Malformed(_))),
                "should reject {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_window_upper_bound() {
        assert_eq!(QueryWindow::parse("PT8760H").unwrap().duration(), TimeDelta::days(365));
        assert!(QueryWindow::parse("PT525600M").is_ok());

        for raw in ["PT8761H", "PT31536001S", "PT3000000000H", "PT4294967295M"] {
            assert!(
                matches!(QueryWindow::parse(raw), Err(WindowError::TooLong(_))),
                "should reject {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_reject_injection_in_window() {
        for raw in [
            "1h; FlowLogsRaw | take 10",
            "PT1H | union FlowLogsRaw",
            "PT1H;",
            "1h) | project Secret //",
        ] {
            assert!(QueryWindow::parse(raw).is_err(), "should reject {:?}", raw);
        }
    }
}
