use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Supported evaluation windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
}

impl TimeWindow {
    /// All windows, shortest first
    pub const ALL: [TimeWindow; 8] = [
        TimeWindow::OneMinute,
        TimeWindow::ThreeMinutes,
        TimeWindow::FiveMinutes,
        TimeWindow::FifteenMinutes,
        TimeWindow::ThirtyMinutes,
        TimeWindow::OneHour,
        TimeWindow::TwoHours,
        TimeWindow::FourHours,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::OneMinute => "1m",
            TimeWindow::ThreeMinutes => "3m",
            TimeWindow::FiveMinutes => "5m",
            TimeWindow::FifteenMinutes => "15m",
            TimeWindow::ThirtyMinutes => "30m",
            TimeWindow::OneHour => "1h",
            TimeWindow::TwoHours => "2h",
            TimeWindow::FourHours => "4h",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            TimeWindow::OneMinute => 60,
            TimeWindow::ThreeMinutes => 180,
            TimeWindow::FiveMinutes => 300,
            TimeWindow::FifteenMinutes => 900,
            TimeWindow::ThirtyMinutes => 1_800,
            TimeWindow::OneHour => 3_600,
            TimeWindow::TwoHours => 7_200,
            TimeWindow::FourHours => 14_400,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Parse a period label such as `"5m"` or `"1h"`
    pub fn parse(raw: &str) -> Option<Self> {
        let label = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|w| w.as_str() == label)
    }

    /// Map a window given in seconds to the smallest bucket that covers it.
    ///
    /// Anything longer than four hours maps to four hours.
    pub fn from_seconds(seconds: u64) -> Self {
        Self::ALL
            .into_iter()
            .find(|w| seconds <= w.seconds() as u64)
            .unwrap_or(TimeWindow::FourHours)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!(TimeWindow::parse("5m"), Some(TimeWindow::FiveMinutes));
        assert_eq!(TimeWindow::parse("1H"), Some(TimeWindow::OneHour));
        assert_eq!(TimeWindow::parse("7m"), None);
    }

    #[test]
    fn test_from_seconds_rounds_up() {
        assert_eq!(TimeWindow::from_seconds(0), TimeWindow::OneMinute);
        assert_eq!(TimeWindow::from_seconds(60), TimeWindow::OneMinute);
        assert_eq!(TimeWindow::from_seconds(61), TimeWindow::ThreeMinutes);
        assert_eq!(TimeWindow::from_seconds(300), TimeWindow::FiveMinutes);
        assert_eq!(TimeWindow::from_seconds(86_400), TimeWindow::FourHours);
    }

    #[test]
    fn test_windows_are_sorted() {
        for pair in TimeWindow::ALL.windows(2) {
            assert!(pair[0].seconds() < pair[1].seconds());
            assert!(pair[0] < pair[1]);
        }
    }
}
