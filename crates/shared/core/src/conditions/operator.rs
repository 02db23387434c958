use serde::{Deserialize, Serialize};

/// Absolute tolerance used by `equals` / `not_equals`.
///
/// Metric values are floats derived from upstream decimals, so bit-exact
/// comparison would almost never hold.
pub const EQUALITY_TOLERANCE: f64 = 1e-9;

/// Comparison applied between a windowed metric value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equals,
    NotEquals,
    /// |value| > threshold
    AbsGreaterThan,
    /// |value| < threshold
    AbsLessThan,
}

impl Operator {
    /// Parse an operator name or its symbolic alias (`>`, `abs_gt`, ...)
    pub fn parse(raw: &str) -> Option<Self> {
        let op = match raw.trim().to_ascii_lowercase().as_str() {
            "greater_than" | "gt" | ">" => Operator::GreaterThan,
            "greater_than_or_equal" | "gte" | ">=" => Operator::GreaterThanOrEqual,
            "less_than" | "lt" | "<" => Operator::LessThan,
            "less_than_or_equal" | "lte" | "<=" => Operator::LessThanOrEqual,
            "equals" | "eq" | "==" => Operator::Equals,
            "not_equals" | "ne" | "!=" => Operator::NotEquals,
            "abs_greater_than" | "abs_gt" => Operator::AbsGreaterThan,
            "abs_less_than" | "abs_lt" => Operator::AbsLessThan,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::AbsGreaterThan => "abs_greater_than",
            Operator::AbsLessThan => "abs_less_than",
        }
    }

    /// Apply the comparison. NaN never satisfies any operator.
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        if value.is_nan() || threshold.is_nan() {
            return false;
        }
        match self {
            Operator::GreaterThan => value > threshold,
            Operator::GreaterThanOrEqual => value >= threshold,
            Operator::LessThan => value < threshold,
            Operator::LessThanOrEqual => value <= threshold,
            Operator::Equals => (value - threshold).abs() < EQUALITY_TOLERANCE,
            Operator::NotEquals => (value - threshold).abs() >= EQUALITY_TOLERANCE,
            Operator::AbsGreaterThan => value.abs() > threshold,
            Operator::AbsLessThan => value.abs() < threshold,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_greater_than_is_sign_agnostic() {
        assert!(Operator::AbsGreaterThan.apply(-6.0, 5.0));
        assert!(Operator::AbsGreaterThan.apply(6.0, 5.0));
        assert!(!Operator::AbsGreaterThan.apply(4.0, 5.0));
        assert!(!Operator::AbsGreaterThan.apply(-5.0, 5.0));
    }

    #[test]
    fn test_signed_comparisons() {
        assert!(Operator::GreaterThan.apply(1.5, 1.0));
        assert!(!Operator::GreaterThan.apply(-6.0, 5.0));
        assert!(Operator::LessThan.apply(-6.0, 5.0));
        assert!(Operator::GreaterThanOrEqual.apply(5.0, 5.0));
        assert!(Operator::LessThanOrEqual.apply(5.0, 5.0));
        assert!(Operator::AbsLessThan.apply(-0.5, 1.0));
    }

    #[test]
    fn test_equals_uses_tolerance() {
        assert!(Operator::Equals.apply(0.1 + 0.2, 0.3));
        assert!(!Operator::Equals.apply(0.3001, 0.3));
        assert!(Operator::NotEquals.apply(0.3001, 0.3));
        assert!(!Operator::NotEquals.apply(0.1 + 0.2, 0.3));
    }

    #[test]
    fn test_nan_never_satisfies() {
        assert!(!Operator::NotEquals.apply(f64::NAN, 1.0));
        assert!(!Operator::LessThan.apply(f64::NAN, 1.0));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Operator::parse(">"), Some(Operator::GreaterThan));
        assert_eq!(Operator::parse("ABS_GT"), Some(Operator::AbsGreaterThan));
        assert_eq!(Operator::parse("abs_greater_than"), Some(Operator::AbsGreaterThan));
        assert_eq!(Operator::parse("=="), Some(Operator::Equals));
        assert_eq!(Operator::parse("between"), None);
    }
}
