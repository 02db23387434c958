use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{Metric, Operator, TimeWindow};

/// Boolean combinator of a composite node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "and" | "all" => Some(Logic::And),
            "or" | "any" => Some(Logic::Or),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

/// A single comparison: `metric over time_window <operator> threshold`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafCondition {
    pub metric: Metric,
    pub operator: Operator,
    pub threshold: f64,
    pub time_window: TimeWindow,
}

impl LeafCondition {
    pub fn new(metric: Metric, operator: Operator, threshold: f64, time_window: TimeWindow) -> Self {
        Self {
            metric,
            operator,
            threshold,
            time_window,
        }
    }

    /// Key under which this leaf's value is reported, e.g. `oi_delta_percent@5m`
    pub fn label(&self) -> String {
        format!("{}@{}", self.metric, self.time_window)
    }
}

/// A node that could not be understood when the rule was loaded
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRule {
    pub reason: String,
    /// The node as it was persisted, kept so it serializes back unchanged
    pub raw: Value,
}

/// Recursive trigger-condition tree.
///
/// Trees are built once from persisted JSON and never mutated, so they are
/// finite and acyclic by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum TriggerCondition {
    Leaf(LeafCondition),
    Composite {
        logic: Logic,
        conditions: Vec<TriggerCondition>,
    },
    Malformed(MalformedRule),
}

impl TriggerCondition {
    pub fn leaf(metric: Metric, operator: Operator, threshold: f64, window: TimeWindow) -> Self {
        TriggerCondition::Leaf(LeafCondition::new(metric, operator, threshold, window))
    }

    /// AND of all children. An empty child list yields a malformed node.
    pub fn all(conditions: Vec<TriggerCondition>) -> Self {
        Self::composite(Logic::And, conditions)
    }

    /// OR of all children. An empty child list yields a malformed node.
    pub fn any(conditions: Vec<TriggerCondition>) -> Self {
        Self::composite(Logic::Or, conditions)
    }

    fn composite(logic: Logic, conditions: Vec<TriggerCondition>) -> Self {
        if conditions.is_empty() {
            return TriggerCondition::Malformed(MalformedRule {
                reason: "composite condition has no children".to_string(),
                raw: json!({ "logic": logic.as_str(), "conditions": [] }),
            });
        }
        TriggerCondition::Composite { logic, conditions }
    }

    /// Parse a persisted condition node. Never fails: anything that cannot be
    /// understood becomes a [`TriggerCondition::Malformed`] node.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return malformed(value, "condition must be a JSON object");
        };

        if obj.contains_key("conditions") {
            parse_composite(value, obj)
        } else {
            parse_leaf(value, obj)
        }
    }

    /// Serialize back to the persisted JSON shape
    pub fn to_json(&self) -> Value {
        match self {
            TriggerCondition::Leaf(leaf) => json!({
                "metric": leaf.metric.as_str(),
                "operator": leaf.operator.as_str(),
                "threshold": leaf.threshold,
                "time_window": leaf.time_window.as_str(),
            }),
            TriggerCondition::Composite { logic, conditions } => json!({
                "logic": logic.as_str(),
                "conditions": conditions.iter().map(|c| c.to_json()).collect::<Vec<_>>(),
            }),
            TriggerCondition::Malformed(rule) => rule.raw.clone(),
        }
    }

    /// All well-formed leaves in the tree, depth-first
    pub fn leaves(&self) -> Vec<&LeafCondition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafCondition>) {
        match self {
            TriggerCondition::Leaf(leaf) => out.push(leaf),
            TriggerCondition::Composite { conditions, .. } => {
                for child in conditions {
                    child.collect_leaves(out);
                }
            }
            TriggerCondition::Malformed(_) => {}
        }
    }

    /// Reasons for every malformed node in the tree
    pub fn malformed_reasons(&self) -> Vec<String> {
        match self {
            TriggerCondition::Leaf(_) => Vec::new(),
            TriggerCondition::Composite { conditions, .. } => conditions
                .iter()
                .flat_map(|c| c.malformed_reasons())
                .collect(),
            TriggerCondition::Malformed(rule) => vec![rule.reason.clone()],
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.malformed_reasons().is_empty()
    }

    pub fn depth(&self) -> usize {
        match self {
            TriggerCondition::Composite { conditions, .. } => {
                1 + conditions.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
            _ => 1,
        }
    }
}

impl From<Value> for TriggerCondition {
    fn from(value: Value) -> Self {
        TriggerCondition::from_json(&value)
    }
}

impl From<TriggerCondition> for Value {
    fn from(condition: TriggerCondition) -> Self {
        condition.to_json()
    }
}

fn malformed(raw: &Value, reason: impl Into<String>) -> TriggerCondition {
    TriggerCondition::Malformed(MalformedRule {
        reason: reason.into(),
        raw: raw.clone(),
    })
}

fn parse_composite(raw: &Value, obj: &Map<String, Value>) -> TriggerCondition {
    let logic = match obj.get("logic").and_then(Value::as_str) {
        Some(s) => match Logic::parse(s) {
            Some(logic) => logic,
            None => return malformed(raw, format!("unknown logic '{}'", s)),
        },
        None => return malformed(raw, "composite condition is missing 'logic'"),
    };

    let Some(children) = obj.get("conditions").and_then(Value::as_array) else {
        return malformed(raw, "'conditions' must be an array");
    };
    if children.is_empty() {
        return malformed(raw, "composite condition has no children");
    }

    TriggerCondition::Composite {
        logic,
        conditions: children.iter().map(TriggerCondition::from_json).collect(),
    }
}

fn parse_leaf(raw: &Value, obj: &Map<String, Value>) -> TriggerCondition {
    let metric = match obj.get("metric").and_then(Value::as_str) {
        Some(s) => match Metric::parse(s) {
            Some(metric) => metric,
            None => return malformed(raw, format!("unknown metric '{}'", s)),
        },
        None => return malformed(raw, "leaf condition is missing 'metric'"),
    };

    let operator = match obj.get("operator").and_then(Value::as_str) {
        Some(s) => match Operator::parse(s) {
            Some(op) => op,
            None => return malformed(raw, format!("unknown operator '{}'", s)),
        },
        None => return malformed(raw, "leaf condition is missing 'operator'"),
    };

    let threshold = match obj.get("threshold").and_then(Value::as_f64) {
        Some(t) if t.is_finite() => t,
        Some(_) => return malformed(raw, "threshold must be finite"),
        None => return malformed(raw, "leaf condition is missing a numeric 'threshold'"),
    };

    // Missing window defaults to one minute
    let time_window = match obj.get("time_window") {
        None | Some(Value::Null) => TimeWindow::OneMinute,
        Some(Value::String(s)) => match TimeWindow::parse(s) {
            Some(w) => w,
            None => return malformed(raw, format!("unknown time window '{}'", s)),
        },
        Some(Value::Number(n)) => match n.as_u64() {
            Some(secs) => TimeWindow::from_seconds(secs),
            None => return malformed(raw, format!("invalid time window '{}'", n)),
        },
        Some(other) => return malformed(raw, format!("invalid time window '{}'", other)),
    };

    TriggerCondition::leaf(metric, operator, threshold, time_window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_leaf() {
        let condition = TriggerCondition::from_json(&json!({
            "metric": "oi_delta_percent",
            "operator": "abs_greater_than",
            "threshold": 5,
            "time_window": "5m"
        }));

        assert_eq!(
            condition,
            TriggerCondition::leaf(
                Metric::OiDeltaPercent,
                Operator::AbsGreaterThan,
                5.0,
                TimeWindow::FiveMinutes
            )
        );
    }

    #[test]
    fn test_parse_numeric_window_and_symbolic_operator() {
        let condition = TriggerCondition::from_json(&json!({
            "metric": "funding_rate",
            "operator": ">",
            "threshold": 0.0001,
            "time_window": 240
        }));

        let TriggerCondition::Leaf(leaf) = condition else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.operator, Operator::GreaterThan);
        assert_eq!(leaf.time_window, TimeWindow::FiveMinutes);
    }

    #[test]
    fn test_parse_nested_composite() {
        let condition = TriggerCondition::from_json(&json!({
            "logic": "AND",
            "conditions": [
                {"metric": "cvd", "operator": "greater_than", "threshold": 1000, "time_window": "15m"},
                {
                    "logic": "or",
                    "conditions": [
                        {"metric": "depth_ratio", "operator": "less_than", "threshold": 0.5, "time_window": "1m"},
                        {"metric": "order_imbalance", "operator": "abs_gt", "threshold": 0.3, "time_window": "1m"}
                    ]
                }
            ]
        }));

        assert!(condition.is_well_formed());
        assert_eq!(condition.depth(), 3);
        assert_eq!(condition.leaves().len(), 3);
    }

    #[test]
    fn test_unknown_fields_become_malformed_nodes() {
        let condition = TriggerCondition::from_json(&json!({
            "logic": "OR",
            "conditions": [
                {"metric": "social_hype", "operator": ">", "threshold": 1},
                {"metric": "cvd", "operator": "roughly", "threshold": 1},
                {"metric": "cvd", "operator": ">", "threshold": 1, "time_window": "7m"},
                {"metric": "cvd", "operator": ">", "threshold": 1}
            ]
        }));

        let reasons = condition.malformed_reasons();
        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].contains("social_hype"));
        assert!(reasons[1].contains("roughly"));
        assert!(reasons[2].contains("7m"));
        // The valid sibling survives
        assert_eq!(condition.leaves().len(), 1);
    }

    #[test]
    fn test_empty_composite_is_malformed() {
        let parsed = TriggerCondition::from_json(&json!({"logic": "AND", "conditions": []}));
        assert!(!parsed.is_well_formed());

        let built = TriggerCondition::any(vec![]);
        assert!(matches!(built, TriggerCondition::Malformed(_)));
    }

    #[test]
    fn test_serde_round_trip_preserves_malformed_raw() {
        let raw = json!({"metric": "unknown", "operator": ">", "threshold": 1});
        let condition: TriggerCondition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&condition).unwrap(), raw);
    }

    #[test]
    fn test_leaf_label() {
        let leaf = LeafCondition::new(Metric::Cvd, Operator::GreaterThan, 1.0, TimeWindow::OneHour);
        assert_eq!(leaf.label(), "cvd@1h");
    }
}
