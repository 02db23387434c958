//! Condition Evaluator
//!
//! Walks a trigger-condition tree against a metric source at a fixed
//! evaluation instant. AND stops at the first false child and OR stops at
//! the first true one. Only the leaves actually visited report a value.
//!
//! Pure with respect to the source: the same tree, symbol, instant and
//! source state always produce the same result.

use std::collections::BTreeMap;
use std::sync::Arc;
use tripwire_core::{LeafCondition, Logic, Timestamp, TriggerCondition};
use tripwire_ports::MetricSource;

/// Outcome of evaluating one condition tree for one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalResult {
    pub satisfied: bool,
    /// Values of the evaluated leaves, keyed by `metric@window`
    pub contributing_values: BTreeMap<String, f64>,
    /// Malformed nodes reached during evaluation
    pub diagnostics: Vec<String>,
}

pub struct ConditionEvaluator {
    source: Arc<dyn MetricSource>,
}

impl ConditionEvaluator {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    pub fn evaluate(&self, condition: &TriggerCondition, symbol: &str, at: Timestamp) -> EvalResult {
        let mut result = EvalResult::default();
        let satisfied = self.eval_node(condition, symbol, at, &mut result);
        result.satisfied = satisfied;
        result
    }

    fn eval_node(
        &self,
        node: &TriggerCondition,
        symbol: &str,
        at: Timestamp,
        out: &mut EvalResult,
    ) -> bool {
        match node {
            TriggerCondition::Leaf(leaf) => self.eval_leaf(leaf, symbol, at, out),
            TriggerCondition::Composite { logic, conditions } => match logic {
                Logic::And => conditions
                    .iter()
                    .all(|child| self.eval_node(child, symbol, at, out)),
                Logic::Or => conditions
                    .iter()
                    .any(|child| self.eval_node(child, symbol, at, out)),
            },
            TriggerCondition::Malformed(rule) => {
                out.diagnostics.push(rule.reason.clone());
                false
            }
        }
    }

    fn eval_leaf(
        &self,
        leaf: &LeafCondition,
        symbol: &str,
        at: Timestamp,
        out: &mut EvalResult,
    ) -> bool {
        // Unavailable data is unsatisfied, never an error
        let Some(value) = self
            .source
            .value(symbol, leaf.metric, leaf.time_window, at)
        else {
            return false;
        };
        out.contributing_values.insert(leaf.label(), value);
        leaf.operator.apply(value, leaf.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tripwire_core::{Metric, Operator, TimeWindow};

    /// Fixed values per metric; records every lookup
    #[derive(Default)]
    struct FixedSource {
        values: HashMap<Metric, f64>,
        lookups: Mutex<Vec<Metric>>,
    }

    impl FixedSource {
        fn with(values: &[(Metric, f64)]) -> Arc<Self> {
            Arc::new(Self {
                values: values.iter().copied().collect(),
                lookups: Mutex::new(Vec::new()),
            })
        }
    }

    impl MetricSource for FixedSource {
        fn value(&self, _symbol: &str, metric: Metric, _window: TimeWindow, _at: Timestamp) -> Option<f64> {
            self.lookups.lock().unwrap().push(metric);
            self.values.get(&metric).copied()
        }
    }

    fn leaf(metric: Metric, operator: Operator, threshold: f64) -> TriggerCondition {
        TriggerCondition::leaf(metric, operator, threshold, TimeWindow::FiveMinutes)
    }

    #[test]
    fn test_single_leaf_satisfied() {
        let source = FixedSource::with(&[(Metric::OiDeltaPercent, -7.0)]);
        let evaluator = ConditionEvaluator::new(source);

        let result = evaluator.evaluate(
            &leaf(Metric::OiDeltaPercent, Operator::AbsGreaterThan, 5.0),
            "BTC",
            Utc::now(),
        );

        assert!(result.satisfied);
        assert_eq!(result.contributing_values.get("oi_delta_percent@5m"), Some(&-7.0));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_missing_data_is_unsatisfied() {
        let evaluator = ConditionEvaluator::new(FixedSource::with(&[]));
        let result = evaluator.evaluate(&leaf(Metric::Cvd, Operator::LessThan, 1.0), "BTC", Utc::now());

        assert!(!result.satisfied);
        assert!(result.contributing_values.is_empty());
    }

    #[test]
    fn test_and_short_circuits_on_first_false() {
        let source = FixedSource::with(&[(Metric::Cvd, 1.0), (Metric::Oi, 10.0)]);
        let evaluator = ConditionEvaluator::new(source.clone());

        let condition = TriggerCondition::all(vec![
            leaf(Metric::Cvd, Operator::GreaterThan, 5.0),
            leaf(Metric::Oi, Operator::GreaterThan, 5.0),
        ]);
        let result = evaluator.evaluate(&condition, "BTC", Utc::now());

        assert!(!result.satisfied);
        assert_eq!(*source.lookups.lock().unwrap(), vec![Metric::Cvd]);
        assert_eq!(result.contributing_values.len(), 1);
    }

    #[test]
    fn test_or_short_circuits_on_first_true() {
        let source = FixedSource::with(&[(Metric::Cvd, 10.0), (Metric::Oi, 10.0)]);
        let evaluator = ConditionEvaluator::new(source.clone());

        let condition = TriggerCondition::any(vec![
            leaf(Metric::Cvd, Operator::GreaterThan, 5.0),
            leaf(Metric::Oi, Operator::GreaterThan, 5.0),
        ]);
        let result = evaluator.evaluate(&condition, "BTC", Utc::now());

        assert!(result.satisfied);
        assert_eq!(*source.lookups.lock().unwrap(), vec![Metric::Cvd]);
    }

    #[test]
    fn test_nested_tree() {
        let source = FixedSource::with(&[
            (Metric::Cvd, 2_000.0),
            (Metric::DepthRatio, 0.8),
            (Metric::OrderImbalance, -0.4),
        ]);
        let evaluator = ConditionEvaluator::new(source);

        let condition = TriggerCondition::from_json(&json!({
            "logic": "AND",
            "conditions": [
                {"metric": "cvd", "operator": ">", "threshold": 1000, "time_window": "15m"},
                {"logic": "OR", "conditions": [
                    {"metric": "depth_ratio", "operator": "<", "threshold": 0.5},
                    {"metric": "order_imbalance", "operator": "abs_gt", "threshold": 0.3}
                ]}
            ]
        }));
        let result = evaluator.evaluate(&condition, "BTC", Utc::now());

        assert!(result.satisfied);
        assert_eq!(result.contributing_values.len(), 3);
        assert_eq!(result.contributing_values.get("cvd@15m"), Some(&2_000.0));
    }

    #[test]
    fn test_malformed_node_is_false_with_diagnostic() {
        let source = FixedSource::with(&[(Metric::Cvd, 10.0)]);
        let evaluator = ConditionEvaluator::new(source);

        let condition = TriggerCondition::from_json(&json!({
            "logic": "OR",
            "conditions": [
                {"metric": "whale_alerts", "operator": ">", "threshold": 1},
                {"metric": "cvd", "operator": ">", "threshold": 5}
            ]
        }));
        let result = evaluator.evaluate(&condition, "BTC", Utc::now());

        // The malformed sibling is false; the valid one still decides
        assert!(result.satisfied);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].contains("whale_alerts"));

        let lone = TriggerCondition::from_json(&json!({"metric": "cvd"}));
        let result = evaluator.evaluate(&lone, "BTC", Utc::now());
        assert!(!result.satisfied);
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let source = FixedSource::with(&[(Metric::TakerBuyRatio, 0.7)]);
        let evaluator = ConditionEvaluator::new(source);
        let condition = leaf(Metric::TakerBuyRatio, Operator::GreaterThanOrEqual, 0.7);
        let at = Utc::now();

        let first = evaluator.evaluate(&condition, "SOL", at);
        let second = evaluator.evaluate(&condition, "SOL", at);
        assert_eq!(first, second);
        assert!(first.satisfied);
    }
}
