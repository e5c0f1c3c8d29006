//! Flag evaluation.
mod detail;

pub use detail::{ErrorKind, EvaluationDetail, Reason, ReasonKind};

use crate::{
    context::DEFAULT_KIND,
    data::{Flag, FlagData, TryParse},
    logging::Logger,
    Context, Value,
};

/// Computes the variation a context receives for a flag.
///
/// The client checks readiness, context validity and the requested type around the evaluator, so
/// implementations only interpret the flag definition. Implementations must not panic; a panic is
/// reported as [`ErrorKind::Exception`].
pub trait Evaluator: Send + Sync {
    /// Evaluate `flag_key` for `context`. Every error path returns `fallback`.
    fn evaluate(
        &self,
        data: &FlagData,
        context: &Context,
        flag_key: &str,
        fallback: &Value,
    ) -> EvaluationDetail;
}

/// Evaluates the off state, individual targets and fixed fallthrough variations.
///
/// Rules, percentage rollouts and prerequisites need a full evaluation engine plugged in through
/// [`Evaluator`]. Flags using them evaluate to the fallback with [`ErrorKind::Exception`].
#[derive(Debug, Clone)]
pub struct BasicEvaluator {
    logger: Logger,
}

impl BasicEvaluator {
    #[allow(missing_docs)]
    pub fn new(logger: Logger) -> BasicEvaluator {
        BasicEvaluator { logger }
    }

    fn variation(
        &self,
        flag: &Flag,
        index: usize,
        reason: Reason,
        fallback: &Value,
    ) -> EvaluationDetail {
        match flag.variations.get(index) {
            Some(value) => EvaluationDetail {
                value: value.clone(),
                variation_index: Some(index),
                reason,
            },
            None => {
                ld_warn!(
                    self.logger,
                    "flag {} refers to variation {index} but has {} variations",
                    flag.key,
                    flag.variations.len()
                );
                EvaluationDetail::error(ErrorKind::MalformedFlag, fallback.clone())
            }
        }
    }

    fn unsupported(&self, flag: &Flag, feature: &str, fallback: &Value) -> EvaluationDetail {
        ld_warn!(
            self.logger,
            "flag {} uses {feature}, which requires a full evaluation engine",
            flag.key
        );
        EvaluationDetail::error(ErrorKind::Exception, fallback.clone())
    }
}

impl Evaluator for BasicEvaluator {
    fn evaluate(
        &self,
        data: &FlagData,
        context: &Context,
        flag_key: &str,
        fallback: &Value,
    ) -> EvaluationDetail {
        let flag = match data.flag(flag_key) {
            None => {
                ld_debug!(self.logger, "unknown flag {flag_key}");
                return EvaluationDetail::error(ErrorKind::FlagNotFound, fallback.clone());
            }
            Some(TryParse::ParseFailed(_)) => {
                ld_warn!(self.logger, "flag {flag_key} could not be parsed");
                return EvaluationDetail::error(ErrorKind::MalformedFlag, fallback.clone());
            }
            Some(TryParse::Parsed(flag)) => flag,
        };

        if !flag.on {
            return match flag.off_variation {
                Some(index) => self.variation(flag, index, Reason::Off, fallback),
                None => EvaluationDetail {
                    value: fallback.clone(),
                    variation_index: None,
                    reason: Reason::Off,
                },
            };
        }

        if !flag.prerequisites.is_empty() {
            return self.unsupported(flag, "prerequisites", fallback);
        }

        if let Some(index) = target_match(flag, context) {
            return self.variation(flag, index, Reason::TargetMatch, fallback);
        }

        if !flag.rules.is_empty() {
            return self.unsupported(flag, "rules", fallback);
        }

        match (flag.fallthrough.variation, &flag.fallthrough.rollout) {
            (Some(index), _) => self.variation(
                flag,
                index,
                Reason::Fallthrough {
                    in_experiment: false,
                },
                fallback,
            ),
            (None, Some(_)) => self.unsupported(flag, "percentage rollouts", fallback),
            (None, None) => {
                ld_warn!(self.logger, "flag {} has no fallthrough variation", flag.key);
                EvaluationDetail::error(ErrorKind::MalformedFlag, fallback.clone())
            }
        }
    }
}

/// Variation of the first target listing the context.
///
/// `contextTargets` take precedence. A `user` entry there without values stands for the legacy
/// `targets` entry with the same variation.
fn target_match(flag: &Flag, context: &Context) -> Option<usize> {
    let listed = |kind: &str, values: &[String]| {
        context
            .kind(kind)
            .is_some_and(|entry| values.iter().any(|value| value == entry.key()))
    };
    let legacy = |variation: usize| {
        flag.targets
            .iter()
            .filter(|target| target.variation == variation)
            .any(|target| listed(DEFAULT_KIND, &target.values))
    };

    if flag.context_targets.is_empty() {
        return flag
            .targets
            .iter()
            .find(|target| listed(DEFAULT_KIND, &target.values))
            .map(|target| target.variation);
    }

    flag.context_targets
        .iter()
        .find(|target| {
            let kind = target.context_kind.as_deref().unwrap_or(DEFAULT_KIND);
            if kind == DEFAULT_KIND && target.values.is_empty() {
                legacy(target.variation)
            } else {
                listed(kind, &target.values)
            }
        })
        .map(|target| target.variation)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ContextBuilder;

    fn data(flags: serde_json::Value) -> FlagData {
        serde_json::from_value(json!({ "flags": flags })).unwrap()
    }

    fn user(key: &str) -> Context {
        let mut builder = ContextBuilder::new();
        builder.add_kind("user", key).unwrap();
        builder.build()
    }

    fn evaluate(data: &FlagData, context: &Context, key: &str) -> EvaluationDetail {
        BasicEvaluator::new(Logger::disabled()).evaluate(data, context, key, &Value::from("fallback"))
    }

    #[test]
    fn missing_and_malformed_flags() {
        let data = data(json!({"broken": {"key": "broken", "on": "yes"}}));

        let detail = evaluate(&data, &user("u"), "missing");
        assert_eq!(detail.error_kind(), Some(ErrorKind::FlagNotFound));
        assert_eq!(detail.value, Value::from("fallback"));

        let detail = evaluate(&data, &user("u"), "broken");
        assert_eq!(detail.error_kind(), Some(ErrorKind::MalformedFlag));
    }

    #[test]
    fn off_flag_serves_off_variation() {
        let data = data(json!({
            "with": {"key": "with", "on": false, "offVariation": 1, "variations": ["a", "b"]},
            "without": {"key": "without", "on": false, "variations": ["a", "b"]},
        }));

        let detail = evaluate(&data, &user("u"), "with");
        assert_eq!(detail.value, Value::from("b"));
        assert_eq!(detail.variation_index, Some(1));
        assert_eq!(detail.reason, Reason::Off);

        let detail = evaluate(&data, &user("u"), "without");
        assert_eq!(detail.value, Value::from("fallback"));
        assert_eq!(detail.variation_index, None);
        assert_eq!(detail.reason, Reason::Off);
    }

    #[test]
    fn targets_match_by_kind() {
        let data = data(json!({"f": {
            "key": "f", "on": true, "variations": ["a", "b", "c"],
            "fallthrough": {"variation": 0},
            "targets": [{"values": ["alice"], "variation": 1}],
            "contextTargets": [
                {"contextKind": "org", "values": ["acme"], "variation": 2},
                {"contextKind": "user", "values": [], "variation": 1},
            ],
        }}));

        let detail = evaluate(&data, &user("alice"), "f");
        assert_eq!(detail.value, Value::from("b"));
        assert_eq!(detail.reason, Reason::TargetMatch);

        let mut builder = ContextBuilder::new();
        builder.add_kind("org", "acme").unwrap();
        builder.add_kind("user", "bob").unwrap();
        let detail = evaluate(&data, &builder.build(), "f");
        assert_eq!(detail.value, Value::from("c"));

        let detail = evaluate(&data, &user("bob"), "f");
        assert_eq!(detail.value, Value::from("a"));
        assert_eq!(
            detail.reason,
            Reason::Fallthrough {
                in_experiment: false
            }
        );
    }

    #[test]
    fn legacy_targets_apply_without_context_targets() {
        let data = data(json!({"f": {
            "key": "f", "on": true, "variations": [false, true],
            "fallthrough": {"variation": 0},
            "targets": [{"values": ["alice"], "variation": 1}],
        }}));
        assert_eq!(evaluate(&data, &user("alice"), "f").value, Value::from(true));
    }

    #[test]
    fn out_of_range_variation_is_malformed() {
        let data = data(json!({"f": {
            "key": "f", "on": true, "variations": ["a"], "fallthrough": {"variation": 4},
        }}));
        let detail = evaluate(&data, &user("u"), "f");
        assert_eq!(detail.error_kind(), Some(ErrorKind::MalformedFlag));
        assert_eq!(detail.variation_index, None);
    }

    #[test]
    fn unsupported_features_are_exceptions() {
        let data = data(json!({
            "rules": {"key": "rules", "on": true, "variations": ["a"],
                      "rules": [{"clauses": []}], "fallthrough": {"variation": 0}},
            "rollout": {"key": "rollout", "on": true, "variations": ["a"],
                        "fallthrough": {"rollout": {"variations": []}}},
            "prereq": {"key": "prereq", "on": true, "variations": ["a"],
                       "prerequisites": [{"key": "other", "variation": 0}],
                       "fallthrough": {"variation": 0}},
        }));
        for key in ["rules", "rollout", "prereq"] {
            assert_eq!(
                evaluate(&data, &user("u"), key).error_kind(),
                Some(ErrorKind::Exception),
                "{key}"
            );
        }
    }
}
