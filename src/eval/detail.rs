use serde::{Deserialize, Serialize};

use crate::Value;

/// Why an evaluation could not produce a flag variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The client is not initialized yet, or was closed.
    ClientNotReady,
    /// Flag does not exist.
    FlagNotFound,
    /// Flag variation does not match the type requested by the caller.
    WrongType,
    /// Flag definition could not be interpreted. This should normally never happen and is likely a
    /// signal that the SDK should be updated.
    MalformedFlag,
    /// The context is invalid.
    UserNotSpecified,
    /// Unexpected failure inside the evaluator.
    Exception,
    /// Any other problem.
    Unknown,
}

/// Category of an evaluation [`Reason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ReasonKind {
    Off,
    Fallthrough,
    TargetMatch,
    RuleMatch,
    PrerequisiteFailed,
    Error,
    /// Sent by a newer service; not produced by this evaluator.
    #[serde(other)]
    Unknown,
}

/// Explanation of an evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Reason {
    /// Flag is off; its off variation was served.
    Off,
    /// No target or rule matched; the fallthrough variation was served.
    Fallthrough {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        #[allow(missing_docs)]
        in_experiment: bool,
    },
    /// Context key was listed in the flag targets.
    TargetMatch,
    /// A flag rule matched.
    RuleMatch {
        #[allow(missing_docs)]
        rule_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[allow(missing_docs)]
        rule_id: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        #[allow(missing_docs)]
        in_experiment: bool,
    },
    /// A prerequisite flag did not return the required variation.
    PrerequisiteFailed {
        #[allow(missing_docs)]
        prerequisite_key: String,
    },
    /// Evaluation failed; the fallback value was served.
    Error {
        #[allow(missing_docs)]
        error_kind: ErrorKind,
    },
    /// A reason kind this version does not recognize.
    #[serde(other)]
    Unknown,
}

impl Reason {
    #[allow(missing_docs)]
    pub fn kind(&self) -> ReasonKind {
        match self {
            Reason::Off => ReasonKind::Off,
            Reason::Fallthrough { .. } => ReasonKind::Fallthrough,
            Reason::TargetMatch => ReasonKind::TargetMatch,
            Reason::RuleMatch { .. } => ReasonKind::RuleMatch,
            Reason::PrerequisiteFailed { .. } => ReasonKind::PrerequisiteFailed,
            Reason::Error { .. } => ReasonKind::Error,
            Reason::Unknown => ReasonKind::Unknown,
        }
    }

    #[allow(missing_docs)]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Reason::Error { error_kind } => Some(*error_kind),
            _ => None,
        }
    }

    /// Whether the context was enrolled in an experiment by this evaluation.
    pub fn in_experiment(&self) -> bool {
        match self {
            Reason::Fallthrough { in_experiment } | Reason::RuleMatch { in_experiment, .. } => {
                *in_experiment
            }
            _ => false,
        }
    }
}

/// Result of a flag evaluation together with its explanation.
///
/// On every error path `value` is the fallback supplied by the caller and `reason` is
/// [`Reason::Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail<T = Value> {
    #[allow(missing_docs)]
    pub value: T,
    /// Index of the served variation. `None` when the fallback was served.
    pub variation_index: Option<usize>,
    #[allow(missing_docs)]
    pub reason: Reason,
}

impl<T> EvaluationDetail<T> {
    /// Detail for a failed evaluation.
    pub fn error(error_kind: ErrorKind, fallback: T) -> EvaluationDetail<T> {
        EvaluationDetail {
            value: fallback,
            variation_index: None,
            reason: Reason::Error { error_kind },
        }
    }

    #[allow(missing_docs)]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.reason.error_kind()
    }

    #[allow(missing_docs)]
    pub fn in_experiment(&self) -> bool {
        self.reason.in_experiment()
    }

    /// Map `EvaluationDetail.value` using the `f` function.
    pub fn map<T2, F: FnOnce(T) -> T2>(self, f: F) -> EvaluationDetail<T2> {
        EvaluationDetail {
            value: f(self.value),
            variation_index: self.variation_index,
            reason: self.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reasons_serialize_like_the_service() {
        let cases = [
            (Reason::Off, json!({"kind": "OFF"})),
            (
                Reason::Fallthrough {
                    in_experiment: false,
                },
                json!({"kind": "FALLTHROUGH"}),
            ),
            (
                Reason::RuleMatch {
                    rule_index: 2,
                    rule_id: Some("r2".to_owned()),
                    in_experiment: true,
                },
                json!({"kind": "RULE_MATCH", "ruleIndex": 2, "ruleId": "r2", "inExperiment": true}),
            ),
            (
                Reason::Error {
                    error_kind: ErrorKind::FlagNotFound,
                },
                json!({"kind": "ERROR", "errorKind": "FLAG_NOT_FOUND"}),
            ),
        ];
        for (reason, expected) in cases {
            assert_eq!(serde_json::to_value(&reason).unwrap(), expected);
            assert_eq!(serde_json::from_value::<Reason>(expected).unwrap(), reason);
        }
    }

    #[test]
    fn unknown_reasons_round_trip() {
        let reason = Reason::Unknown;
        assert_eq!(serde_json::to_value(&reason).unwrap(), json!({"kind": "UNKNOWN"}));
        assert_eq!(
            serde_json::from_value::<Reason>(json!({"kind": "UNKNOWN"})).unwrap(),
            reason
        );
        assert_eq!(
            serde_json::from_value::<Reason>(json!({"kind": "BIG_SEGMENTS_STALE"})).unwrap(),
            Reason::Unknown
        );
        assert_eq!(reason.kind(), ReasonKind::Unknown);
        assert!(reason.error_kind().is_none());
        assert!(!reason.in_experiment());

        assert_eq!(serde_json::to_value(ReasonKind::Unknown).unwrap(), json!("UNKNOWN"));
        assert_eq!(
            serde_json::from_value::<ReasonKind>(json!("UNKNOWN")).unwrap(),
            ReasonKind::Unknown
        );
        assert_eq!(
            serde_json::from_value::<ReasonKind>(json!("SOMETHING_NEW")).unwrap(),
            ReasonKind::Unknown
        );
    }

    #[test]
    fn error_detail_carries_fallback() {
        let detail = EvaluationDetail::error(ErrorKind::WrongType, 7);
        assert_eq!(detail.value, 7);
        assert_eq!(detail.variation_index, None);
        assert_eq!(detail.error_kind(), Some(ErrorKind::WrongType));
        assert_eq!(detail.reason.kind(), ReasonKind::Error);
        assert!(!detail.in_experiment());
    }

    #[test]
    fn map_keeps_reason() {
        let detail = EvaluationDetail {
            value: Value::from(true),
            variation_index: Some(1),
            reason: Reason::TargetMatch,
        }
        .map(|value| value.as_bool());
        assert_eq!(detail.value, Some(true));
        assert_eq!(detail.variation_index, Some(1));
        assert_eq!(detail.reason, Reason::TargetMatch);
    }
}
