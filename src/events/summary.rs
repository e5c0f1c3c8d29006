//! Aggregation of evaluations into summary counters.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::FeatureRequestEvent;
use crate::Value;

/// Counters of one flag variation at one flag version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Counter {
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    count: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    unknown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlagSummary {
    default: Value,
    context_kinds: BTreeSet<String>,
    #[serde(serialize_with = "counter_values")]
    counters: BTreeMap<(Option<u64>, Option<usize>), Counter>,
}

fn counter_values<S: serde::Serializer>(
    counters: &BTreeMap<(Option<u64>, Option<usize>), Counter>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(counters.values())
}

/// Body of a `summary` output event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Summary {
    start_date: i64,
    end_date: i64,
    features: BTreeMap<String, FlagSummary>,
}

/// Accumulates evaluations between flushes.
#[derive(Debug, Default)]
pub(crate) struct Summarizer {
    dates: Option<(i64, i64)>,
    features: BTreeMap<String, FlagSummary>,
}

impl Summarizer {
    pub(crate) fn summarize(&mut self, event: &FeatureRequestEvent) {
        let date = event.creation_date;
        self.dates = Some(match self.dates {
            None => (date, date),
            Some((start, end)) => (start.min(date), end.max(date)),
        });

        let flag = self
            .features
            .entry(event.key.clone())
            .or_insert_with(|| FlagSummary {
                default: event.default.clone(),
                context_kinds: BTreeSet::new(),
                counters: BTreeMap::new(),
            });
        flag.context_kinds
            .extend(event.context.kinds().map(|entry| entry.kind().to_owned()));
        flag.counters
            .entry((event.version, event.variation))
            .or_insert_with(|| Counter {
                value: event.value.clone(),
                variation: event.variation,
                version: event.version,
                count: 0,
                unknown: event.version.is_none(),
            })
            .count += 1;
    }

    /// Take the accumulated summary, leaving the summarizer empty.
    pub(crate) fn take(&mut self) -> Option<Summary> {
        let (start_date, end_date) = self.dates.take()?;
        Some(Summary {
            start_date,
            end_date,
            features: std::mem::take(&mut self.features),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Context, ContextBuilder};

    fn context(kinds: &[&str]) -> Context {
        let mut builder = ContextBuilder::new();
        for kind in kinds {
            builder.add_kind(*kind, "k").unwrap();
        }
        builder.build()
    }

    fn event(
        creation_date: i64,
        kinds: &[&str],
        version: Option<u64>,
        variation: Option<usize>,
        value: bool,
    ) -> FeatureRequestEvent {
        FeatureRequestEvent {
            creation_date,
            context: context(kinds),
            key: "f".to_owned(),
            version,
            variation,
            value: Value::from(value),
            default: Value::from(false),
            reason: None,
            track_events: false,
        }
    }

    #[test]
    fn empty_summarizer_has_no_summary() {
        assert!(Summarizer::default().take().is_none());
    }

    #[test]
    fn evaluations_are_counted_per_variation_and_version() {
        let mut summarizer = Summarizer::default();
        summarizer.summarize(&event(20, &["user"], Some(3), Some(1), true));
        summarizer.summarize(&event(10, &["org"], Some(3), Some(1), true));
        summarizer.summarize(&event(30, &["user"], Some(3), Some(0), false));
        summarizer.summarize(&event(25, &["user"], None, None, false));

        let summary = summarizer.take().unwrap();
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({
                "startDate": 10,
                "endDate": 30,
                "features": {"f": {
                    "default": false,
                    "contextKinds": ["org", "user"],
                    "counters": [
                        {"value": false, "count": 1, "unknown": true},
                        {"value": false, "variation": 0, "version": 3, "count": 1},
                        {"value": true, "variation": 1, "version": 3, "count": 2},
                    ],
                }},
            })
        );
        assert!(summarizer.take().is_none());
    }
}
