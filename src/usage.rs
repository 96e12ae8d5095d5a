//! Time-bounded usage tracking: the sliding-window rate tracker used by the
//! LLM service, plus the per-location usage record persisted as
//! `usage.json`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A timed entry: a value tagged with the instant it was added. Entries are
/// kept in insertion order, which is also timestamp order.
struct TimedEntry {
    value: f64,
    at: Instant,
}

/// A counter whose total auto-decays as entries age past `max_seconds`.
///
/// Used by the rate-limited LLM service to enforce a moving-window token
/// budget (e.g. "no more than 4000 tokens per 60 seconds").
pub struct TimeBoundedUsageTracker {
    max_age: Duration,
    total: f64,
    entries: VecDeque<TimedEntry>,
}

impl TimeBoundedUsageTracker {
    pub fn new(max_seconds: f64) -> Self {
        Self {
            max_age: Duration::from_secs_f64(max_seconds),
            total: 0.0,
            entries: VecDeque::new(),
        }
    }

    /// Add a value to track; it contributes to `total` for `max_seconds`
    /// before being evicted.
    pub fn add(&mut self, value: f64) {
        self.entries.push_back(TimedEntry {
            value,
            at: Instant::now(),
        });
        self.total += value;
    }

    /// Sum of all entries younger than `max_seconds`. Evicts expired
    /// entries as a side effect.
    pub fn total(&mut self) -> f64 {
        self.discard_old_values();
        self.total
    }

    fn discard_old_values(&mut self) {
        let cutoff = Instant::now().checked_sub(self.max_age);
        let Some(cutoff) = cutoff else { return };
        while let Some(front) = self.entries.front() {
            if front.at < cutoff {
                self.total -= self.entries.pop_front().unwrap().value;
            } else {
                break;
            }
        }
    }
}

/// Counters for a single usage label (the default label, or a named
/// sub-label like `"document_content_validation"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounts {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
}

impl UsageCounts {
    fn add(&mut self, prompt_tokens: u64, response_tokens: u64) {
        self.requests += 1;
        self.prompt_tokens += prompt_tokens;
        self.response_tokens += response_tokens;
    }
}

/// One location's worth of usage, broken down by label, plus total wall
/// time elapsed across the location's pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationUsage {
    #[serde(flatten)]
    pub labels: HashMap<String, UsageCounts>,
    pub total_time_seconds: f64,
}

const DEFAULT_LABEL: &str = "default";

/// Per-call usage tracker, shared (behind a mutex at call sites) across the
/// services invoked while processing one location. Merged into the
/// process-wide usage record on completion.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub location: String,
    pub usage: LocationUsage,
}

impl UsageTracker {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            usage: LocationUsage::default(),
        }
    }

    /// Record a completed LLM call under `sub_label` (or the default
    /// label if `None`). Should only be called for calls that ultimately
    /// succeeded or were ignored as a non-retryable bad request — never
    /// for a failed retry attempt.
    pub fn add_call(&mut self, sub_label: Option<&str>, prompt_tokens: u64, response_tokens: u64) {
        let label = sub_label.unwrap_or(DEFAULT_LABEL).to_string();
        self.usage
            .labels
            .entry(label)
            .or_default()
            .add(prompt_tokens, response_tokens);
    }

    pub fn add_elapsed(&mut self, elapsed: Duration) {
        self.usage.total_time_seconds += elapsed.as_secs_f64();
    }
}

/// The process-wide persisted usage record, keyed by location full name.
/// Concurrent updates are serialized through the usage-recorder service
/// (single writer).
///
/// `merge` *replaces* a location's entry rather than accumulating into it:
/// callers pass a cumulative snapshot of that location's own
/// [`UsageTracker`] each time they record (e.g. `pipeline::record_usage` is
/// called more than once per location as a pipeline run progresses), so the
/// incoming snapshot already reflects every call made so far. Adding it on
/// top of the previous entry would double- (or triple-) count everything
/// the earlier snapshot already included. This mirrors the original's
/// `UsageUpdater`, which replaces a location's entry outright with "info
/// from the tracker itself" on every update, and `_record_time_and_usage`,
/// which assigns `total_time_seconds` rather than incrementing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(flatten)]
    pub by_location: HashMap<String, LocationUsage>,
}

impl UsageRecord {
    pub fn merge(&mut self, tracker: UsageTracker) {
        self.by_location.insert(tracker.location, tracker.usage);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sliding_window_evicts_old_entries() {
        let mut tracker = TimeBoundedUsageTracker::new(5.0);
        tracker.add(500.0);
        tokio::time::advance(Duration::from_secs(3)).await;
        tracker.add(200.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(tracker.total(), 700.0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tracker.total(), 200.0);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(tracker.total(), 0.0);
    }

    #[test]
    fn usage_record_merge_replaces_location_with_latest_snapshot() {
        // Mirrors the real call pattern: one location's tracker accumulates
        // across several calls, and each `merge` call hands in a cumulative
        // snapshot of that same tracker, not an independent delta.
        let mut record = UsageRecord::default();

        let mut tracker = UsageTracker::new("El Paso County, Colorado");
        tracker.add_call(None, 100, 20);
        tracker.add_call(Some("document_content_validation"), 50, 10);
        tracker.add_elapsed(Duration::from_secs_f64(1.5));
        record.merge(tracker.clone());

        tracker.add_call(None, 30, 5);
        tracker.add_elapsed(Duration::from_secs_f64(0.5));
        record.merge(tracker.clone());

        let loc = record.by_location.get("El Paso County, Colorado").unwrap();
        let default = loc.labels.get(DEFAULT_LABEL).unwrap();
        assert_eq!(default.requests, 2);
        assert_eq!(default.prompt_tokens, 130);
        assert_eq!(default.response_tokens, 25);

        let sub = loc.labels.get("document_content_validation").unwrap();
        assert_eq!(sub.requests, 1);
        assert_eq!(loc.total_time_seconds, 2.0);
    }

    #[test]
    fn usage_record_merge_keeps_other_locations_untouched() {
        let mut record = UsageRecord::default();

        let mut a = UsageTracker::new("El Paso County, Colorado");
        a.add_call(None, 100, 20);
        record.merge(a);

        let mut b = UsageTracker::new("Larimer County, Colorado");
        b.add_call(None, 10, 2);
        record.merge(b);

        assert_eq!(record.by_location.len(), 2);
        assert_eq!(
            record.by_location.get("El Paso County, Colorado").unwrap().labels[DEFAULT_LABEL].requests,
            1
        );
        assert_eq!(
            record.by_location.get("Larimer County, Colorado").unwrap().labels[DEFAULT_LABEL].requests,
            1
        );
    }
}
