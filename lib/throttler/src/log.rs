use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct TaskLogEntry {
  pub timestamp: Instant,
  pub limit_id: String,
  pub weight: u64,
}

/// The shared, append-only record of past admissions used to compute
/// in-window sums. Stores only the `limit_id` string against each
/// entry (never a reference to a [`crate::RateLimit`]) so that pruning
/// never needs anything more than the throttler's own `limit_id ->
/// RateLimit` map, and no ownership cycle between the log and the
/// limit table can arise.
#[derive(Debug, Default)]
pub(crate) struct TaskLog(VecDeque<TaskLogEntry>);

impl TaskLog {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Drops every entry whose age exceeds the `time_interval` of the
  /// limit it was logged against, as resolved by `interval_of`. An
  /// entry whose limit can no longer be resolved is dropped
  /// unconditionally - this should not happen in practice, since
  /// entries are only ever logged against limits the throttler itself
  /// validated at admission time.
  pub fn prune(
    &mut self,
    now: Instant,
    interval_of: impl Fn(&str) -> Option<Duration>,
  ) {
    self.0.retain(|entry| match interval_of(&entry.limit_id) {
      Some(time_interval) => {
        now.duration_since(entry.timestamp) <= time_interval
      }
      None => false,
    });
  }

  /// Sum of weights logged against `limit_id` whose age is at most
  /// `time_interval`.
  pub fn window_sum(
    &self,
    limit_id: &str,
    now: Instant,
    time_interval: Duration,
  ) -> u64 {
    self
      .0
      .iter()
      .filter(|entry| {
        entry.limit_id == limit_id
          && now.duration_since(entry.timestamp) <= time_interval
      })
      .map(|entry| entry.weight)
      .sum()
  }

  pub fn push(&mut self, timestamp: Instant, limit_id: String, weight: u64) {
    self.0.push_back(TaskLogEntry {
      timestamp,
      limit_id,
      weight,
    });
  }
}
