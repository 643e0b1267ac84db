use std::time::Duration;

/// An edge from one [`RateLimit`] to another: admitting a call against
/// the owning limit additionally charges `weight` units against the
/// limit named by `limit_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedLimitWeight {
  pub limit_id: String,
  pub weight: u64,
}

impl LinkedLimitWeight {
  pub fn new(limit_id: impl Into<String>, weight: u64) -> Self {
    Self {
      limit_id: limit_id.into(),
      weight,
    }
  }
}

/// Immutable descriptor of a single sliding-window rate limit.
///
/// A `RateLimit` only describes the rule ("at most `limit` weight per
/// `time_interval`"). The throttler is what tracks whether a given
/// caller is within it.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
  /// Unique (within a throttler) identifier for this limit, eg
  /// `"account:123"` or `"endpoint:/v1/orders"`.
  pub limit_id: String,
  /// Maximum sum of weights permitted inside any window of length
  /// `time_interval`.
  pub limit: u64,
  /// Length of the sliding window.
  pub time_interval: Duration,
  /// Default weight charged against this limit when a caller admits
  /// under this limit directly (as opposed to via a linked edge, which
  /// carries its own weight).
  pub weight: u64,
  /// Other limits additionally charged whenever this one is charged.
  pub linked_limits: Vec<LinkedLimitWeight>,
}

impl RateLimit {
  /// Construct a `RateLimit` with the common case of no linked limits
  /// and a default weight of `1`.
  pub fn new(
    limit_id: impl Into<String>,
    limit: u64,
    time_interval: Duration,
  ) -> Self {
    Self {
      limit_id: limit_id.into(),
      limit,
      time_interval,
      weight: 1,
      linked_limits: Vec::new(),
    }
  }

  pub fn with_weight(mut self, weight: u64) -> Self {
    self.weight = weight;
    self
  }

  pub fn with_linked_limits(
    mut self,
    linked_limits: Vec<LinkedLimitWeight>,
  ) -> Self {
    self.linked_limits = linked_limits;
    self
  }

  /// Returns a copy of this limit with `limit` scaled down to
  /// `(limit * pct) / 100`, truncating. Used once at throttler
  /// construction to derive the *effective* limit from the configured
  /// one.
  pub(crate) fn scaled(&self, limits_share_percentage: u32) -> Self {
    let limit = (self.limit * limits_share_percentage as u64) / 100;
    Self {
      limit,
      ..self.clone()
    }
  }

  /// The effective cap after reserving `safety_margin_pct` from
  /// `limit`. A `safety_margin_pct` of `0.0` returns `limit` unchanged.
  pub(crate) fn cap(&self, safety_margin_pct: f64) -> u64 {
    let cap = self.limit as f64 * (1.0 - safety_margin_pct);
    cap.floor() as u64
  }
}
