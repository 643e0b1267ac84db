use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{RateLimit, ThrottlerError, log::TaskLog};

/// Tunables shared by every limit a [`Throttler`] enforces.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlerOptions {
  /// How long to sleep between admission polls once a limit is found
  /// to be at capacity.
  pub retry_interval: Duration,
  /// Fraction in `[0.0, 1.0)` reserved from every limit's cap at
  /// admission-check time.
  pub safety_margin_pct: f64,
  /// Fraction in `1..=100` applied once, at construction, to every
  /// configured limit's `limit` field.
  pub limits_share_percentage: u32,
}

impl Default for ThrottlerOptions {
  fn default() -> Self {
    Self {
      retry_interval: Duration::from_millis(100),
      safety_margin_pct: 0.05,
      limits_share_percentage: 100,
    }
  }
}

/// The resolved set of limits a particular `limit_id` charges against:
/// the primary limit itself, paired with its default weight, followed
/// by every linked limit that resolved, paired with its edge weight.
#[derive(Debug)]
pub struct RelatedLimits<'a> {
  pub primary: &'a RateLimit,
  pub related: Vec<(&'a RateLimit, u64)>,
}

/// One `(limit_id, time_interval, cap, charge_weight)` tuple the
/// admission loop must satisfy before it may log a charge. Owned
/// (rather than borrowed from the throttler) so it can be carried
/// across the `.await` points in [`Throttler::execute_task_cancellable`]
/// without entangling the loop in the throttler's own lifetime.
struct Charge {
  limit_id: String,
  time_interval: Duration,
  cap: u64,
  weight: u64,
}

/// A client-side sliding-window rate limiter.
///
/// Construct one with [`Throttler::new`], share it behind the returned
/// `Arc` across every task that needs to respect the same limits, and
/// call [`Throttler::execute_task`] with a limit id before entering a
/// critical section (typically: before issuing an outbound HTTP or
/// WebSocket call). See the crate-level docs for the full admission
/// algorithm.
#[derive(Debug)]
pub struct Throttler {
  rate_limits: HashMap<String, RateLimit>,
  rate_limit_order: Vec<String>,
  task_logs: Mutex<TaskLog>,
  retry_interval: Duration,
  safety_margin_pct: f64,
  limits_share_percentage: u32,
}

impl Throttler {
  /// Validates `rate_limits` and `options`, scales every limit's
  /// `limit` field by `options.limits_share_percentage`, and returns a
  /// throttler ready to admit callers.
  ///
  /// # Errors
  ///
  /// [`ThrottlerError::Config`] if `limit_id`s are not unique, if
  /// `limits_share_percentage` is not in `1..=100`, or if
  /// `safety_margin_pct` is not in `[0.0, 1.0)`.
  pub fn new(
    rate_limits: Vec<RateLimit>,
    options: ThrottlerOptions,
  ) -> Result<Arc<Self>, ThrottlerError> {
    if !(1..=100).contains(&options.limits_share_percentage) {
      return Err(ThrottlerError::Config(format!(
        "limits_share_percentage must be in 1..=100, got {}",
        options.limits_share_percentage
      )));
    }
    if !(0.0..1.0).contains(&options.safety_margin_pct) {
      return Err(ThrottlerError::Config(format!(
        "safety_margin_pct must be in [0.0, 1.0), got {}",
        options.safety_margin_pct
      )));
    }

    let mut rate_limit_order = Vec::with_capacity(rate_limits.len());
    let mut effective = HashMap::with_capacity(rate_limits.len());
    for limit in rate_limits {
      if limit.limit_id.is_empty() {
        return Err(ThrottlerError::Config(
          "limit_id must not be empty".into(),
        ));
      }
      let scaled = limit.scaled(options.limits_share_percentage);
      if effective.insert(scaled.limit_id.clone(), scaled).is_some() {
        return Err(ThrottlerError::Config(format!(
          "duplicate limit_id '{}'",
          limit.limit_id
        )));
      }
      rate_limit_order.push(limit.limit_id);
    }

    Ok(Arc::new(Self {
      rate_limits: effective,
      rate_limit_order,
      task_logs: Mutex::new(TaskLog::default()),
      retry_interval: options.retry_interval,
      safety_margin_pct: options.safety_margin_pct,
      limits_share_percentage: options.limits_share_percentage,
    }))
  }

  /// A fresh throttler with the same effective limits and tunables,
  /// but an empty task log. Mutating either throttler's log never
  /// affects the other.
  pub fn fork(&self) -> Arc<Self> {
    Arc::new(Self {
      rate_limits: self.rate_limits.clone(),
      rate_limit_order: self.rate_limit_order.clone(),
      task_logs: Mutex::new(TaskLog::default()),
      retry_interval: self.retry_interval,
      safety_margin_pct: self.safety_margin_pct,
      limits_share_percentage: self.limits_share_percentage,
    })
  }

  /// The effective rate limits this throttler enforces, in
  /// construction order.
  pub fn effective_limits(&self) -> Vec<&RateLimit> {
    self
      .rate_limit_order
      .iter()
      .map(|limit_id| &self.rate_limits[limit_id])
      .collect()
  }

  pub fn limits_share_percentage(&self) -> u32 {
    self.limits_share_percentage
  }

  /// Resolves `limit_id` to the primary limit plus every linked limit
  /// that exists in this throttler. Linked ids this throttler does not
  /// know about are silently skipped - they may be enforced only by a
  /// sibling throttler instance sharing the same configuration
  /// document. Returns `None` if `limit_id` itself is unknown.
  pub fn get_related_limits(
    &self,
    limit_id: &str,
  ) -> Option<RelatedLimits<'_>> {
    let primary = self.rate_limits.get(limit_id)?;
    let mut related = vec![(primary, primary.weight)];
    for link in &primary.linked_limits {
      if let Some(linked) = self.rate_limits.get(&link.limit_id) {
        related.push((linked, link.weight));
      }
    }
    Some(RelatedLimits { primary, related })
  }

  fn resolve_charges(
    &self,
    limit_id: &str,
  ) -> Result<Vec<Charge>, ThrottlerError> {
    let related = self.get_related_limits(limit_id).ok_or_else(|| {
      ThrottlerError::NoSuchLimit(limit_id.to_string())
    })?;
    Ok(
      related
        .related
        .into_iter()
        .map(|(limit, weight)| Charge {
          limit_id: limit.limit_id.clone(),
          time_interval: limit.time_interval,
          cap: limit.cap(self.safety_margin_pct),
          weight,
        })
        .collect(),
    )
  }

  /// Blocks until every limit applicable to `limit_id` (the limit
  /// itself plus its linked limits) has headroom for its weight, then
  /// logs one entry per applicable limit and returns.
  ///
  /// # Errors
  ///
  /// [`ThrottlerError::NoSuchLimit`] if `limit_id` is unknown - surfaces
  /// synchronously, before any wait. [`ThrottlerError::ImpossibleCharge`]
  /// if some applicable weight can never fit under its cap - also
  /// surfaces synchronously, on the first check.
  pub async fn execute_task(
    &self,
    limit_id: &str,
  ) -> Result<Admission, ThrottlerError> {
    self.execute_task_cancellable(limit_id, None).await
  }

  /// As [`Throttler::execute_task`], but the wait is raced against
  /// `cancel`. If `cancel` fires before admission is granted, returns
  /// [`ThrottlerError::Cancelled`] and no log entry is written.
  pub async fn execute_task_cancellable(
    &self,
    limit_id: &str,
    cancel: Option<&CancellationToken>,
  ) -> Result<Admission, ThrottlerError> {
    let charges = self.resolve_charges(limit_id)?;

    for charge in &charges {
      if charge.weight > charge.cap {
        return Err(ThrottlerError::ImpossibleCharge {
          limit_id: charge.limit_id.clone(),
          weight: charge.weight,
          cap: charge.cap,
        });
      }
    }

    loop {
      {
        let mut task_logs = self.task_logs.lock().await;
        let now = Instant::now();
        task_logs.prune(now, |limit_id| {
          self.rate_limits.get(limit_id).map(|limit| limit.time_interval)
        });

        let admits = charges.iter().all(|charge| {
          task_logs.window_sum(
            &charge.limit_id,
            now,
            charge.time_interval,
          ) + charge.weight
            <= charge.cap
        });

        if admits {
          for charge in &charges {
            task_logs.push(now, charge.limit_id.clone(), charge.weight);
          }
          tracing::trace!(
            "admitted '{limit_id}' against {} related limit(s)",
            charges.len(),
          );
          return Ok(Admission::new(limit_id.to_string()));
        }
      }

      match cancel {
        Some(token) => {
          tokio::select! {
            _ = tokio::time::sleep(self.retry_interval) => {}
            _ = token.cancelled() => {
              tracing::debug!("admission for '{limit_id}' cancelled while waiting");
              return Err(ThrottlerError::Cancelled);
            }
          }
        }
        None => tokio::time::sleep(self.retry_interval).await,
      }
    }
  }

  #[cfg(test)]
  pub(crate) async fn task_log_len(&self) -> usize {
    self.task_logs.lock().await.len()
  }

  #[cfg(test)]
  pub(crate) async fn task_log_window_sum(
    &self,
    limit_id: &str,
    time_interval: Duration,
  ) -> u64 {
    self
      .task_logs
      .lock()
      .await
      .window_sum(limit_id, Instant::now(), time_interval)
  }
}

/// A granted admission. Acquiring one (awaiting
/// [`Throttler::execute_task`]) is the only thing that can block;
/// dropping it is a no-op for correctness, but it emits a trace span
/// covering how long the caller held the critical section.
#[derive(Debug)]
pub struct Admission {
  limit_id: String,
  started: Instant,
}

impl Admission {
  fn new(limit_id: String) -> Self {
    Self {
      limit_id,
      started: Instant::now(),
    }
  }

  /// The limit id this admission was granted under.
  pub fn limit_id(&self) -> &str {
    &self.limit_id
  }
}

impl Drop for Admission {
  fn drop(&mut self) {
    tracing::trace!(
      limit_id = %self.limit_id,
      held_for = ?self.started.elapsed(),
      "admission released",
    );
  }
}
