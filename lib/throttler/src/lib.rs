//! Client-side sliding-window API throttler.
//!
//! A [`Throttler`] sits in front of outbound calls (HTTP, WebSocket,
//! anything) and admits a caller into its critical section only once
//! every rate limit that applies has headroom for the call's weight.
//! Several limits can apply to one call at once through linked-limit
//! edges (eg an endpoint limit that also charges against a global
//! account limit), and each can charge a different weight.
//!
//! ```
//! use std::time::Duration;
//! use throttler::{RateLimit, Throttler, ThrottlerOptions};
//!
//! # async fn example() -> Result<(), throttler::ThrottlerError> {
//! let throttler = Throttler::new(
//!   vec![RateLimit::new("orders", 10, Duration::from_secs(1))],
//!   ThrottlerOptions::default(),
//! )?;
//!
//! let _admission = throttler.execute_task("orders").await?;
//! // ... issue the outbound call here ...
//! # Ok(())
//! # }
//! ```

mod error;
mod limit;
mod log;
mod throttler;

pub use error::ThrottlerError;
pub use limit::{LinkedLimitWeight, RateLimit};
pub use throttler::{Admission, RelatedLimits, Throttler, ThrottlerOptions};

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio_util::sync::CancellationToken;

  use super::*;

  fn limit(id: &str, limit: u64, secs: f64) -> RateLimit {
    RateLimit::new(id, limit, Duration::from_secs_f64(secs))
  }

  #[tokio::test(start_paused = true)]
  async fn single_limit_admission_below_cap() {
    // S1
    let throttler = Throttler::new(
      vec![limit("A", 10, 1.0)],
      ThrottlerOptions::default(),
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    for _ in 0..5 {
      let admission = throttler.execute_task("A").await.unwrap();
      tokio::time::sleep(Duration::from_millis(10)).await;
      drop(admission);
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(throttler.task_log_len().await, 5);
  }

  #[tokio::test(start_paused = true)]
  async fn single_limit_admission_at_cap_forces_a_wait() {
    // S2
    let throttler = Throttler::new(
      vec![limit("A", 10, 1.0)],
      ThrottlerOptions {
        safety_margin_pct: 0.0,
        retry_interval: Duration::from_millis(10),
        ..Default::default()
      },
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..15 {
      let throttler = throttler.clone();
      handles.push(tokio::spawn(async move {
        let admission = throttler.execute_task("A").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(admission);
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(throttler.task_log_len().await, 15);
  }

  #[tokio::test(start_paused = true)]
  async fn safety_margin_reduces_effective_cap() {
    // S3
    let throttler = Throttler::new(
      vec![limit("A", 10, 1.0)],
      ThrottlerOptions {
        safety_margin_pct: 0.5,
        retry_interval: Duration::from_millis(10),
        ..Default::default()
      },
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..7 {
      let throttler = throttler.clone();
      handles.push(tokio::spawn(async move {
        let admission = throttler.execute_task("A").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(admission);
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_secs(1));
  }

  #[tokio::test(start_paused = true)]
  async fn linked_limits_double_charge() {
    // S4
    let throttler = Throttler::new(
      vec![
        RateLimit::new("ep", 10, Duration::from_secs(1)).with_linked_limits(
          vec![LinkedLimitWeight::new("global", 2)],
        ),
        limit("global", 100, 60.0),
      ],
      ThrottlerOptions::default(),
    )
    .unwrap();

    for _ in 0..5 {
      drop(throttler.execute_task("ep").await.unwrap());
    }

    assert_eq!(
      throttler.task_log_window_sum("ep", Duration::from_secs(1)).await,
      5
    );
    assert_eq!(
      throttler
        .task_log_window_sum("global", Duration::from_secs(60))
        .await,
      10
    );
  }

  #[tokio::test(start_paused = true)]
  async fn unknown_id_fails_fast() {
    // S5
    let throttler = Throttler::new(
      vec![limit("A", 10, 1.0)],
      ThrottlerOptions::default(),
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let err = throttler.execute_task("B").await.unwrap_err();
    assert_eq!(err, ThrottlerError::NoSuchLimit("B".to_string()));
    assert_eq!(start.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn pruning_reclaims_slots() {
    // S6
    let throttler = Throttler::new(
      vec![limit("A", 2, 0.2)],
      ThrottlerOptions {
        retry_interval: Duration::from_millis(10),
        ..Default::default()
      },
    )
    .unwrap();

    drop(throttler.execute_task("A").await.unwrap());
    drop(throttler.execute_task("A").await.unwrap());
    assert_eq!(throttler.task_log_len().await, 2);

    tokio::time::advance(Duration::from_millis(300)).await;

    drop(throttler.execute_task("A").await.unwrap());
    drop(throttler.execute_task("A").await.unwrap());

    // The two expired entries are pruned on the next admission check,
    // leaving only the two fresh ones.
    assert_eq!(
      throttler
        .task_log_window_sum("A", Duration::from_millis(200))
        .await,
      2
    );
  }

  #[tokio::test]
  async fn impossible_charge_is_detected_synchronously() {
    // S7
    let throttler = Throttler::new(
      vec![RateLimit::new("A", 10, Duration::from_secs(1)).with_weight(20)],
      ThrottlerOptions::default(),
    )
    .unwrap();

    let err = throttler.execute_task("A").await.unwrap_err();
    assert!(matches!(err, ThrottlerError::ImpossibleCharge { .. }));
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_writes_no_log_entry() {
    // S8
    let throttler = Throttler::new(
      vec![limit("A", 1, 1.0)],
      ThrottlerOptions {
        retry_interval: Duration::from_millis(50),
        safety_margin_pct: 0.0,
        ..Default::default()
      },
    )
    .unwrap();

    // Exhaust the only slot.
    let _held = throttler.execute_task("A").await.unwrap();
    assert_eq!(throttler.task_log_len().await, 1);

    let cancel = CancellationToken::new();
    let throttler2 = throttler.clone();
    let task_cancel = cancel.clone();
    let waiting = tokio::spawn(async move {
      throttler2
        .execute_task_cancellable("A", Some(&task_cancel))
        .await
    });

    // Give the waiter a chance to register its first failed check and
    // go to sleep on the retry interval before we cancel it.
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    let result = waiting.await.unwrap();
    assert_eq!(result.unwrap_err(), ThrottlerError::Cancelled);
    assert_eq!(throttler.task_log_len().await, 1);
  }

  #[tokio::test]
  async fn fork_has_independent_empty_log() {
    // Invariant 4
    let throttler = Throttler::new(
      vec![limit("A", 10, 1.0)],
      ThrottlerOptions::default(),
    )
    .unwrap();
    drop(throttler.execute_task("A").await.unwrap());
    assert_eq!(throttler.task_log_len().await, 1);

    let forked = throttler.fork();
    assert_eq!(forked.task_log_len().await, 0);

    drop(forked.execute_task("A").await.unwrap());
    assert_eq!(forked.task_log_len().await, 1);
    assert_eq!(throttler.task_log_len().await, 1);
  }

  #[test]
  fn limits_share_percentage_scales_effective_limit() {
    // Invariant 5
    let throttler = Throttler::new(
      vec![limit("A", 200, 1.0)],
      ThrottlerOptions {
        limits_share_percentage: 25,
        ..Default::default()
      },
    )
    .unwrap();
    assert_eq!(throttler.effective_limits()[0].limit, 50);
  }

  #[test]
  fn duplicate_limit_id_is_a_config_error() {
    let err = Throttler::new(
      vec![limit("A", 10, 1.0), limit("A", 5, 1.0)],
      ThrottlerOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ThrottlerError::Config(_)));
  }

  #[test]
  fn out_of_range_options_are_config_errors() {
    assert!(matches!(
      Throttler::new(
        vec![limit("A", 10, 1.0)],
        ThrottlerOptions {
          limits_share_percentage: 0,
          ..Default::default()
        },
      )
      .unwrap_err(),
      ThrottlerError::Config(_)
    ));

    assert!(matches!(
      Throttler::new(
        vec![limit("A", 10, 1.0)],
        ThrottlerOptions {
          safety_margin_pct: 1.0,
          ..Default::default()
        },
      )
      .unwrap_err(),
      ThrottlerError::Config(_)
    ));
  }

  #[tokio::test]
  async fn unknown_linked_limit_is_silently_skipped() {
    let throttler = Throttler::new(
      vec![
        RateLimit::new("ep", 10, Duration::from_secs(1)).with_linked_limits(
          vec![LinkedLimitWeight::new("does-not-exist", 5)],
        ),
      ],
      ThrottlerOptions::default(),
    )
    .unwrap();

    let related = throttler.get_related_limits("ep").unwrap();
    assert_eq!(related.related.len(), 1);
    assert_eq!(related.related[0].0.limit_id, "ep");

    // Admission should still succeed - the unresolved link is ignored.
    drop(throttler.execute_task("ep").await.unwrap());
  }
}
