//! # Configuring the throttler
//!
//! The throttler's parameters are passed in two ways:
//! 1. Environment variables ([Env]) - the tunables
//!    (`retry_interval`, `safety_margin_pct`, `limits_share_percentage`)
//!    and the path to a rate limits file.
//! 2. A TOML configuration file ([RateLimitsFile]) - the list of rate
//!    limits themselves, which are rarely small enough to fit
//!    comfortably in an environment variable.
//!
//! The final configuration is built by [load], which combines both:
//! env vars override the tunables, and the file supplies the rate
//! limit descriptors.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use serde::Deserialize;
use throttler::{LinkedLimitWeight, RateLimit, ThrottlerOptions};

/// Environment variables read by [load]. All are optional; omitted
/// variables fall back to [`ThrottlerOptions::default`].
#[derive(Deserialize, Default)]
pub struct Env {
  /// Path to a TOML file containing a `[[rate_limits]]` array, see
  /// [RateLimitsFile]. If unset, [load] returns an empty rate limit
  /// list - the caller is then responsible for disabling the
  /// throttler path or failing startup as they see fit.
  pub throttler_rate_limits_file: Option<PathBuf>,
  /// Override [`ThrottlerOptions::retry_interval`], in milliseconds.
  pub throttler_retry_interval_ms: Option<u64>,
  /// Override [`ThrottlerOptions::safety_margin_pct`].
  pub throttler_safety_margin_pct: Option<f64>,
  /// Override [`ThrottlerOptions::limits_share_percentage`].
  pub throttler_limits_share_percentage: Option<u32>,
}

/// On-disk representation of a single [`RateLimit`]. Deserialized from
/// TOML rather than constructed directly, since `RateLimit` itself
/// keeps its `time_interval` as a validated [`Duration`] rather than a
/// raw float.
#[derive(Deserialize)]
pub struct RateLimitEntry {
  pub limit_id: String,
  pub limit: u64,
  pub time_interval_secs: f64,
  #[serde(default = "default_weight")]
  pub weight: u64,
  #[serde(default)]
  pub linked_limits: Vec<LinkedLimitEntry>,
}

#[derive(Deserialize)]
pub struct LinkedLimitEntry {
  pub limit_id: String,
  pub weight: u64,
}

fn default_weight() -> u64 {
  1
}

/// Top level shape of the TOML file named by
/// `Env::throttler_rate_limits_file`.
///
/// ```toml
/// [[rate_limits]]
/// limit_id = "orders"
/// limit = 10
/// time_interval_secs = 1.0
///
/// [[rate_limits]]
/// limit_id = "account"
/// limit = 100
/// time_interval_secs = 60.0
///
/// [[rate_limits.linked_limits]]
/// limit_id = "account"
/// weight = 2
/// ```
#[derive(Deserialize, Default)]
pub struct RateLimitsFile {
  #[serde(default)]
  pub rate_limits: Vec<RateLimitEntry>,
}

impl TryFrom<RateLimitEntry> for RateLimit {
  type Error = anyhow::Error;

  /// Fails if `time_interval_secs` is not finite and non-negative -
  /// `Duration::from_secs_f64` panics on exactly those inputs, so this
  /// is checked up front rather than let a malformed config file take
  /// the process down.
  fn try_from(entry: RateLimitEntry) -> Result<Self, Self::Error> {
    if !entry.time_interval_secs.is_finite()
      || entry.time_interval_secs < 0.0
    {
      bail!(
        "rate limit '{}' has invalid time_interval_secs {} (must be finite and >= 0.0)",
        entry.limit_id,
        entry.time_interval_secs,
      );
    }

    Ok(
      RateLimit::new(
        entry.limit_id,
        entry.limit,
        Duration::from_secs_f64(entry.time_interval_secs),
      )
      .with_weight(entry.weight)
      .with_linked_limits(
        entry
          .linked_limits
          .into_iter()
          .map(|link| LinkedLimitWeight::new(link.limit_id, link.weight))
          .collect(),
      ),
    )
  }
}

/// Reads `.env` (if present), the `THROTTLER_*` environment variables,
/// and - if `THROTTLER_RATE_LIMITS_FILE` is set - the TOML file it
/// names, and returns the rate limits and tunables ready to pass to
/// [`throttler::Throttler::new`].
pub fn load() -> anyhow::Result<(Vec<RateLimit>, ThrottlerOptions)> {
  dotenvy::dotenv().ok();

  let env: Env =
    envy::from_env().context("failed to parse throttler environment")?;

  let rate_limits = match &env.throttler_rate_limits_file {
    Some(path) => {
      let raw = std::fs::read_to_string(path).with_context(|| {
        format!("failed to read rate limits file at {path:?}")
      })?;
      let file: RateLimitsFile = toml::from_str(&raw).with_context(
        || format!("failed to parse rate limits file at {path:?}"),
      )?;
      file
        .rate_limits
        .into_iter()
        .map(RateLimit::try_from)
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| {
          format!("invalid rate limit in file at {path:?}")
        })?
    }
    None => {
      tracing::warn!(
        "THROTTLER_RATE_LIMITS_FILE not set, starting with no rate limits configured"
      );
      Vec::new()
    }
  };

  let defaults = ThrottlerOptions::default();
  let options = ThrottlerOptions {
    retry_interval: env
      .throttler_retry_interval_ms
      .map(Duration::from_millis)
      .unwrap_or(defaults.retry_interval),
    safety_margin_pct: env
      .throttler_safety_margin_pct
      .unwrap_or(defaults.safety_margin_pct),
    limits_share_percentage: env
      .throttler_limits_share_percentage
      .unwrap_or(defaults.limits_share_percentage),
  };

  Ok((rate_limits, options))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_rate_limits_file_with_linked_limits() {
    let toml = r#"
      [[rate_limits]]
      limit_id = "ep"
      limit = 10
      time_interval_secs = 1.0

      [[rate_limits.linked_limits]]
      limit_id = "global"
      weight = 2

      [[rate_limits]]
      limit_id = "global"
      limit = 100
      time_interval_secs = 60.0
    "#;

    let file: RateLimitsFile = toml::from_str(toml).unwrap();
    assert_eq!(file.rate_limits.len(), 2);

    let ep: RateLimit =
      file.rate_limits.into_iter().next().unwrap().try_into().unwrap();
    assert_eq!(ep.limit_id, "ep");
    assert_eq!(ep.weight, 1);
    assert_eq!(ep.linked_limits.len(), 1);
    assert_eq!(ep.linked_limits[0].limit_id, "global");
    assert_eq!(ep.linked_limits[0].weight, 2);
  }

  #[test]
  fn negative_time_interval_is_rejected() {
    let entry = RateLimitEntry {
      limit_id: "bad".to_string(),
      limit: 10,
      time_interval_secs: -1.0,
      weight: 1,
      linked_limits: Vec::new(),
    };
    assert!(RateLimit::try_from(entry).is_err());
  }

  #[test]
  fn non_finite_time_interval_is_rejected() {
    let entry = RateLimitEntry {
      limit_id: "bad".to_string(),
      limit: 10,
      time_interval_secs: f64::NAN,
      weight: 1,
      linked_limits: Vec::new(),
    };
    assert!(RateLimit::try_from(entry).is_err());
  }
}
