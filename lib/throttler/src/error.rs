use thiserror::Error;

/// Errors raised by a [`crate::Throttler`].
///
/// No error ever originates from the task log itself - only from
/// construction (bad configuration) or admission (an unresolvable or
/// unsatisfiable request).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThrottlerError {
  #[error("invalid throttler configuration | {0}")]
  Config(String),

  #[error("no rate limit configured with id '{0}'")]
  NoSuchLimit(String),

  #[error(
    "charge of {weight} against limit '{limit_id}' can never be admitted, effective cap is {cap}"
  )]
  ImpossibleCharge {
    limit_id: String,
    weight: u64,
    cap: u64,
  },

  #[error("admission was cancelled before it was granted")]
  Cancelled,
}
