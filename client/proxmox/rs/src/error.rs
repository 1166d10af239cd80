use std::time::Duration;

/// Uniform failure semantics across all client calls.
/// A single failed call never condemns the whole instance; the
/// caller decides what each class means for scheduling.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// 401 / 403, or a failed ticket login.
  #[error("authentication rejected | {0}")]
  Auth(String),
  /// The configured connection timeout elapsed.
  #[error("call timed out after {0:?}")]
  Timeout(Duration),
  /// Transport errors and 5xx responses. Worth retrying.
  #[error("transport failure | {0}")]
  Retryable(String),
  /// 404. The entity is gone, not the instance.
  #[error("not found | {0}")]
  NotFound(String),
  /// The payload did not match the expected schema.
  #[error("malformed payload | {0}")]
  Protocol(String),
  /// Misconfiguration. Retrying cannot help.
  #[error("fatal configuration error | {0}")]
  Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn from_status(status: reqwest::StatusCode, path: &str) -> Error {
    match status.as_u16() {
      401 | 403 => Error::Auth(format!("{status} on {path}")),
      404 => Error::NotFound(path.to_string()),
      500..=599 => Error::Retryable(format!("{status} on {path}")),
      _ => Error::Fatal(format!("unexpected {status} on {path}")),
    }
  }

  pub fn from_transport(e: reqwest::Error, path: &str) -> Error {
    if e.is_timeout() {
      // reqwest's own timeout, distinct from the outer deadline.
      Error::Timeout(Duration::ZERO)
    } else if e.is_decode() {
      Error::Protocol(format!("{path} | {e}"))
    } else {
      Error::Retryable(format!("{path} | {e}"))
    }
  }

  /// Whether the orchestrator should count this against the breaker.
  pub fn is_breaker_failure(&self) -> bool {
    matches!(self, Error::Retryable(_) | Error::Timeout(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_mapping_follows_taxonomy() {
    use reqwest::StatusCode;
    assert!(matches!(
      Error::from_status(StatusCode::UNAUTHORIZED, "/x"),
      Error::Auth(_)
    ));
    assert!(matches!(
      Error::from_status(StatusCode::FORBIDDEN, "/x"),
      Error::Auth(_)
    ));
    assert!(matches!(
      Error::from_status(StatusCode::NOT_FOUND, "/x"),
      Error::NotFound(_)
    ));
    assert!(matches!(
      Error::from_status(StatusCode::BAD_GATEWAY, "/x"),
      Error::Retryable(_)
    ));
    assert!(matches!(
      Error::from_status(StatusCode::IM_A_TEAPOT, "/x"),
      Error::Fatal(_)
    ));
  }

  #[test]
  fn breaker_failures_are_retryable_and_timeout() {
    assert!(Error::Retryable("x".into()).is_breaker_failure());
    assert!(Error::Timeout(Duration::ZERO).is_breaker_failure());
    assert!(!Error::Auth("x".into()).is_breaker_failure());
    assert!(!Error::NotFound("x".into()).is_breaker_failure());
  }
}
