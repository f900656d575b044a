//! # Error Handling
//!
//! Typed job errors shared by processors, the processor wrapper, and the
//! enqueue path. Every variant carries a retryability decision; the wrapper
//! is the single place that turns that decision into retry or terminal state.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while validating, enqueuing, or processing a job.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Malformed job payload. Never retryable.
    #[error("invalid {job_type} payload: {message}")]
    PayloadValidation { job_type: String, message: String },

    /// Tenant active-job cap exceeded. Never retryable; the caller must wait.
    #[error("organization {organization_id} already has {active} active jobs (limit {limit})")]
    TooManyJobs {
        organization_id: Uuid,
        active: u64,
        limit: u64,
    },

    /// Platform throttling with an optional retry-after hint.
    #[error("{platform} rate limit exceeded")]
    RateLimit {
        platform: String,
        retry_after: Option<Duration>,
    },

    /// OAuth token expired. Retryable only when an automatic refresh is plausible.
    #[error("access token expired for account {account_id}")]
    TokenExpired { account_id: Uuid, refreshable: bool },

    /// Downstream service unavailable or returned a server error.
    #[error("{service} unavailable: {message}")]
    ExternalService { service: String, message: String },

    #[error("unknown job type '{job_type}'")]
    UnknownJobType { job_type: String },

    /// A lifecycle transition that the current entity state does not allow.
    #[error("{0}")]
    InvalidState(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A stale worker observed the durable record already finalized.
    #[error("job {job_id} was already finalized")]
    Cancelled { job_id: String },

    #[error("job exceeded its lock duration of {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("database error: {0}")]
    Database(String),

    /// Untyped failure; retryability is inferred from the message.
    #[error("{0}")]
    Unexpected(String),
}

impl JobError {
    pub fn payload<S: Into<String>>(job_type: &str, message: S) -> Self {
        Self::PayloadValidation {
            job_type: job_type.to_string(),
            message: message.into(),
        }
    }

    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the queue should re-deliver the job after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::PayloadValidation { .. }
            | JobError::TooManyJobs { .. }
            | JobError::UnknownJobType { .. }
            | JobError::InvalidState(_)
            | JobError::NotFound { .. }
            | JobError::Cancelled { .. } => false,
            JobError::TokenExpired { refreshable, .. } => *refreshable,
            JobError::RateLimit { .. }
            | JobError::ExternalService { .. }
            | JobError::TimedOut { .. }
            | JobError::Database(_) => true,
            JobError::Unexpected(message) => is_network_error(message),
        }
    }

    /// Explicit delay requested by the failure, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// True when only a human re-authorization can resolve the failure.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            JobError::TokenExpired {
                refreshable: false,
                ..
            }
        )
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::PayloadValidation { .. } => "PAYLOAD_VALIDATION",
            JobError::TooManyJobs { .. } => "TOO_MANY_JOBS",
            JobError::RateLimit { .. } => "RATE_LIMITED",
            JobError::TokenExpired { .. } => "TOKEN_EXPIRED",
            JobError::ExternalService { .. } => "EXTERNAL_SERVICE",
            JobError::UnknownJobType { .. } => "UNKNOWN_JOB_TYPE",
            JobError::InvalidState(_) => "INVALID_STATE",
            JobError::NotFound { .. } => "NOT_FOUND",
            JobError::Cancelled { .. } => "CANCELLED",
            JobError::TimedOut { .. } => "TIMED_OUT",
            JobError::Database(_) => "DATABASE",
            JobError::Unexpected(_) => "UNEXPECTED",
        }
    }

    /// Structured context attached to failure logs and job results.
    pub fn context(&self) -> Value {
        let mut context = json!({
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });

        let extra = match self {
            JobError::PayloadValidation { job_type, .. } => json!({ "job_type": job_type }),
            JobError::TooManyJobs {
                organization_id,
                active,
                limit,
            } => json!({
                "organization_id": organization_id,
                "active": active,
                "limit": limit,
            }),
            JobError::RateLimit {
                platform,
                retry_after,
            } => json!({
                "platform": platform,
                "retry_after_ms": retry_after.map(|d| d.as_millis() as u64),
            }),
            JobError::TokenExpired {
                account_id,
                refreshable,
            } => json!({
                "account_id": account_id,
                "requires_reauth": !refreshable,
            }),
            JobError::ExternalService { service, .. } => json!({ "service": service }),
            JobError::UnknownJobType { job_type } => json!({ "job_type": job_type }),
            JobError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            _ => Value::Null,
        };

        if let (Value::Object(base), Value::Object(extra)) = (&mut context, extra) {
            base.extend(extra);
        }
        context
    }
}

impl From<sea_orm::DbErr> for JobError {
    fn from(err: sea_orm::DbErr) -> Self {
        JobError::Database(err.to_string())
    }
}

impl From<crate::crypto::CryptoError> for JobError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        JobError::Unexpected(format!("token crypto failure: {err}"))
    }
}

fn network_error_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(econnreset|econnrefused|etimedout|enotfound|eai_again|epipe|connection (reset|refused|closed|aborted)|timed? ?out|dns|socket hang up|broken pipe|network (error|unreachable))",
            )
            .ok()
        })
        .as_ref()
}

/// Heuristic match for transient network failures in untyped error messages.
pub fn is_network_error(message: &str) -> bool {
    network_error_pattern().is_some_and(|pattern| pattern.is_match(message))
}

/// Returns true when the database rejected a write because of a unique constraint.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!JobError::payload("publish_content", "missing content_id").is_retryable());
        assert!(
            !JobError::TooManyJobs {
                organization_id: Uuid::new_v4(),
                active: 50,
                limit: 50,
            }
            .is_retryable()
        );
        assert!(
            !JobError::UnknownJobType {
                job_type: "mystery".into()
            }
            .is_retryable()
        );
        assert!(!JobError::InvalidState("cannot publish a draft".into()).is_retryable());
        assert!(
            !JobError::Cancelled {
                job_id: "k".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(
            JobError::RateLimit {
                platform: "twitter".into(),
                retry_after: Some(Duration::from_secs(30)),
            }
            .is_retryable()
        );
        assert!(JobError::external("generator", "503 Service Unavailable").is_retryable());
        assert!(JobError::Database("connection pool timed out".into()).is_retryable());
        assert!(JobError::TimedOut { seconds: 300 }.is_retryable());
    }

    #[test]
    fn token_expiry_retryability_follows_refreshability() {
        let account_id = Uuid::new_v4();
        let refreshable = JobError::TokenExpired {
            account_id,
            refreshable: true,
        };
        let needs_human = JobError::TokenExpired {
            account_id,
            refreshable: false,
        };

        assert!(refreshable.is_retryable());
        assert!(!refreshable.requires_reauthorization());
        assert!(!needs_human.is_retryable());
        assert!(needs_human.requires_reauthorization());
    }

    #[test]
    fn unexpected_errors_use_network_heuristic() {
        assert!(JobError::Unexpected("read ECONNRESET".into()).is_retryable());
        assert!(JobError::Unexpected("request timed out after 30s".into()).is_retryable());
        assert!(JobError::Unexpected("getaddrinfo ENOTFOUND api.example.com".into()).is_retryable());
        assert!(JobError::Unexpected("Connection refused (os error 111)".into()).is_retryable());
        assert!(!JobError::Unexpected("cannot read property 'id' of undefined".into()).is_retryable());
    }

    #[test]
    fn rate_limit_exposes_retry_after_hint() {
        let err = JobError::RateLimit {
            platform: "linkedin".into(),
            retry_after: Some(Duration::from_secs(90)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(90)));
        assert_eq!(JobError::external("x", "y").retry_after(), None);
    }

    #[test]
    fn context_includes_code_and_variant_fields() {
        let err = JobError::RateLimit {
            platform: "twitter".into(),
            retry_after: Some(Duration::from_secs(60)),
        };
        let context = err.context();
        assert_eq!(context["code"], "RATE_LIMITED");
        assert_eq!(context["retryable"], true);
        assert_eq!(context["platform"], "twitter");
        assert_eq!(context["retry_after_ms"], 60_000);

        let context = JobError::Database("boom".into()).context();
        assert_eq!(context["code"], "DATABASE");
        assert!(context.get("platform").is_none());
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sea_orm::DbErr::Custom(
            "duplicate".into()
        )));
        assert!(!is_unique_violation(&sea_orm::DbErr::RecordNotFound(
            "jobs".into()
        )));
    }
}
