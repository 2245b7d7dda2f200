//! Event outcomes and sub-operation reports

use crate::integrations::RetryExecutor;
use crate::{Result, SyncError};
use axum::http::StatusCode;
use serde::Serialize;
use std::future::Future;
use tracing::{info, warn};

/// A failed sub-operation of a multi-call event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub operation: String,
    pub error: String,
    /// HTTP status from the tracker, if it answered
    pub status: Option<u16>,
}

/// What happened to each remote call made for one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedStep>,
    pub skipped: Vec<String>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one remote call through the retry executor and record the result
    ///
    /// Failures are logged and recorded, never returned; the caller keeps
    /// going with the remaining calls.
    pub async fn attempt<T, F, Fut>(
        &mut self,
        retry: &RetryExecutor,
        operation: &str,
        call: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match retry.execute(operation, call).await {
            Ok(value) => {
                self.succeeded.push(operation.to_string());
                Some(value)
            }
            Err(e) => {
                warn!(operation = operation, error = %e, "Sync sub-operation failed");
                self.failed.push(FailedStep {
                    operation: operation.to_string(),
                    error: e.to_string(),
                    status: e.status(),
                });
                None
            }
        }
    }

    /// Record a call that already succeeded outside [`attempt`](Self::attempt)
    pub fn record_success(&mut self, operation: &str) {
        self.succeeded.push(operation.to_string());
    }

    /// Record a deliberately skipped step
    pub fn skip(&mut self, operation: &str, reason: &str) {
        info!(operation = operation, reason = reason, "Sync sub-operation skipped");
        self.skipped.push(format!("{}: {}", operation, reason));
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Success when nothing failed or was skipped, partial when something
    /// failed or was skipped but something else succeeded
    ///
    /// When every remote call failed the event as a whole failed: not found if
    /// any call saw a 404, bad request otherwise.
    pub fn into_outcome(self) -> Outcome {
        if !self.has_failures() {
            return if self.skipped.is_empty() {
                Outcome::Success(self)
            } else {
                Outcome::Partial(self)
            };
        }
        if !self.succeeded.is_empty() {
            return Outcome::Partial(self);
        }

        let summary = self
            .failed
            .iter()
            .map(|f| format!("{}: {}", f.operation, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        if self.failed.iter().any(|f| f.status == Some(404)) {
            Outcome::NotFound(summary)
        } else {
            Outcome::BadRequest(summary)
        }
    }
}

/// Terminal state of one inbound webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(SyncReport),
    /// Some sub-operations failed after the primary change was applied
    Partial(SyncReport),
    /// Nothing to do for this event
    NoOp(String),
    /// The event is an echo of our own write
    Conflict(String),
    /// A required cross-reference is missing
    Unprocessable(String),
    /// The referenced remote entity is gone
    NotFound(String),
    BadRequest(String),
}

impl Outcome {
    pub fn no_op(reason: impl Into<String>) -> Self {
        Outcome::NoOp(reason.into())
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Outcome::Conflict(reason.into())
    }

    pub fn unprocessable(reason: impl Into<String>) -> Self {
        Outcome::Unprocessable(reason.into())
    }

    /// Outcome for a handler that failed outright
    pub fn from_error(error: &SyncError) -> Self {
        if error.is_not_found() {
            Outcome::NotFound(error.to_string())
        } else {
            Outcome::BadRequest(error.to_string())
        }
    }

    /// HTTP status answered to the webhook sender
    pub fn status_code(&self) -> StatusCode {
        match self {
            Outcome::Success(_) | Outcome::Partial(_) | Outcome::NoOp(_) => StatusCode::ACCEPTED,
            Outcome::Conflict(_) => StatusCode::CONFLICT,
            Outcome::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Outcome::NotFound(_) => StatusCode::NOT_FOUND,
            Outcome::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Partial(_) => "partial",
            Outcome::NoOp(_) => "no-op",
            Outcome::Conflict(_) => "conflict",
            Outcome::Unprocessable(_) => "unprocessable",
            Outcome::NotFound(_) => "not-found",
            Outcome::BadRequest(_) => "bad-request",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) | Outcome::Partial(_) => None,
            Outcome::NoOp(s)
            | Outcome::Conflict(s)
            | Outcome::Unprocessable(s)
            | Outcome::NotFound(s)
            | Outcome::BadRequest(s) => Some(s),
        }
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Outcome::Success(r) | Outcome::Partial(r) => Some(r),
            _ => None,
        }
    }

    /// Safe for the sender to consider the event handled
    pub fn is_accepted(&self) -> bool {
        self.status_code() == StatusCode::ACCEPTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::RetryConfig;

    #[test]
    fn test_status_codes() {
        assert_eq!(Outcome::Success(SyncReport::new()).status_code(), StatusCode::ACCEPTED);
        assert_eq!(Outcome::no_op("x").status_code(), StatusCode::ACCEPTED);
        assert_eq!(Outcome::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Outcome::unprocessable("x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Outcome::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Outcome::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_from_error() {
        let gone = SyncError::remote("Jira", 404, "Issue does not exist");
        assert_eq!(Outcome::from_error(&gone).label(), "not-found");

        let bad = SyncError::remote("Jira", 400, "field invalid");
        assert_eq!(Outcome::from_error(&bad).label(), "bad-request");

        let storage = SyncError::Storage("locked".into());
        assert_eq!(Outcome::from_error(&storage).status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report_keeps_going_after_failure() {
        let retry = RetryExecutor::new(RetryConfig::quick());
        let mut report = SyncReport::new();

        let first: Option<()> = report
            .attempt(&retry, "labels", || async {
                Err(SyncError::remote("GitHub", 422, "bad label"))
            })
            .await;
        let second = report.attempt(&retry, "title", || async { Ok(7) }).await;
        report.skip("assignee", "unmapped user");

        assert!(first.is_none());
        assert_eq!(second, Some(7));
        assert_eq!(report.succeeded, vec!["title"]);
        assert_eq!(report.failed[0].operation, "labels");
        assert_eq!(report.skipped.len(), 1);

        let outcome = report.into_outcome();
        assert_eq!(outcome.label(), "partial");
        assert!(outcome.is_accepted());
    }

    #[tokio::test]
    async fn test_report_with_only_failures_is_not_accepted() {
        let retry = RetryExecutor::new(RetryConfig::quick());
        let mut report = SyncReport::new();

        let _: Option<()> = report
            .attempt(&retry, "github.update_issue", || async {
                Err(SyncError::remote("GitHub", 404, "Not Found"))
            })
            .await;

        let outcome = report.into_outcome();
        assert_eq!(outcome.label(), "not-found");
        assert!(!outcome.is_accepted());
        assert_eq!(SyncReport::new().into_outcome().label(), "success");

        let mut skipped = SyncReport::new();
        skipped.skip("jira.assignee", "no Jira account mapped for octocat");
        assert_eq!(skipped.into_outcome().label(), "partial");
    }
}
