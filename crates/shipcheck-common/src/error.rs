//! Error types for shipcheck
//!
//! Errors are structured with fields so a failed scenario report can show
//! exactly what was expected, what was observed, and which resource it was.
//! Each variant maps to one failure category of the harness: submission,
//! timeout, cancellation, outcome mismatch, and cleanup failure, plus the
//! ambient categories for the Kubernetes API, validation, templates and internal failures.

use std::time::Duration;

use thiserror::Error;

/// Main error type for shipcheck operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration or input (poll budgets, patterns, labels)
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field or flag, if known
        field: Option<String>,
    },

    /// A template document could not be read. Aborts the whole run.
    #[error("template error [{path}]: {message}")]
    Template {
        /// Path of the template document
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Creating a resource on the platform failed
    #[error("submission error for {kind}/{name}: {message}")]
    Submission {
        /// Resource kind (Build, BuildRun)
        kind: String,
        /// Resource name
        name: String,
        /// Description of what failed
        message: String,
        /// Whether the failure is a transient platform condition
        retryable: bool,
    },

    /// Reading platform state failed in a way that aborted the operation
    #[error("platform error [{operation}]: {message}")]
    Platform {
        /// Operation being performed (get-buildrun, list-serviceaccounts, ...)
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether the failure is a transient platform condition
        transient: bool,
    },

    /// No terminal state was observed within the poll budget
    #[error(
        "timed out after {waited:?} waiting for {resource}; last observed: {last_observed}{}",
        .last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
    )]
    Timeout {
        /// Description of what was being waited on
        resource: String,
        /// Time spent waiting
        waited: Duration,
        /// Last non-terminal state observed
        last_observed: String,
        /// Last transient error seen while polling, if any
        last_error: Option<String>,
    },

    /// Waiting was aborted by an external cancellation signal
    #[error("cancelled after {waited:?} waiting for {resource}")]
    Cancelled {
        /// Description of what was being waited on
        resource: String,
        /// Time spent waiting before cancellation
        waited: Duration,
    },

    /// A terminal state was observed but did not match the expectation
    #[error(
        "outcome mismatch for {resource}: expected {expected}, got {actual_phase} \
         (reason: {actual_reason}, message: {actual_message:?})"
    )]
    OutcomeMismatch {
        /// Resource whose outcome was checked
        resource: String,
        /// Human-readable expected outcome
        expected: String,
        /// Observed terminal phase
        actual_phase: String,
        /// Observed condition reason
        actual_reason: String,
        /// Observed condition message
        actual_message: String,
    },

    /// Ephemeral principals were still present after the cleanup budget
    #[error("cleanup failure for {resource}: {} still present after {waited:?}: {}", .remaining.len(), .remaining.join(", "))]
    CleanupFailure {
        /// BuildRun whose principals were checked
        resource: String,
        /// Names of principals that still exist
        remaining: Vec<String>,
        /// Time spent waiting for removal
        waited: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a template error for the given path
    pub fn template(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a non-retryable submission error
    pub fn submission(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Submission {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a retryable submission error
    pub fn submission_transient(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Submission {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a platform error, classifying the underlying kube error
    pub fn platform(operation: impl Into<String>, source: &kube::Error) -> Self {
        Self::Platform {
            operation: operation.into(),
            message: source.to_string(),
            transient: is_transient_kube_error(source),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Transient errors are retried inside the owning poll budget and never
    /// surface as scenario failures on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube { source } => is_transient_kube_error(source),
            Self::Submission { retryable, .. } => *retryable,
            Self::Platform { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether a failed write may still have been persisted.
    ///
    /// True only when the request could have reached storage: transport
    /// failures, server-side 5xx and timeouts. Throttling and admission
    /// rejections (429, 403, 404) never wrote anything.
    pub fn may_have_landed(&self) -> bool {
        matches!(self, Self::Kube { source } if is_ambiguous_kube_error(source))
    }

    /// Whether this is a Kubernetes 409 AlreadyExists response
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Kube { source } if is_already_exists(source))
    }

    /// Whether this error must abort the whole run rather than one scenario
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Template { .. })
    }

    /// Short category name used in scenario reports
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Kube { .. } | Self::Platform { .. } => "PlatformError",
            Self::Validation { .. } => "ValidationError",
            Self::Template { .. } => "TemplateError",
            Self::Submission { .. } => "SubmissionError",
            Self::Timeout { .. } => "Timeout",
            Self::Cancelled { .. } => "Cancelled",
            Self::OutcomeMismatch { .. } => "OutcomeMismatch",
            Self::CleanupFailure { .. } => "CleanupFailure",
            Self::Internal { .. } => "InternalError",
        }
    }
}

/// Classify a kube-rs error as transient (worth retrying) or permanent.
///
/// Transient: throttling, server-side 5xx, a namespace that does not exist
/// yet or is still initialising, and transport failures. Everything else,
/// notably 400/401/409/422 and a namespace being terminated, is permanent.
pub fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => is_transient_api_status(ae.code, &ae.reason, &ae.message),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Classify an API status response by code, reason and message
pub fn is_transient_api_status(code: u16, reason: &str, message: &str) -> bool {
    let message = message.to_lowercase();
    match code {
        429 | 500 | 502 | 503 | 504 => true,
        404 => message.contains("namespaces \"") || message.contains("namespace not found"),
        403 => {
            message.contains("namespace")
                && !message.contains("terminat")
                && (message.contains("initializ") || message.contains("not ready"))
        }
        _ => matches!(reason, "ServerTimeout" | "Timeout" | "TooManyRequests"),
    }
}

/// Whether a failed kube write leaves its effect unknown
pub fn is_ambiguous_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => {
            matches!(ae.code, 500 | 502 | 503 | 504)
                || matches!(ae.reason.as_str(), "ServerTimeout" | "Timeout")
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Whether a kube error is an API 404 NotFound
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube error is an API 409 AlreadyExists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_transient_kube_error(&api_error(code, "", "busy")), "{code}");
        }
    }

    #[test]
    fn missing_namespace_is_transient_but_missing_kind_is_not() {
        let ns = api_error(404, "NotFound", "namespaces \"e2e-1\" not found");
        assert!(is_transient_kube_error(&ns));

        let crd = api_error(
            404,
            "NotFound",
            "the server could not find the requested resource",
        );
        assert!(!is_transient_kube_error(&crd));
    }

    #[test]
    fn terminating_namespace_is_permanent() {
        let err = api_error(
            403,
            "Forbidden",
            "unable to create new content in namespace e2e because it is being terminated",
        );
        assert!(!is_transient_kube_error(&err));

        let err = api_error(403, "Forbidden", "namespace e2e is still initializing");
        assert!(is_transient_kube_error(&err));
    }

    #[test]
    fn validation_and_conflict_errors_are_permanent() {
        assert!(!is_transient_kube_error(&api_error(
            422,
            "Invalid",
            "spec.strategy: Required value"
        )));
        let conflict = api_error(409, "AlreadyExists", "builds \"kaniko-abcde\" already exists");
        assert!(!is_transient_kube_error(&conflict));
        assert!(is_already_exists(&conflict));
        assert!(!is_not_found(&conflict));
        assert!(Error::from(conflict).is_already_exists());
    }

    #[test]
    fn only_unanswered_writes_may_have_landed() {
        for code in [500, 502, 503, 504] {
            assert!(Error::from(api_error(code, "", "busy")).may_have_landed(), "{code}");
        }
        assert!(Error::from(api_error(408, "Timeout", "request timed out")).may_have_landed());

        let throttled = Error::from(api_error(429, "TooManyRequests", "slow down"));
        assert!(throttled.is_transient());
        assert!(!throttled.may_have_landed());
        let initializing = Error::from(api_error(
            403,
            "Forbidden",
            "namespace e2e is still initializing",
        ));
        assert!(initializing.is_transient());
        assert!(!initializing.may_have_landed());
        let no_namespace = Error::from(api_error(404, "NotFound", "namespaces \"e2e\" not found"));
        assert!(no_namespace.is_transient());
        assert!(!no_namespace.may_have_landed());

        // Already classified, the original response is gone
        assert!(!Error::submission_transient("Build", "b", "503").may_have_landed());
    }

    #[test]
    fn timeout_reason_is_transient_regardless_of_code() {
        assert!(is_transient_api_status(408, "Timeout", "request timed out"));
        assert!(!is_transient_api_status(400, "BadRequest", "bad"));
    }

    #[test]
    fn error_classification_follows_variant() {
        assert!(Error::submission_transient("Build", "b", "503").is_transient());
        assert!(!Error::submission("Build", "b", "bad yaml").is_transient());
        assert!(Error::template("fixtures/x.yaml", "no such file").is_fatal());
        assert!(!Error::validation("bad budget").is_fatal());

        let err = Error::platform("get-buildrun", &api_error(503, "", "unavailable"));
        assert!(err.is_transient());
        assert_eq!(err.kind_name(), "PlatformError");
    }

    #[test]
    fn timeout_message_includes_last_observation() {
        let err = Error::Timeout {
            resource: "BuildRun e2e/kaniko-abcde".to_string(),
            waited: Duration::from_secs(30),
            last_observed: "Running".to_string(),
            last_error: Some("connection refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("kaniko-abcde"));
        assert!(msg.contains("last observed: Running"));
        assert!(msg.contains("connection refused"));
        assert_eq!(err.kind_name(), "Timeout");
    }

    #[test]
    fn mismatch_message_carries_expected_and_actual() {
        let err = Error::OutcomeMismatch {
            resource: "BuildRun e2e/kaniko-timeout-x1y2z".to_string(),
            expected: "Failed matching /kaniko-timeout.*15s/".to_string(),
            actual_phase: "Succeeded".to_string(),
            actual_reason: "Succeeded".to_string(),
            actual_message: "All Steps have completed executing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected Failed matching"));
        assert!(msg.contains("got Succeeded"));
    }

    #[test]
    fn cleanup_failure_lists_remaining_principals() {
        let err = Error::CleanupFailure {
            resource: "BuildRun e2e/buildah-q1w2e".to_string(),
            remaining: vec!["buildah-q1w2e-sa".to_string()],
            waited: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("1 still present"));
        assert!(err.to_string().contains("buildah-q1w2e-sa"));
    }
}
