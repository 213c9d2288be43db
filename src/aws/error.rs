//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format. Core operations return
//! `AmiError` so an embedding caller can decide per-region retry or
//! partial-result policy instead of always aborting.

use std::time::Duration;
use thiserror::Error;

/// Error categories for the replication and cleanup core
#[derive(Debug, Error)]
pub enum AmiError {
    /// Image or snapshot was not found
    #[error("resource not found: {resource_id}")]
    NotFound { resource_id: String },

    /// Rate limit exceeded (retryable by the caller)
    #[error("AWS rate limit exceeded: {message}")]
    Throttled { message: String },

    /// Credential, role-assumption, or authorization failure
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// An image carries a creation timestamp that cannot be parsed
    #[error("unparseable creation timestamp {value:?} on image {image_id}")]
    InvalidTimestamp { image_id: String, value: String },

    /// None of the requested tag keys exist on the source image
    #[error("none of the requested tag keys are present on the source image")]
    MissingTagFilter,

    /// A derived image did not become available within the maximum wait
    #[error("timed out waiting for {resource} after {waited:?}")]
    Timeout { resource: String, waited: Duration },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AmiError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AmiError::NotFound { .. })
    }

    /// Check if this is a transient error the caller could retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, AmiError::Throttled { .. })
    }

    /// Convenience constructor for internal failures with no AWS code
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        AmiError::Sdk {
            code: None,
            message: message.into(),
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidImage.NotFound",
    "InvalidSnapshot.NotFound",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for authorization failures
const PERMISSION_CODES: &[&str] = &["UnauthorizedOperation", "AuthFailure", "AccessDenied"];

/// Classify an AWS error using its error code.
///
/// `resource_id` names the image or snapshot the failed call was about, so
/// "not found" errors identify what was missing.
pub fn classify_ec2_error(
    resource_id: &str,
    code: Option<&str>,
    message: Option<&str>,
) -> AmiError {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AmiError::NotFound {
            resource_id: resource_id.to_string(),
        },
        Some(c) if THROTTLING_CODES.contains(&c) => AmiError::Throttled { message },
        Some(c) if PERMISSION_CODES.contains(&c) => AmiError::PermissionDenied { message },
        _ => AmiError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an SDK operation error by extracting `.code()` and `.message()`
/// through `ProvideErrorMetadata`.
pub fn classify_sdk_error<E>(
    resource_id: &str,
    err: &aws_sdk_ec2::error::SdkError<E>,
) -> AmiError
where
    E: aws_sdk_ec2::error::ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    use aws_sdk_ec2::error::ProvideErrorMetadata;

    let code = err.code().map(|s| s.to_string());
    let message = err
        .message()
        .map(|s| s.to_string())
        .unwrap_or_else(|| err.to_string());
    classify_ec2_error(resource_id, code.as_deref(), Some(&message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_ec2_error("ami-123", Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_ec2_error("ami-123", Some(code), Some("msg"));
            assert!(err.is_retryable(), "Expected retryable for code: {code}");
            assert!(matches!(err, AmiError::Throttled { .. }));
        }
    }

    #[test]
    fn permission_codes() {
        for code in PERMISSION_CODES {
            let err = classify_ec2_error("ami-123", Some(code), Some("msg"));
            assert!(matches!(err, AmiError::PermissionDenied { .. }));
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_ec2_error("ami-123", Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AmiError::Sdk { .. }));

        let err2 = classify_ec2_error("ami-123", None, Some("something failed"));
        assert!(matches!(err2, AmiError::Sdk { code: None, .. }));
    }

    #[test]
    fn not_found_carries_resource_id() {
        let err = classify_ec2_error("snap-abc", Some("InvalidSnapshot.NotFound"), None);
        match err {
            AmiError::NotFound { resource_id } => assert_eq!(resource_id, "snap-abc"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn variant_checks() {
        assert!(AmiError::NotFound {
            resource_id: "ami-1".to_string()
        }
        .is_not_found());
        assert!(!AmiError::MissingTagFilter.is_not_found());
        assert!(AmiError::Throttled {
            message: "slow down".to_string()
        }
        .is_retryable());
        assert!(!AmiError::MissingTagFilter.is_retryable());
    }
}
