//! Error types shared by the fetcher, the providers, and the scheduler.
//!
//! Most functions in this crate return [`anyhow::Result`]. The variants here
//! exist for the cases callers need to tell apart after the fact: the
//! scheduler must recognize an operator interrupt and let it through, and
//! providers occasionally treat a timeout or a 404 as "no data" rather than
//! a failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The operator asked the process to stop. Never swallowed.
    #[error("update interrupted by operator")]
    Interrupted,

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// An API answered with its own error payload.
    #[error("{service} error {code}: {message}")]
    Remote {
        service: String,
        code: String,
        message: String,
    },

    /// A response body could not be decoded at all. Fails the provider,
    /// unlike [`SyncError::Malformed`].
    #[error("undecodable {what} response: {detail}")]
    Decode { what: String, detail: String },

    /// One record inside a decoded response is unusable.
    #[error("malformed {what}: {detail}")]
    Malformed { what: String, detail: String },
}

impl SyncError {
    pub fn decode(what: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::Decode {
            what: what.into(),
            detail: detail.into(),
        }
    }

    pub fn malformed(what: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::Malformed {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

/// Returns `true` if anywhere in the chain of `err` sits an operator interrupt.
pub fn is_interrupt(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SyncError>(),
            Some(SyncError::Interrupted)
        )
    })
}

/// Returns the HTTP status carried by `err`, if it is an HTTP failure.
pub fn http_status(err: &anyhow::Error) -> Option<u16> {
    err.chain().find_map(|cause| match cause.downcast_ref::<SyncError>() {
        Some(SyncError::Http { status, .. }) => Some(*status),
        _ => None,
    })
}

pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SyncError>(),
            Some(SyncError::Timeout { .. })
        )
    })
}

/// Returns `true` if `err` comes from unusable remote data rather than a
/// transport or storage failure.
pub fn is_malformed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SyncError>(),
            Some(SyncError::Malformed { .. })
        )
    })
}

pub fn is_decode(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SyncError>(),
            Some(SyncError::Decode { .. })
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn interrupt_is_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(SyncError::Interrupted)
            .context("while updating lastfm")
            .unwrap_err();
        assert!(is_interrupt(&err));
    }

    #[test]
    fn other_errors_are_not_interrupts() {
        let err = anyhow::anyhow!("boom");
        assert!(!is_interrupt(&err));
        assert_eq!(http_status(&err), None);
    }

    #[test]
    fn http_status_is_extracted() {
        let err: anyhow::Error = SyncError::Http {
            url: "http://example.com/".to_string(),
            status: 404,
        }
        .into();
        assert_eq!(http_status(&err), Some(404));
        assert!(!is_timeout(&err));
    }

    #[test]
    fn undecodable_bodies_are_not_malformed_records() {
        let err: anyhow::Error = SyncError::decode("XML", "unexpected end of file").into();
        assert!(is_decode(&err));
        assert!(!is_malformed(&err));

        let err: anyhow::Error = SyncError::malformed("track", "missing name").into();
        assert!(!is_decode(&err));
        assert!(is_malformed(&err));
    }
}
