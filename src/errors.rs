use std::io;

use http::StatusCode;
use thiserror::Error;

/// Errors returned by this crate.
///
/// The set of variants is closed: everything that can go wrong while talking
/// to a WebDAV server is reported as one of these.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DavError {
    /// The URL could not be parsed, or a path component is malformed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Network, TLS, proxy or protocol failure without an HTTP status.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    /// The server answered with a 4xx/5xx status that has no dedicated kind.
    /// `phrase` is the standard reason phrase of `code`, not the text the
    /// server sent.
    #[error("{url}: {} {phrase}", .code.as_u16())]
    HttpStatus {
        code: StatusCode,
        phrase: String,
        url: String,
    },
    /// 404 or 410. A resource missing from a multistatus answer is
    /// reported as 404.
    #[error("file not found: {url}")]
    FileNotFound { code: StatusCode, url: String },
    /// 401 or 403 after authentication was attempted.
    #[error("{url}: access denied ({code})")]
    Denied { code: StatusCode, url: String },
    /// 409 or 412.
    #[error("{url}: conflict ({code})")]
    Conflict { code: StatusCode, url: String },
    /// A listing was requested on something that is not a collection.
    #[error("not a folder: {url}")]
    NotAFolder { url: String },
    /// The server (or this client) does not support the operation on this resource.
    #[error("{url}: not supported: {reason}")]
    NotSupported { url: String, reason: String },
    /// Local read/write failure on a stream body.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for results returned by this crate.
pub type DavResult<T> = Result<T, DavError>;

impl DavError {
    /// Maps a non-success status to the matching error kind.
    pub fn from_status(code: StatusCode, url: impl Into<String>) -> DavError {
        let url = url.into();
        match code {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DavError::Denied { code, url },
            StatusCode::NOT_FOUND | StatusCode::GONE => DavError::FileNotFound { code, url },
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                DavError::Conflict { code, url }
            }
            _ => DavError::HttpStatus {
                code,
                phrase: code.canonical_reason().unwrap_or("").to_string(),
                url,
            },
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> DavError {
        DavError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn transport_with<E>(message: impl Into<String>, source: E) -> DavError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DavError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn not_found(url: impl Into<String>) -> DavError {
        DavError::FileNotFound {
            code: StatusCode::NOT_FOUND,
            url: url.into(),
        }
    }

    pub(crate) fn not_supported(url: impl Into<String>, reason: impl Into<String>) -> DavError {
        DavError::NotSupported {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// The HTTP status behind this error, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DavError::HttpStatus { code, .. }
            | DavError::Denied { code, .. }
            | DavError::Conflict { code, .. }
            | DavError::FileNotFound { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for 404/410.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DavError::FileNotFound { .. })
    }
}

impl From<reqwest::Error> for DavError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            "connection failed".to_string()
        } else if e.is_redirect() {
            "redirect refused".to_string()
        } else {
            e.to_string()
        };
        DavError::transport_with(message, e)
    }
}

impl From<::xml::writer::Error> for DavError {
    fn from(e: ::xml::writer::Error) -> Self {
        DavError::Io(io::Error::new(io::ErrorKind::Other, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let e = DavError::from_status(StatusCode::NOT_FOUND, "http://h/a");
        assert!(e.is_not_found());
        let e = DavError::from_status(StatusCode::GONE, "http://h/a");
        assert!(e.is_not_found());
        assert_eq!(e.status(), Some(StatusCode::GONE));
        assert!(matches!(
            DavError::from_status(StatusCode::FORBIDDEN, "u"),
            DavError::Denied { .. }
        ));
        assert!(matches!(
            DavError::from_status(StatusCode::PRECONDITION_FAILED, "u"),
            DavError::Conflict { .. }
        ));
        let e = DavError::from_status(StatusCode::INSUFFICIENT_STORAGE, "http://h/x");
        assert_eq!(e.status(), Some(StatusCode::INSUFFICIENT_STORAGE));
        assert_eq!(e.to_string(), "http://h/x: 507 Insufficient Storage");
    }
}
