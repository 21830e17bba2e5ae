use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const RENDER_CANCELLED: &str = "RENDER_CANCELLED";
pub const ENCODER_SPAWN_FAILED: &str = "ENCODER_SPAWN_FAILED";
pub const DESTINATION_UNAVAILABLE: &str = "DESTINATION_UNAVAILABLE";
pub const INVALID_OPTIONS: &str = "INVALID_OPTIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    /// Bad input from the caller.
    Usage,
    /// The run was stopped before completing.
    Cancelled,
    /// The run could not continue.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Usage)
    }

    pub fn fatal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Fatal)
    }

    pub fn cancelled() -> Self {
        Self::new(
            RENDER_CANCELLED,
            "render was cancelled",
            CodedErrorKind::Cancelled,
        )
    }

    fn new(code: &'static str, message: impl Into<String>, kind: CodedErrorKind) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error: the coded error in its chain, or a generic one carrying
/// the full context chain.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => CodedError::fatal("RENDER_FAILED", format!("{error:#}")).envelope(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use serde_json::json;

    use super::{envelope_for, find_coded_error, CodedError, CodedErrorKind, RENDER_CANCELLED};

    #[test]
    fn finds_coded_error_through_context() {
        let error = Err::<(), _>(anyhow!(CodedError::cancelled()))
            .context("rendering chat.mp4")
            .expect_err("error");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, RENDER_CANCELLED);
        assert_eq!(coded.kind, CodedErrorKind::Cancelled);
    }

    #[test]
    fn envelope_serializes_details_only_when_present() {
        let plain = serde_json::to_value(CodedError::usage("INVALID_OPTIONS", "bad").envelope())
            .expect("json");
        assert_eq!(
            plain,
            json!({"ok": false, "error": {"code": "INVALID_OPTIONS", "message": "bad"}})
        );

        let generic = envelope_for(&anyhow!("disk full").context("writing frame"));
        assert_eq!(generic.error.code, "RENDER_FAILED");
        assert_eq!(generic.error.message, "writing frame: disk full");
    }
}
