//! Typed errors for each boundary of the callback pipeline.
//!
//! Every collaborator surfaces its own enum so callers can tell a retryable
//! failure from a terminal one instead of matching on formatted strings.

use thiserror::Error;

/// Failures inside signature verification or envelope crypto.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("callback signature mismatch")]
    SignatureInvalid,
    #[error("decrypt failed: {0}")]
    Decrypt(String),
}

/// Failures while talking to the AI-completion backend.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("completion request timed out")]
    Timeout,
    #[error("completion http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response malformed: {0}")]
    Malformed(String),
}

/// Failures on the outbound reply channel.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message send timed out")]
    Timeout,
    #[error("message send http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform rejected send: errcode={errcode} errmsg={errmsg}")]
    Platform { errcode: i64, errmsg: String },
}

/// Processing-ledger write failures. Non-fatal to the reply path by policy:
/// the dispatcher logs these and keeps going.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger write failed: {0}")]
    Write(String),
    #[error("ledger record {0} not found")]
    NotFound(i64),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Write(err.to_string())
    }
}

/// Failures raised by a command handler while executing an action.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Send(#[from] SendError),
}

impl HandlerError {
    /// Whether the failure was a downstream timeout rather than a hard error.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Ai(AiError::Timeout) | Self::Send(SendError::Timeout)
        )
    }
}

/// Registry construction failure: a table entry names an action its group
/// does not implement. Caught at startup, never per request.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown action {action} for group {group}")]
pub struct UnknownAction {
    pub group: u16,
    pub action: u16,
}
