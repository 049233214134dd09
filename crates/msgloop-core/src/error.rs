//! Error types for msgloop-core.

use thiserror::Error;

/// Result type for msgloop-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the executor itself (as opposed to the marshaled call).
///
/// All variants carry plain strings so an outcome can be cloned and observed
/// more than once (see [`crate::Executor::end_invoke`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The loop thread could not be started or its setup failed.
    #[error("loop startup failed: {0}")]
    Startup(String),

    /// The loop no longer accepts work.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// The call was queued but the loop stopped before running it.
    #[error("call abandoned: loop was disposed before it ran")]
    Abandoned,

    /// The marshaled callable panicked.
    #[error("call panicked: {0}")]
    Panicked(String),

    /// An unhandled failure escaped the loop.
    #[error("loop failed: {0}")]
    Loop(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Render the error together with a short recovery hint.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::Startup(_) => Some("the executor is unusable; create a new one"),
            Self::Dispatch(_) | Self::Abandoned => {
                Some("the executor was disposed or its loop failed; check on_thread_error observers")
            }
            Self::Panicked(_) => None,
            Self::Loop(_) => Some("a posted closure panicked; wrap fallible work in invoke instead of post"),
            Self::Config(_) => Some("see LoopConfig for accepted fields and MSGLOOP_* overrides"),
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }

    /// Whether this error means the loop is gone for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Startup(_) | Self::Dispatch(_) | Self::Abandoned | Self::Loop(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Startup(e.to_string())
    }
}

/// Outcome error of a marshaled call.
///
/// `Call` carries the callable's own error value untouched; everything else
/// comes from the executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError<E> {
    /// The callable returned an error.
    #[error("{0}")]
    Call(E),

    /// The executor failed to run the callable.
    #[error(transparent)]
    Executor(#[from] Error),
}

impl<E> InvokeError<E> {
    /// The callable's own error, if that is what this is.
    pub fn into_call(self) -> Option<E> {
        match self {
            Self::Call(e) => Some(e),
            Self::Executor(_) => None,
        }
    }

    /// The executor error, if that is what this is.
    pub fn as_executor(&self) -> Option<&Error> {
        match self {
            Self::Call(_) => None,
            Self::Executor(e) => Some(e),
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
