//! Status codes returned by the int-returning exports, and JVM-side errors.

use cvg4j_trampoline::Error;

/// Result codes for the `int`-returning exports.
///
/// Java callers compare against `0`; anything else has been logged via tracing.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Success.
    Ok = 0,
    /// `Load._init` has not run yet.
    NotInitialized = 1,
    /// The slot ordinal is out of range.
    InvalidSlot = 2,
    /// A required object or class argument was null, or an instance was
    /// passed where a static slot needs its class.
    InvalidArgument = 3,
    /// The receiver has no method with the slot's name and signature.
    ResolveFailed = 4,
    /// The calling thread could not be attached.
    AttachFailed = 5,
    /// Anything else.
    Internal = 6,
}

impl From<&Error> for BridgeStatus {
    fn from(e: &Error) -> Self {
        match e {
            Error::Resolve { .. } => BridgeStatus::ResolveFailed,
            Error::InvalidReceiver { .. } => BridgeStatus::InvalidArgument,
            Error::Attach(_) => BridgeStatus::AttachFailed,
            _ => BridgeStatus::Internal,
        }
    }
}

/// Failures talking to the JVM.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Jni(#[from] jni::errors::Error),

    #[error("{call} returned JNI status {status}")]
    Status { call: &'static str, status: i32 },

    #[error("JNI function table has no {0}")]
    MissingFunction(&'static str),

    /// A Java exception was pending after the call; it has been cleared.
    #[error("{0}")]
    Exception(String),
}

impl From<VmError> for Error {
    fn from(e: VmError) -> Self {
        Error::Runtime(e.to_string())
    }
}
