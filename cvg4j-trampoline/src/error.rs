//! Errors raised on the trampoline path.
//!
//! None of these ever cross the native boundary: [`crate::Bridge::invoke`]
//! logs them and returns the slot's fallback value instead.

use crate::slot::Slot;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The current native thread could not be attached to the managed runtime.
    #[error("failed to attach native thread to the managed runtime: {0}")]
    Attach(String),

    /// The managed entry point for a slot could not be looked up on the receiver.
    #[error("cannot resolve {method}{signature} for {slot}: {reason}")]
    Resolve {
        slot: Slot,
        method: &'static str,
        signature: &'static str,
        reason: String,
    },

    /// The receiver is the wrong kind of object for the slot (an instance
    /// where a static entry point needs its class).
    #[error("receiver for {slot} is not usable: {reason}")]
    InvalidReceiver { slot: Slot, reason: String },

    /// The managed method raised an error (a Java exception, or a loopback handler error).
    #[error("managed callback for {slot} raised: {message}")]
    Managed { slot: Slot, message: String },

    /// The managed side panicked while handling the callback.
    #[error("callback for {slot} panicked: {message}")]
    Panicked { slot: Slot, message: String },

    /// The callback fired but nothing is registered for the slot.
    #[error("no receiver registered for {0}")]
    NotRegistered(Slot),

    /// Any other runtime-level failure (marshaling, local frames, ...).
    #[error("managed runtime error: {0}")]
    Runtime(String),

    #[error("invalid bridge config {path}: {reason}")]
    Config { path: String, reason: String },
}
