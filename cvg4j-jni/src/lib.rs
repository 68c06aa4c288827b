//! JNI bridge for cvg4j.
//!
//! Loaded by the JVM as a native library. `Load._init` creates one
//! [`cvg4j_trampoline::Bridge`] backed by [`vm::JvmRuntime`] and points every
//! native thunk at it; the registration exports in [`bridge::abi`] then pin
//! Java receivers into its slots. Native libraries call the thunks from any
//! thread and the bridge attaches those threads on first use.

pub mod bridge;
pub mod error;
pub mod logging;
pub mod vm;

pub use error::{BridgeStatus, VmError};
pub use vm::{JvmMethod, JvmRuntime};
