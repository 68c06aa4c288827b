//! Callback trampoline registry for the cvg4j native bridge.
//!
//! Native libraries (GLFW, OpenGL, OpenCL, Vulkan) call plain function pointers
//! on whatever thread they like. This crate owns everything between that call
//! and the managed-side method that should handle it:
//!
//! - [`slot`]: the fixed catalogue of callback slots and their managed entry points.
//! - [`marshal`]: argument and return conversion, zero-copy views over native memory.
//! - [`runtime`]: the seam a managed runtime (the JVM, or the in-process
//!   [`loopback`] runtime) implements.
//! - [`registry`]: the per-slot registration table and the invoke path.
//! - [`thunk`]: the native-facing `extern` functions handed to the libraries.
//! - [`config`]: bridge configuration loaded from TOML and the environment.

mod attach;
pub mod config;
pub mod error;
pub mod loopback;
pub mod marshal;
pub mod registry;
pub mod runtime;
pub mod slot;
pub mod thunk;

pub use attach::ThreadState;
pub use config::{BridgeConfig, DetachPolicy, LogConfig};
pub use error::{Error, Result};
pub use marshal::{ManagedArg, ManagedReturn, NativeView};
pub use registry::{Bridge, StatsSnapshot};
pub use runtime::{ManagedRuntime, ThreadContext};
pub use slot::{Dispatch, ReturnShape, Slot, SlotSpec};
