//! The seam between the registry and a managed runtime.

use std::fmt;

use crate::error::Result;
use crate::marshal::{ManagedArg, ManagedReturn};
use crate::slot::SlotSpec;

/// Opaque per-thread handle into the managed runtime (a `JNIEnv*` for the JVM).
///
/// Only meaningful on the thread that obtained it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadContext(usize);

impl ThreadContext {
    pub fn from_raw(raw: usize) -> ThreadContext {
        ThreadContext(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadContext({:#x})", self.0)
    }
}

/// A managed execution environment callbacks can be delivered into.
///
/// Implementations must be callable from any native thread.
pub trait ManagedRuntime: Send + Sync + 'static {
    /// Reference that keeps the managed receiver alive. Dropping it releases it.
    type Receiver: Send + Sync + 'static;

    /// A resolved managed entry point on a receiver.
    type Method: Send + Sync + 'static;

    /// Context of the current thread if the runtime already knows it, without attaching.
    fn current_context(&self) -> Option<ThreadContext>;

    /// Attach the current native thread and return its new context.
    fn attach_current_thread(&self, name: Option<&str>) -> Result<ThreadContext>;

    /// Detach a thread previously attached through [`Self::attach_current_thread`].
    ///
    /// Called on the attached thread itself, possibly while it is exiting.
    fn detach_current_thread(&self, ctx: ThreadContext);

    /// Look up the slot's entry point on the receiver.
    fn resolve(&self, ctx: ThreadContext, receiver: &Self::Receiver, spec: &SlotSpec) -> Result<Self::Method>;

    /// Call the entry point synchronously on the current thread.
    ///
    /// Temporaries created for `args` must be released before this returns,
    /// on both the success and the error path.
    fn call(
        &self,
        ctx: ThreadContext,
        receiver: &Self::Receiver,
        method: &Self::Method,
        spec: &SlotSpec,
        args: &[ManagedArg<'_>],
    ) -> Result<ManagedReturn>;
}
