//! Per-thread attach bookkeeping.
//!
//! The runtime is asked for the current thread's context on every callback,
//! so a thread that something else detached in the meantime is attached
//! again instead of reusing a dead context. The thread-local only remembers
//! which attaches this bridge performed, keyed by bridge id, so each one is
//! counted once and detached at most once.

use std::cell::RefCell;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{BridgeConfig, DetachPolicy};
use crate::error::Result;
use crate::runtime::{ManagedRuntime, ThreadContext};

/// Attachment state of the current thread, as seen by one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Unattached,
    Attached,
}

/// Runs the runtime's detach when the owning thread's locals are destroyed.
struct DetachGuard {
    run: Option<Box<dyn FnOnce()>>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run();
        }
    }
}

thread_local! {
    /// Latest attach per bridge on this thread.
    static ATTACHED: RefCell<Vec<(u64, ThreadContext)>> = const { RefCell::new(Vec::new()) };
    static DETACH_GUARDS: RefCell<Vec<(u64, DetachGuard)>> = const { RefCell::new(Vec::new()) };
}

/// Context this bridge last attached the current thread with, if any.
fn attached_by(bridge_id: u64) -> Option<ThreadContext> {
    ATTACHED
        .try_with(|a| {
            a.borrow()
                .iter()
                .find(|(id, _)| *id == bridge_id)
                .map(|(_, ctx)| *ctx)
        })
        .ok()
        .flatten()
}

fn remember(bridge_id: u64, ctx: ThreadContext) {
    let _ = ATTACHED.try_with(|a| {
        let mut a = a.borrow_mut();
        match a.iter_mut().find(|(id, _)| *id == bridge_id) {
            Some(entry) => entry.1 = ctx,
            None => a.push((bridge_id, ctx)),
        }
    });
}

/// Arm (or re-arm) the thread-exit detach for `ctx`. A guard left over from an
/// earlier attach is disarmed first: that context is already gone.
fn arm_detach<R: ManagedRuntime>(bridge_id: u64, runtime: &Arc<R>, ctx: ThreadContext) -> bool {
    let runtime = Arc::clone(runtime);
    let run: Box<dyn FnOnce()> = Box::new(move || runtime.detach_current_thread(ctx));
    DETACH_GUARDS
        .try_with(move |g| {
            let mut g = g.borrow_mut();
            match g.iter_mut().find(|(id, _)| *id == bridge_id) {
                // Assigning drops the old closure without running it.
                Some((_, guard)) => guard.run = Some(run),
                None => g.push((bridge_id, DetachGuard { run: Some(run) })),
            }
        })
        .is_ok()
}

/// Context for the current thread, attaching it if the runtime does not know
/// it. The flag is true when this call performed the attach.
pub(crate) fn context_for<R: ManagedRuntime>(
    bridge_id: u64,
    runtime: &Arc<R>,
    config: &BridgeConfig,
) -> Result<(ThreadContext, bool)> {
    if let Some(ctx) = runtime.current_context() {
        return Ok((ctx, false));
    }

    if let Some(stale) = attached_by(bridge_id) {
        tracing::debug!(bridge = bridge_id, ?stale, "thread was detached elsewhere, attaching again");
    }
    let ctx = runtime.attach_current_thread(config.attach_name())?;
    tracing::debug!(bridge = bridge_id, ?ctx, policy = ?config.detach, "attached native thread");
    remember(bridge_id, ctx);

    if config.detach == DetachPolicy::OnThreadExit && !arm_detach(bridge_id, runtime, ctx) {
        tracing::debug!(bridge = bridge_id, "thread locals already destroyed, thread stays attached");
    }

    Ok((ctx, true))
}
