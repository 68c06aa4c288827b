//! The callback registration table and the invoke path.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::attach::{self, ThreadState};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::marshal::{ManagedArg, ManagedReturn};
use crate::runtime::ManagedRuntime;
use crate::slot::{Slot, SlotSpec};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// One live registration: the receiver reference and its resolved entry point.
///
/// Dropping the record releases the receiver.
struct Registration<R: ManagedRuntime> {
    receiver: R::Receiver,
    method: R::Method,
}

#[derive(Default)]
struct Counters {
    attachments: AtomicU64,
    invocations: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    unregistered: AtomicU64,
    registrations: AtomicU64,
    replacements: AtomicU64,
    per_slot: [AtomicU64; Slot::COUNT],
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of a bridge's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub bridge_id: u64,
    /// Native threads this bridge attached to the runtime.
    pub attachments: u64,
    pub invocations: u64,
    /// Invocations that reached the managed entry point and returned normally.
    pub delivered: u64,
    /// Managed exceptions, panics and runtime errors answered with the fallback.
    pub failed: u64,
    /// Events dropped because the thread could not be attached.
    pub dropped: u64,
    /// Events for slots with nothing registered.
    pub unregistered: u64,
    pub registrations: u64,
    pub replacements: u64,
    pub registered: Vec<Slot>,
    /// Delivered invocations per slot name; slots with none are omitted.
    pub deliveries: BTreeMap<&'static str, u64>,
}

/// Callback trampoline registry bound to one managed runtime.
///
/// At most one registration per slot. Any thread may invoke; registration is
/// expected from runtime-owned threads but is safe from anywhere.
pub struct Bridge<R: ManagedRuntime> {
    id: u64,
    runtime: Arc<R>,
    config: BridgeConfig,
    table: [RwLock<Option<Arc<Registration<R>>>>; Slot::COUNT],
    counters: Counters,
}

impl<R: ManagedRuntime> Bridge<R> {
    pub fn new(runtime: R, config: BridgeConfig) -> Self {
        Self::with_shared_runtime(Arc::new(runtime), config)
    }

    pub fn with_shared_runtime(runtime: Arc<R>, config: BridgeConfig) -> Self {
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(bridge = id, detach = ?config.detach, "bridge created");
        Self {
            id,
            runtime,
            config,
            table: std::array::from_fn(|_| RwLock::new(None)),
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Register `receiver` for `slot`, replacing and releasing any previous one.
    ///
    /// On error the receiver is released and the previous registration stays.
    pub fn register(&self, slot: Slot, receiver: R::Receiver) -> Result<()> {
        let spec = slot.spec();
        let ctx = self.context()?;
        let method = self.runtime.resolve(ctx, &receiver, &spec)?;

        let previous = self.table[slot.index()]
            .write()
            .replace(Arc::new(Registration { receiver, method }));

        bump(&self.counters.registrations);
        if previous.is_some() {
            bump(&self.counters.replacements);
            tracing::debug!(bridge = self.id, %slot, "replaced callback registration");
        } else {
            tracing::debug!(bridge = self.id, %slot, "registered callback");
        }
        // An invoke still running on another thread keeps its own Arc; the
        // receiver is released once that call returns.
        drop(previous);
        Ok(())
    }

    /// Remove the registration for `slot`. Returns whether one existed.
    pub fn unregister(&self, slot: Slot) -> bool {
        let previous = self.table[slot.index()].write().take();
        if previous.is_some() {
            tracing::debug!(bridge = self.id, %slot, "unregistered callback");
        }
        previous.is_some()
    }

    /// Release every registration.
    pub fn clear(&self) {
        for slot in Slot::ALL {
            self.unregister(slot);
        }
    }

    pub fn is_registered(&self, slot: Slot) -> bool {
        self.table[slot.index()].read().is_some()
    }

    pub fn registered_slots(&self) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|s| self.is_registered(*s))
            .collect()
    }

    /// Whether the runtime currently knows the calling thread.
    pub fn thread_state(&self) -> ThreadState {
        if self.runtime.current_context().is_some() {
            ThreadState::Attached
        } else {
            ThreadState::Unattached
        }
    }

    /// Deliver a native event to the slot's managed entry point.
    ///
    /// Never fails and never unwinds: every error is logged and answered with
    /// the slot's fallback value.
    pub fn invoke(&self, slot: Slot, args: &[ManagedArg<'_>]) -> ManagedReturn {
        let spec = slot.spec();
        match self.try_invoke(slot, args) {
            Ok(ret) if ret.matches(spec.returns) => ret,
            Ok(ret) => {
                tracing::warn!(bridge = self.id, %slot, ?ret, "managed callback returned the wrong shape");
                ManagedReturn::fallback(spec.returns)
            }
            Err(e) => {
                self.note_failure(slot, &e);
                ManagedReturn::fallback(spec.returns)
            }
        }
    }

    /// [`Self::invoke`] without the fallback: failures come back as errors.
    pub fn try_invoke(&self, slot: Slot, args: &[ManagedArg<'_>]) -> Result<ManagedReturn> {
        bump(&self.counters.invocations);
        let spec = slot.spec();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.deliver(&spec, args)));
        let ret = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                return Err(Error::Panicked {
                    slot,
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        bump(&self.counters.delivered);
        bump(&self.counters.per_slot[slot.index()]);
        Ok(ret)
    }

    fn deliver(&self, spec: &SlotSpec, args: &[ManagedArg<'_>]) -> Result<ManagedReturn> {
        // Clone the record out so the lock is not held across the managed call.
        let record = self.table[spec.slot.index()]
            .read()
            .clone()
            .ok_or(Error::NotRegistered(spec.slot))?;

        let ctx = self.context()?;
        self.runtime
            .call(ctx, &record.receiver, &record.method, spec, args)
    }

    fn context(&self) -> Result<crate::runtime::ThreadContext> {
        let (ctx, fresh) = attach::context_for(self.id, &self.runtime, &self.config)?;
        if fresh {
            bump(&self.counters.attachments);
        }
        Ok(ctx)
    }

    fn note_failure(&self, slot: Slot, error: &Error) {
        match error {
            Error::Attach(_) => {
                bump(&self.counters.dropped);
                tracing::warn!(bridge = self.id, %slot, "dropping native event: {error}");
            }
            Error::NotRegistered(_) => {
                bump(&self.counters.unregistered);
                tracing::debug!(bridge = self.id, %slot, "native event with no receiver");
            }
            _ => {
                bump(&self.counters.failed);
                tracing::warn!(bridge = self.id, %slot, "{error}");
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let c = &self.counters;
        StatsSnapshot {
            bridge_id: self.id,
            attachments: load(&c.attachments),
            invocations: load(&c.invocations),
            delivered: load(&c.delivered),
            failed: load(&c.failed),
            dropped: load(&c.dropped),
            unregistered: load(&c.unregistered),
            registrations: load(&c.registrations),
            replacements: load(&c.replacements),
            registered: self.registered_slots(),
            deliveries: Slot::ALL
                .into_iter()
                .map(|s| (s.name(), load(&c.per_slot[s.index()])))
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }
}

impl<R: ManagedRuntime> crate::thunk::Dispatcher for Bridge<R> {
    fn dispatch(&self, slot: Slot, args: &[ManagedArg<'_>]) -> ManagedReturn {
        self.invoke(slot, args)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
