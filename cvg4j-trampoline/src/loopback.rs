//! In-process managed runtime whose receivers are Rust closures.
//!
//! Behaves like the JVM from the registry's point of view: threads must be
//! attached before they can call in, contexts are per thread, receivers are
//! released when their reference is dropped and text/view arguments become
//! temporaries that live exactly as long as one call. Everything observable is
//! counted so callers can check the bridge's bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::marshal::{ManagedArg, ManagedReturn};
use crate::runtime::{ManagedRuntime, ThreadContext};
use crate::slot::{Dispatch, Slot, SlotSpec};

/// What a loopback handler sees for one delivered callback.
pub struct LoopbackCall<'a> {
    pub slot: Slot,
    pub method: &'static str,
    pub receiver: &'a str,
    pub thread: ThreadId,
    pub context: ThreadContext,
    pub args: &'a [ManagedArg<'a>],
}

/// Handler result; `Err` plays the part of a managed exception.
pub type HandlerResult = std::result::Result<ManagedReturn, String>;

type Handler = Arc<dyn Fn(&LoopbackCall<'_>) -> HandlerResult + Send + Sync>;

/// Counts how often a receiver was released.
#[derive(Debug, Clone, Default)]
pub struct ReleaseProbe(Arc<AtomicUsize>);

impl ReleaseProbe {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LoopbackReceiver {
    label: String,
    handler: Handler,
    methods: Option<Vec<&'static str>>,
    instance_only: bool,
    released: ReleaseProbe,
}

impl LoopbackReceiver {
    pub fn new(
        label: impl Into<String>,
        handler: impl Fn(&LoopbackCall<'_>) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            handler: Arc::new(handler),
            methods: None,
            instance_only: false,
            released: ReleaseProbe::default(),
        }
    }

    /// Restrict the receiver to the given entry points; resolving any other fails.
    pub fn responding_to(mut self, methods: &[&'static str]) -> Self {
        self.methods = Some(methods.to_vec());
        self
    }

    /// Behave like an object rather than a class: static entry points cannot
    /// be resolved on it.
    pub fn instance_only(mut self) -> Self {
        self.instance_only = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn release_probe(&self) -> ReleaseProbe {
        self.released.clone()
    }
}

impl Drop for LoopbackReceiver {
    fn drop(&mut self) {
        self.released.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackMethod {
    pub name: &'static str,
}

/// Keeps the live-temporary count honest even if the handler panics.
struct Temporaries<'a> {
    live: &'a AtomicIsize,
    count: isize,
}

impl<'a> Temporaries<'a> {
    fn create(live: &'a AtomicIsize, args: &[ManagedArg<'_>]) -> Self {
        let count = args.iter().filter(|a| a.is_temporary()).count() as isize;
        live.fetch_add(count, Ordering::SeqCst);
        Self { live, count }
    }
}

impl Drop for Temporaries<'_> {
    fn drop(&mut self) {
        self.live.fetch_sub(self.count, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct LoopbackRuntime {
    next_context: AtomicUsize,
    contexts: DashMap<ThreadId, ThreadContext>,
    owners: DashMap<usize, ThreadId>,
    attaches: DashMap<ThreadId, u32>,
    detaches: DashMap<ThreadId, u32>,
    names: DashMap<ThreadId, String>,
    refuse_attach: AtomicBool,
    live_temporaries: AtomicIsize,
    calls: AtomicU64,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_context(&self, thread: ThreadId) -> ThreadContext {
        let ctx = ThreadContext::from_raw(self.next_context.fetch_add(1, Ordering::Relaxed) + 1);
        self.contexts.insert(thread, ctx);
        self.owners.insert(ctx.as_raw(), thread);
        ctx
    }

    /// Treat the current thread as one the runtime created itself (already attached).
    pub fn adopt_current_thread(&self) -> ThreadContext {
        let thread = thread::current().id();
        if let Some(ctx) = self.contexts.get(&thread) {
            return *ctx;
        }
        self.new_context(thread)
    }

    /// Make every following attach fail.
    pub fn refuse_attach(&self, refuse: bool) {
        self.refuse_attach.store(refuse, Ordering::SeqCst);
    }

    pub fn attach_count(&self, thread: ThreadId) -> u32 {
        self.attaches.get(&thread).map(|n| *n).unwrap_or(0)
    }

    pub fn detach_count(&self, thread: ThreadId) -> u32 {
        self.detaches.get(&thread).map(|n| *n).unwrap_or(0)
    }

    pub fn total_attaches(&self) -> u32 {
        self.attaches.iter().map(|e| *e.value()).sum()
    }

    pub fn total_detaches(&self) -> u32 {
        self.detaches.iter().map(|e| *e.value()).sum()
    }

    pub fn is_attached(&self, thread: ThreadId) -> bool {
        self.contexts.contains_key(&thread)
    }

    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        self.names.get(&thread).map(|n| n.clone())
    }

    /// Temporaries currently alive; zero whenever no call is in progress.
    pub fn live_temporaries(&self) -> isize {
        self.live_temporaries.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_owner(&self, ctx: ThreadContext) -> Result<ThreadId> {
        let current = thread::current().id();
        match self.owners.get(&ctx.as_raw()).map(|t| *t) {
            Some(owner) if owner == current => Ok(current),
            Some(_) => Err(Error::Runtime(format!("{ctx:?} used on a foreign thread"))),
            None => Err(Error::Runtime(format!("{ctx:?} is not attached"))),
        }
    }
}

impl ManagedRuntime for LoopbackRuntime {
    type Receiver = LoopbackReceiver;
    type Method = LoopbackMethod;

    fn current_context(&self) -> Option<ThreadContext> {
        self.contexts.get(&thread::current().id()).map(|c| *c)
    }

    fn attach_current_thread(&self, name: Option<&str>) -> Result<ThreadContext> {
        if self.refuse_attach.load(Ordering::SeqCst) {
            return Err(Error::Attach("loopback runtime refused the attach".to_string()));
        }
        let thread = thread::current().id();
        let ctx = self.new_context(thread);
        *self.attaches.entry(thread).or_insert(0) += 1;
        if let Some(name) = name {
            self.names.insert(thread, name.to_string());
        }
        Ok(ctx)
    }

    fn detach_current_thread(&self, ctx: ThreadContext) {
        // May run from thread-local destructors, so the thread id comes from the context.
        if let Some((_, thread)) = self.owners.remove(&ctx.as_raw()) {
            self.contexts.remove(&thread);
            *self.detaches.entry(thread).or_insert(0) += 1;
        }
    }

    fn resolve(&self, ctx: ThreadContext, receiver: &LoopbackReceiver, spec: &SlotSpec) -> Result<LoopbackMethod> {
        self.check_owner(ctx)?;
        if receiver.instance_only && spec.dispatch == Dispatch::Static {
            return Err(Error::InvalidReceiver {
                slot: spec.slot,
                reason: format!("{} is an instance, {} is static", receiver.label, spec.method),
            });
        }
        match &receiver.methods {
            Some(methods) if !methods.contains(&spec.method) => Err(Error::Resolve {
                slot: spec.slot,
                method: spec.method,
                signature: spec.signature,
                reason: format!("{} has no such method", receiver.label),
            }),
            _ => Ok(LoopbackMethod { name: spec.method }),
        }
    }

    fn call(
        &self,
        ctx: ThreadContext,
        receiver: &LoopbackReceiver,
        method: &LoopbackMethod,
        spec: &SlotSpec,
        args: &[ManagedArg<'_>],
    ) -> Result<ManagedReturn> {
        let thread = self.check_owner(ctx)?;
        let _temporaries = Temporaries::create(&self.live_temporaries, args);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let call = LoopbackCall {
            slot: spec.slot,
            method: method.name,
            receiver: &receiver.label,
            thread,
            context: ctx,
            args,
        };
        (receiver.handler)(&call).map_err(|message| Error::Managed {
            slot: spec.slot,
            message,
        })
    }
}
