//! JVM-facing side of the bridge: the process-wide [`Bridge`] and the
//! `Java_*` exports that drive it.

pub mod abi;
#[cfg(any(feature = "glfw", feature = "glad", feature = "opencl"))]
mod native;

use std::sync::Arc;

use jni::objects::GlobalRef;
use jni::JNIEnv;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use cvg4j_trampoline::{thunk, Bridge, BridgeConfig};

use crate::error::VmError;
use crate::logging;
use crate::vm::JvmRuntime;

/// Created by `Load._init`, never torn down: native threads may still be
/// calling in while the JVM unloads classes.
static BRIDGE: OnceCell<Arc<Bridge<JvmRuntime>>> = OnceCell::new();

/// Class whose static methods receive the GLFW window and joystick events.
static WINDOW_CLASS: Lazy<RwLock<Option<GlobalRef>>> = Lazy::new(|| RwLock::new(None));

pub fn bridge() -> Option<&'static Arc<Bridge<JvmRuntime>>> {
    BRIDGE.get()
}

/// Create the bridge on first use and route every thunk to it.
pub fn init(env: &JNIEnv<'_>) -> Result<&'static Arc<Bridge<JvmRuntime>>, VmError> {
    BRIDGE.get_or_try_init(|| {
        let (config, problem) = BridgeConfig::load_reporting();
        logging::init(&config.log);
        if let Some(e) = problem {
            tracing::warn!("{e}; using defaults");
        }

        let runtime = JvmRuntime::from_env(env, &config)?;
        let bridge = Arc::new(Bridge::new(runtime, config));
        thunk::install(bridge.clone());
        tracing::info!(bridge = bridge.id(), detach = ?bridge.config().detach, "cvg4j bridge initialised");
        Ok(bridge)
    })
}

pub(crate) fn set_window_class(class: GlobalRef) {
    *WINDOW_CLASS.write() = Some(class);
}

pub(crate) fn window_class() -> Option<GlobalRef> {
    WINDOW_CLASS.read().clone()
}
