//! Native-facing thunks.
//!
//! Native libraries take a bare function pointer with no room for captured
//! state, so each slot gets one `extern` function with the library's exact
//! signature. A thunk only marshals its arguments, looks up the process-wide
//! dispatcher and hands the call over; the fallback comes back if nothing is
//! installed or anything panics.

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::marshal::{ManagedArg, ManagedReturn, NativeView};
use crate::registry::panic_message;
use crate::slot::Slot;

/// Receives every native callback that reaches a thunk.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, slot: Slot, args: &[ManagedArg<'_>]) -> ManagedReturn;
}

static INSTALLED: Lazy<RwLock<Option<Arc<dyn Dispatcher>>>> = Lazy::new(|| RwLock::new(None));

/// Route every thunk to `dispatcher`, replacing the previous one.
///
/// The previous dispatcher stays alive until callbacks already running on it return.
pub fn install(dispatcher: Arc<dyn Dispatcher>) {
    *INSTALLED.write() = Some(dispatcher);
}

/// Stop routing; thunks answer with fallbacks afterwards.
pub fn uninstall() -> bool {
    INSTALLED.write().take().is_some()
}

pub fn is_installed() -> bool {
    INSTALLED.read().is_some()
}

fn fire(slot: Slot, args: &[ManagedArg<'_>]) -> ManagedReturn {
    let fallback = ManagedReturn::fallback(slot.spec().returns);
    let dispatcher = INSTALLED.read().clone();
    let Some(dispatcher) = dispatcher else {
        tracing::debug!(%slot, "native callback fired before a bridge was installed");
        return fallback;
    };

    panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(slot, args))).unwrap_or_else(|payload| {
        tracing::error!(%slot, "callback dispatch panicked: {}", panic_message(payload.as_ref()));
        fallback
    })
}

/// Address of the slot's thunk, as handed to native code.
pub fn fn_pointer(slot: Slot) -> usize {
    let ptr: *const () = match slot {
        Slot::GlfwError => glfw_error as *const (),
        Slot::GlDebugMessage => gl_debug_message as *const (),
        Slot::ClContextError => cl_context_error as *const (),
        Slot::ClProgramBuildFinished => cl_program_build_finished as *const (),
        Slot::VkDebugUtilsMessenger => vk_debug_utils_messenger as *const (),
        Slot::GlfwWindowSize => glfw_window_size as *const (),
        Slot::GlfwFramebufferSize => glfw_framebuffer_size as *const (),
        Slot::GlfwKey => glfw_key as *const (),
        Slot::GlfwChar => glfw_char as *const (),
        Slot::GlfwCursorPos => glfw_cursor_pos as *const (),
        Slot::GlfwCursorEnter => glfw_cursor_enter as *const (),
        Slot::GlfwMouseButton => glfw_mouse_button as *const (),
        Slot::GlfwScroll => glfw_scroll as *const (),
        Slot::GlfwJoystick => glfw_joystick as *const (),
        Slot::GlfwDrop => glfw_drop as *const (),
        Slot::GlfwWindowRefresh => glfw_window_refresh as *const (),
        Slot::GlfwWindowIconify => glfw_window_iconify as *const (),
    };
    ptr as usize
}

// ─── GLFW ────────────────────────────────────────────────────────────

/// `GLFWerrorfun`.
///
/// # Safety
///
/// `description` must be null or a NUL-terminated string valid for the call.
pub unsafe extern "C" fn glfw_error(error: c_int, description: *const c_char) {
    let description = unsafe { ManagedArg::c_text(description) };
    fire(Slot::GlfwError, &[ManagedArg::Int(error), description]);
}

pub extern "C" fn glfw_window_size(window: *mut c_void, width: c_int, height: c_int) {
    fire(
        Slot::GlfwWindowSize,
        &[ManagedArg::handle(window), ManagedArg::Int(width), ManagedArg::Int(height)],
    );
}

pub extern "C" fn glfw_framebuffer_size(window: *mut c_void, width: c_int, height: c_int) {
    fire(
        Slot::GlfwFramebufferSize,
        &[ManagedArg::handle(window), ManagedArg::Int(width), ManagedArg::Int(height)],
    );
}

pub extern "C" fn glfw_key(window: *mut c_void, key: c_int, scancode: c_int, action: c_int, mods: c_int) {
    fire(
        Slot::GlfwKey,
        &[
            ManagedArg::handle(window),
            ManagedArg::Int(key),
            ManagedArg::Int(scancode),
            ManagedArg::Int(action),
            ManagedArg::Int(mods),
        ],
    );
}

pub extern "C" fn glfw_char(window: *mut c_void, codepoint: c_uint) {
    fire(Slot::GlfwChar, &[ManagedArg::handle(window), ManagedArg::bits(codepoint)]);
}

pub extern "C" fn glfw_cursor_pos(window: *mut c_void, xpos: f64, ypos: f64) {
    fire(
        Slot::GlfwCursorPos,
        &[ManagedArg::handle(window), ManagedArg::Double(xpos), ManagedArg::Double(ypos)],
    );
}

pub extern "C" fn glfw_cursor_enter(window: *mut c_void, entered: c_int) {
    fire(Slot::GlfwCursorEnter, &[ManagedArg::handle(window), ManagedArg::flag(entered)]);
}

pub extern "C" fn glfw_mouse_button(window: *mut c_void, button: c_int, action: c_int, mods: c_int) {
    fire(
        Slot::GlfwMouseButton,
        &[
            ManagedArg::handle(window),
            ManagedArg::Int(button),
            ManagedArg::Int(action),
            ManagedArg::Int(mods),
        ],
    );
}

pub extern "C" fn glfw_scroll(window: *mut c_void, xoffset: f64, yoffset: f64) {
    fire(
        Slot::GlfwScroll,
        &[ManagedArg::handle(window), ManagedArg::Double(xoffset), ManagedArg::Double(yoffset)],
    );
}

pub extern "C" fn glfw_joystick(jid: c_int, event: c_int) {
    fire(Slot::GlfwJoystick, &[ManagedArg::Int(jid), ManagedArg::Int(event)]);
}

/// `GLFWdropfun`. The managed side receives a view over the path pointer array.
///
/// # Safety
///
/// `paths` must be null or valid for reads of `count` pointers for the call.
pub unsafe extern "C" fn glfw_drop(window: *mut c_void, count: c_int, paths: *const *const c_char) {
    let paths = unsafe { ManagedArg::pointer_array(paths, count) };
    fire(Slot::GlfwDrop, &[ManagedArg::handle(window), ManagedArg::Int(count), paths]);
}

pub extern "C" fn glfw_window_refresh(window: *mut c_void) {
    fire(Slot::GlfwWindowRefresh, &[ManagedArg::handle(window)]);
}

pub extern "C" fn glfw_window_iconify(window: *mut c_void, iconified: c_int) {
    fire(Slot::GlfwWindowIconify, &[ManagedArg::handle(window), ManagedArg::flag(iconified)]);
}

// ─── OpenGL ──────────────────────────────────────────────────────────

/// `GLDEBUGPROC`. A negative `length` means the message is NUL-terminated.
///
/// # Safety
///
/// `message` must be null or valid for `length` bytes (or up to its NUL) for the call.
pub unsafe extern "system" fn gl_debug_message(
    source: c_uint,
    kind: c_uint,
    id: c_uint,
    severity: c_uint,
    length: c_int,
    message: *const c_char,
    user_param: *const c_void,
) {
    let message = match usize::try_from(length) {
        Ok(len) => unsafe { ManagedArg::view(message.cast(), len) },
        Err(_) => match unsafe { NativeView::from_c_str(message) } {
            Some(view) => ManagedArg::View(view),
            None => ManagedArg::Null,
        },
    };
    fire(
        Slot::GlDebugMessage,
        &[
            ManagedArg::bits(source),
            ManagedArg::bits(kind),
            ManagedArg::bits(id),
            ManagedArg::bits(severity),
            message,
            ManagedArg::handle(user_param),
        ],
    );
}

// ─── OpenCL ──────────────────────────────────────────────────────────

/// `clCreateContext` `pfn_notify`.
///
/// # Safety
///
/// `errinfo` must be null or NUL-terminated, and `private_info` null or valid
/// for `cb` bytes, for the duration of the call.
pub unsafe extern "system" fn cl_context_error(
    errinfo: *const c_char,
    private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
) {
    let errinfo = unsafe { ManagedArg::c_text(errinfo) };
    let private_info = unsafe { ManagedArg::view(private_info, cb) };
    fire(
        Slot::ClContextError,
        &[errinfo, private_info, ManagedArg::handle(user_data)],
    );
}

/// `clBuildProgram` `pfn_notify`.
pub extern "system" fn cl_program_build_finished(program: *mut c_void, user_data: *mut c_void) {
    fire(
        Slot::ClProgramBuildFinished,
        &[ManagedArg::handle(program), ManagedArg::handle(user_data)],
    );
}

// ─── Vulkan ──────────────────────────────────────────────────────────

/// `PFN_vkDebugUtilsMessengerCallbackEXT`. Returns `VK_FALSE` unless the
/// managed side asks for the triggering call to be aborted.
pub extern "system" fn vk_debug_utils_messenger(
    severity: u32,
    types: u32,
    callback_data: *const c_void,
    user_data: *mut c_void,
) -> u32 {
    fire(
        Slot::VkDebugUtilsMessenger,
        &[
            ManagedArg::bits(severity),
            ManagedArg::bits(types),
            ManagedArg::handle(callback_data),
            ManagedArg::handle(user_data),
        ],
    )
    .to_native_bool()
}
