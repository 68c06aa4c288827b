//! `Java_*` exports: the surface the Java classes bind their `native` methods to.
//!
//! Exports never unwind into the JVM. `int` exports report a [`BridgeStatus`];
//! `void` exports throw `IllegalArgumentException` or `IllegalStateException`.

use std::ffi::c_void;
use std::ptr;

use jni::objects::{GlobalRef, JClass, JObject};
use jni::sys::{jboolean, jint, jlong, jobject, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;

use cvg4j_trampoline::marshal::{handle_from_ptr, is_null_handle, ptr_from_handle, NULL_HANDLE};
use cvg4j_trampoline::{thunk, NativeView, Slot};

use crate::bridge;
use crate::error::BridgeStatus;

#[cfg(any(feature = "glfw", feature = "glad", feature = "opencl"))]
use super::native;

const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";

/// Why an export could not do its job.
#[derive(Debug)]
struct Rejection {
    status: BridgeStatus,
    message: String,
}

impl Rejection {
    fn new(status: BridgeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn exception_class(&self) -> &'static str {
        match self.status {
            BridgeStatus::InvalidSlot | BridgeStatus::InvalidArgument | BridgeStatus::ResolveFailed => ILLEGAL_ARGUMENT,
            _ => ILLEGAL_STATE,
        }
    }

    fn throw(self, env: &mut JNIEnv<'_>) {
        tracing::warn!(status = ?self.status, "{}", self.message);
        throw(env, self.exception_class(), &self.message);
    }

    fn status(self) -> jint {
        tracing::warn!(status = ?self.status, "{}", self.message);
        self.status as jint
    }
}

fn throw(env: &mut JNIEnv<'_>, class: &str, message: &str) {
    if let Err(e) = env.throw_new(class, message) {
        tracing::error!("failed to throw {class}: {e}");
    }
}

fn not_initialised() -> Rejection {
    Rejection::new(BridgeStatus::NotInitialized, "cvg4j bridge used before Load._init")
}

fn register_global(slot: Slot, receiver: GlobalRef) -> Result<(), Rejection> {
    let bridge = bridge::bridge().ok_or_else(not_initialised)?;
    bridge
        .register(slot, receiver)
        .map_err(|e| Rejection::new(BridgeStatus::from(&e), e.to_string()))
}

fn register_receiver(env: &mut JNIEnv<'_>, slot: Slot, receiver: &JObject<'_>) -> Result<(), Rejection> {
    if bridge::bridge().is_none() {
        return Err(not_initialised());
    }
    if receiver.is_null() {
        return Err(Rejection::new(BridgeStatus::InvalidArgument, format!("null receiver for {slot}")));
    }
    let global = env
        .new_global_ref(receiver)
        .map_err(|e| Rejection::new(BridgeStatus::Internal, format!("cannot pin receiver for {slot}: {e}")))?;
    register_global(slot, global)
}

fn slot_from_ordinal(ordinal: jint) -> Result<Slot, Rejection> {
    Slot::from_index(ordinal)
        .ok_or_else(|| Rejection::new(BridgeStatus::InvalidSlot, format!("no callback slot with ordinal {ordinal}")))
}

/// View for `getBufferFromPointer`: `capacity` bytes, or up to the NUL when it is 0.
///
/// # Safety
///
/// `pointer` must be null or valid for the requested bytes for `'a`.
unsafe fn pointer_view<'a>(pointer: jlong, capacity: jint) -> Result<NativeView<'a>, Rejection> {
    let ptr = ptr_from_handle(pointer);
    let view = match usize::try_from(capacity) {
        Ok(0) => unsafe { NativeView::from_c_str(ptr.cast()) },
        Ok(len) => unsafe { NativeView::from_raw(ptr, len) },
        Err(_) => {
            return Err(Rejection::new(
                BridgeStatus::InvalidArgument,
                format!("negative buffer capacity {capacity}"),
            ));
        }
    };
    view.ok_or_else(|| Rejection::new(BridgeStatus::InvalidArgument, "getBufferFromPointer on a null pointer"))
}

// ─── Load ────────────────────────────────────────────────────────────

/// Create the bridge. Later calls are no-ops.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_Load__1init(mut env: JNIEnv, _class: JClass) {
    if let Err(e) = bridge::init(&env) {
        tracing::error!("cvg4j bridge init failed: {e}");
        throw(&mut env, ILLEGAL_STATE, &format!("cvg4j bridge init failed: {e}"));
    }
}

/// Intentionally leaves the bridge in place: other threads may still be
/// delivering callbacks.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_Load__1close(_env: JNIEnv, _class: JClass) {
    tracing::debug!("Load._close: bridge kept alive until process exit");
}

// ─── NativeUtils ─────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_NativeUtils_isNull(
    _env: JNIEnv,
    _class: JClass,
    pointer: jlong,
) -> jboolean {
    if is_null_handle(pointer) { JNI_TRUE } else { JNI_FALSE }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_NativeUtils__1getNullPointer(_env: JNIEnv, _class: JClass) -> jlong {
    NULL_HANDLE
}

/// `sizeof(cl_mem)`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_NativeUtils_sf_1cl_1mem(_env: JNIEnv, _class: JClass) -> jlong {
    size_of::<*mut c_void>() as jlong
}

/// Direct `ByteBuffer` over native memory, without copying.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_clgl_nat_NativeUtils_getBufferFromPointer(
    mut env: JNIEnv,
    _class: JClass,
    pointer: jlong,
    capacity: jint,
) -> jobject {
    let view = match unsafe { pointer_view(pointer, capacity) } {
        Ok(view) => view,
        Err(rejection) => {
            rejection.throw(&mut env);
            return ptr::null_mut();
        }
    };
    match unsafe { env.new_direct_byte_buffer(view.as_ptr().cast_mut(), view.len()) } {
        Ok(buffer) => JObject::from(buffer).into_raw(),
        Err(e) => {
            tracing::warn!("NewDirectByteBuffer failed: {e}");
            ptr::null_mut()
        }
    }
}

// ─── GLFW ────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_glfw3_GLFW__1glfwSetErrorCallback(
    mut env: JNIEnv,
    _class: JClass,
    callback: JObject,
) {
    if let Err(rejection) = register_receiver(&mut env, Slot::GlfwError, &callback) {
        rejection.throw(&mut env);
        return;
    }
    #[cfg(feature = "glfw")]
    native::glfw::set_error_callback();
}

/// Remember the class whose static methods receive window and joystick events.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_glfw3_GLFW_setJavaGLFWWindowClass(
    mut env: JNIEnv,
    _class: JClass,
    window_class: JClass,
) {
    if window_class.is_null() {
        throw(&mut env, ILLEGAL_ARGUMENT, "window class must not be null");
        return;
    }
    match env.new_global_ref(&window_class) {
        Ok(global) => bridge::set_window_class(global),
        Err(e) => throw(&mut env, ILLEGAL_STATE, &format!("cannot pin window class: {e}")),
    }
}

fn set_window_callback(env: &mut JNIEnv<'_>, slot: Slot, window: jlong) {
    if !slot.is_window_event() {
        throw(env, ILLEGAL_ARGUMENT, &format!("{slot} is not a GLFW window callback"));
        return;
    }
    let Some(class) = bridge::window_class() else {
        throw(env, ILLEGAL_STATE, "setJavaGLFWWindowClass has not been called");
        return;
    };
    if let Err(rejection) = register_global(slot, class) {
        rejection.throw(env);
        return;
    }
    #[cfg(feature = "glfw")]
    unsafe {
        native::glfw::set_window_callback(slot, ptr_from_handle(window))
    };
    #[cfg(not(feature = "glfw"))]
    let _ = window;
}

macro_rules! window_callback_exports {
    ($($export:ident => $slot:expr),* $(,)?) => {$(
        /// Route the window's events for this slot to the window class.
        #[unsafe(no_mangle)]
        pub extern "system" fn $export(mut env: JNIEnv, _class: JClass, window: jlong) {
            set_window_callback(&mut env, $slot, window);
        }
    )*};
}

window_callback_exports! {
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetWindowSizeCallback => Slot::GlfwWindowSize,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetFramebufferSizeCallback => Slot::GlfwFramebufferSize,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetKeyCallback => Slot::GlfwKey,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetCharCallback => Slot::GlfwChar,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetCursorPosCallback => Slot::GlfwCursorPos,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetCursorEnterCallback => Slot::GlfwCursorEnter,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetMouseButtonCallback => Slot::GlfwMouseButton,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetScrollCallback => Slot::GlfwScroll,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetDropCallback => Slot::GlfwDrop,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetWindowRefreshCallback => Slot::GlfwWindowRefresh,
    Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetWindowIconifyCallback => Slot::GlfwWindowIconify,
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_glfw3_GLFW_glfwSetJoystickCallback(mut env: JNIEnv, _class: JClass) {
    let Some(class) = bridge::window_class() else {
        throw(&mut env, ILLEGAL_STATE, "setJavaGLFWWindowClass has not been called");
        return;
    };
    if let Err(rejection) = register_global(Slot::GlfwJoystick, class) {
        rejection.throw(&mut env);
        return;
    }
    #[cfg(feature = "glfw")]
    native::glfw::set_joystick_callback();
}

// ─── OpenGL ──────────────────────────────────────────────────────────

/// Register only once the native side can take the thunk, so a failed install
/// never leaves a receiver behind.
fn register_when_ready(
    ready: Result<(), Rejection>,
    register: impl FnOnce() -> Result<(), Rejection>,
) -> Result<(), Rejection> {
    ready?;
    register()
}

fn gl_ready() -> Result<(), Rejection> {
    #[cfg(feature = "glad")]
    if !native::glad::is_loaded() {
        return Err(Rejection::new(
            BridgeStatus::NotInitialized,
            "OpenGL is not loaded; call gladLoadGL first",
        ));
    }
    Ok(())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_glad_Glad_glDebugMessageCallback(
    mut env: JNIEnv,
    _class: JClass,
    callback: JObject,
    user_param: jlong,
) {
    let registered = register_when_ready(gl_ready(), || {
        register_receiver(&mut env, Slot::GlDebugMessage, &callback)
    });
    if let Err(rejection) = registered {
        rejection.throw(&mut env);
        return;
    }
    #[cfg(feature = "glad")]
    if !native::glad::set_debug_message_callback(ptr_from_handle(user_param)) {
        tracing::warn!("glDebugMessageCallback unavailable after load check");
    }
    #[cfg(not(feature = "glad"))]
    let _ = user_param;
}

// ─── OpenCL ──────────────────────────────────────────────────────────

#[cfg(feature = "opencl")]
mod opencl_exports {
    use std::ffi::{c_uint, CString};
    use std::ptr;

    use jni::objects::{JByteBuffer, JClass, JString};
    use jni::sys::{jint, jlong};
    use jni::JNIEnv;

    use cvg4j_trampoline::marshal::{handle_from_ptr, ptr_from_handle};
    use cvg4j_trampoline::Slot;

    use super::{native, register_receiver};
    use crate::bridge;

    fn direct_address(env: &JNIEnv<'_>, buffer: &JByteBuffer<'_>) -> *mut u8 {
        if buffer.is_null() {
            return ptr::null_mut();
        }
        env.get_direct_buffer_address(buffer).unwrap_or(ptr::null_mut())
    }

    /// The first non-null callback class stays registered for the process.
    fn register_once(env: &mut JNIEnv<'_>, slot: Slot, callback: &JClass<'_>) {
        if callback.is_null() || bridge::bridge().is_some_and(|b| b.is_registered(slot)) {
            return;
        }
        if let Err(rejection) = register_receiver(env, slot, callback) {
            rejection.status();
        }
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_de_linusdev_clgl_nat_cl_CL__1clCreateContext(
        mut env: JNIEnv,
        _class: JClass,
        p_properties: JByteBuffer,
        num_devices: jint,
        p_devices: JByteBuffer,
        callback: JClass,
        user_data: jlong,
        p_errcode_ret: JByteBuffer,
    ) -> jlong {
        register_once(&mut env, Slot::ClContextError, &callback);

        let properties = direct_address(&env, &p_properties);
        let devices = direct_address(&env, &p_devices);
        let errcode_ret = direct_address(&env, &p_errcode_ret);
        let context = unsafe {
            native::opencl::create_context(
                properties.cast(),
                num_devices as c_uint,
                devices.cast(),
                ptr_from_handle(user_data),
                errcode_ret.cast(),
            )
        };
        handle_from_ptr(context)
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_de_linusdev_clgl_nat_cl_CL__1clBuildProgram(
        mut env: JNIEnv,
        _class: JClass,
        program: jlong,
        num_devices: jint,
        p_device_list: JByteBuffer,
        options: JString,
        callback: JClass,
        user_data: jlong,
    ) -> jint {
        register_once(&mut env, Slot::ClProgramBuildFinished, &callback);

        let device_list = direct_address(&env, &p_device_list);
        let options = if options.is_null() {
            None
        } else {
            env.get_string(&options)
                .ok()
                .and_then(|s| CString::new(String::from(s)).ok())
        };
        unsafe {
            native::opencl::build_program(
                ptr_from_handle(program),
                num_devices as c_uint,
                device_list.cast(),
                options.as_ref().map_or(ptr::null(), |o| o.as_ptr()),
                ptr_from_handle(user_data),
            )
        }
    }
}

// ─── Vulkan ──────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_vulkan_VulkanNatDebugUtilsMessageCallback_setCallbackClass(
    mut env: JNIEnv,
    _class: JClass,
    callback_class: JClass,
) {
    if let Err(rejection) = register_receiver(&mut env, Slot::VkDebugUtilsMessenger, &callback_class) {
        rejection.throw(&mut env);
    }
}

/// Value for `VkDebugUtilsMessengerCreateInfoEXT::pfnUserCallback`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_vulkan_VulkanNatDebugUtilsMessageCallback_getVulkanDebugCallbackFunPointer(
    _env: JNIEnv,
    _class: JClass,
) -> jlong {
    thunk::fn_pointer(Slot::VkDebugUtilsMessenger) as jlong
}

// ─── NativeCallbacks ─────────────────────────────────────────────────

/// Register `receiver` for the slot with the given ordinal. Static slots take a `Class`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_NativeCallbacks_register(
    mut env: JNIEnv,
    _class: JClass,
    slot: jint,
    receiver: JObject,
) -> jint {
    let registered = slot_from_ordinal(slot).and_then(|slot| register_receiver(&mut env, slot, &receiver));
    match registered {
        Ok(()) => BridgeStatus::Ok as jint,
        Err(rejection) => rejection.status(),
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_NativeCallbacks_unregister(
    _env: JNIEnv,
    _class: JClass,
    slot: jint,
) -> jboolean {
    let removed = match (bridge::bridge(), Slot::from_index(slot)) {
        (Some(bridge), Some(slot)) => bridge.unregister(slot),
        _ => false,
    };
    if removed { JNI_TRUE } else { JNI_FALSE }
}

/// Address of the slot's thunk, or 0 for an unknown ordinal.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_NativeCallbacks_getFunPointer(
    _env: JNIEnv,
    _class: JClass,
    slot: jint,
) -> jlong {
    Slot::from_index(slot).map_or(NULL_HANDLE, |slot| handle_from_ptr(thunk::fn_pointer(slot) as *const c_void))
}

/// Bridge counters as JSON, or null before `Load._init`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_de_linusdev_cvg4j_nat_NativeCallbacks_getStatsJson(mut env: JNIEnv, _class: JClass) -> jstring {
    let Some(bridge) = bridge::bridge() else {
        return ptr::null_mut();
    };
    let json = match serde_json::to_string(&bridge.stats()) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("cannot serialise bridge stats: {e}");
            return ptr::null_mut();
        }
    };
    match env.new_string(json) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
