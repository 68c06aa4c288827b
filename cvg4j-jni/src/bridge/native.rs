//! Native library entry points the registration exports install thunks into.
//!
//! Only compiled with the `glfw`, `glad` or `opencl` features; without them
//! the managed side passes [`thunk::fn_pointer`] values to the libraries itself.

#![allow(non_snake_case)]

#[cfg(feature = "glfw")]
pub(crate) mod glfw {
    use std::ffi::{c_char, c_int, c_uint, c_void};

    use cvg4j_trampoline::{thunk, Slot};

    type Window = c_void;
    type SizeFun = unsafe extern "C" fn(*mut Window, c_int, c_int);
    type KeyFun = unsafe extern "C" fn(*mut Window, c_int, c_int, c_int, c_int);
    type CharFun = unsafe extern "C" fn(*mut Window, c_uint);
    type PosFun = unsafe extern "C" fn(*mut Window, f64, f64);
    type FlagFun = unsafe extern "C" fn(*mut Window, c_int);
    type ButtonFun = unsafe extern "C" fn(*mut Window, c_int, c_int, c_int);
    type DropFun = unsafe extern "C" fn(*mut Window, c_int, *const *const c_char);
    type RefreshFun = unsafe extern "C" fn(*mut Window);

    // Previous callbacks come back as plain pointers; nothing here chains them.
    #[link(name = "glfw")]
    unsafe extern "C" {
        fn glfwSetErrorCallback(cb: Option<unsafe extern "C" fn(c_int, *const c_char)>) -> *const c_void;
        fn glfwSetJoystickCallback(cb: Option<unsafe extern "C" fn(c_int, c_int)>) -> *const c_void;
        fn glfwSetWindowSizeCallback(w: *mut Window, cb: Option<SizeFun>) -> *const c_void;
        fn glfwSetFramebufferSizeCallback(w: *mut Window, cb: Option<SizeFun>) -> *const c_void;
        fn glfwSetKeyCallback(w: *mut Window, cb: Option<KeyFun>) -> *const c_void;
        fn glfwSetCharCallback(w: *mut Window, cb: Option<CharFun>) -> *const c_void;
        fn glfwSetCursorPosCallback(w: *mut Window, cb: Option<PosFun>) -> *const c_void;
        fn glfwSetCursorEnterCallback(w: *mut Window, cb: Option<FlagFun>) -> *const c_void;
        fn glfwSetMouseButtonCallback(w: *mut Window, cb: Option<ButtonFun>) -> *const c_void;
        fn glfwSetScrollCallback(w: *mut Window, cb: Option<PosFun>) -> *const c_void;
        fn glfwSetDropCallback(w: *mut Window, cb: Option<DropFun>) -> *const c_void;
        fn glfwSetWindowRefreshCallback(w: *mut Window, cb: Option<RefreshFun>) -> *const c_void;
        fn glfwSetWindowIconifyCallback(w: *mut Window, cb: Option<FlagFun>) -> *const c_void;
    }

    pub(crate) fn set_error_callback() {
        unsafe { glfwSetErrorCallback(Some(thunk::glfw_error)) };
    }

    pub(crate) fn set_joystick_callback() {
        unsafe { glfwSetJoystickCallback(Some(thunk::glfw_joystick)) };
    }

    /// Point the window's callback for `slot` at its thunk.
    ///
    /// # Safety
    ///
    /// `window` must be a live `GLFWwindow*` and the call must happen on the main thread.
    pub(crate) unsafe fn set_window_callback(slot: Slot, window: *mut Window) {
        unsafe {
            match slot {
                Slot::GlfwWindowSize => glfwSetWindowSizeCallback(window, Some(thunk::glfw_window_size)),
                Slot::GlfwFramebufferSize => {
                    glfwSetFramebufferSizeCallback(window, Some(thunk::glfw_framebuffer_size))
                }
                Slot::GlfwKey => glfwSetKeyCallback(window, Some(thunk::glfw_key)),
                Slot::GlfwChar => glfwSetCharCallback(window, Some(thunk::glfw_char)),
                Slot::GlfwCursorPos => glfwSetCursorPosCallback(window, Some(thunk::glfw_cursor_pos)),
                Slot::GlfwCursorEnter => glfwSetCursorEnterCallback(window, Some(thunk::glfw_cursor_enter)),
                Slot::GlfwMouseButton => glfwSetMouseButtonCallback(window, Some(thunk::glfw_mouse_button)),
                Slot::GlfwScroll => glfwSetScrollCallback(window, Some(thunk::glfw_scroll)),
                Slot::GlfwDrop => glfwSetDropCallback(window, Some(thunk::glfw_drop)),
                Slot::GlfwWindowRefresh => glfwSetWindowRefreshCallback(window, Some(thunk::glfw_window_refresh)),
                Slot::GlfwWindowIconify => glfwSetWindowIconifyCallback(window, Some(thunk::glfw_window_iconify)),
                other => {
                    tracing::warn!(slot = %other, "not a GLFW window callback");
                    return;
                }
            };
        }
    }
}

#[cfg(feature = "glad")]
pub(crate) mod glad {
    use std::ffi::{c_char, c_int, c_uint, c_void};
    use std::ptr;

    use cvg4j_trampoline::thunk;

    const GL_DONT_CARE: c_uint = 0x1100;
    const GL_TRUE: u8 = 1;

    type DebugProc = unsafe extern "system" fn(c_uint, c_uint, c_uint, c_uint, c_int, *const c_char, *const c_void);
    type DebugMessageCallback = unsafe extern "system" fn(Option<DebugProc>, *const c_void);
    type DebugMessageControl = unsafe extern "system" fn(c_uint, c_uint, c_uint, c_int, *const c_uint, u8);

    // glad exposes GL entry points as function pointer variables filled in by gladLoadGL.
    #[link(name = "glad")]
    unsafe extern "C" {
        static glad_glDebugMessageCallback: Option<DebugMessageCallback>;
        static glad_glDebugMessageControl: Option<DebugMessageControl>;
    }

    /// Whether `gladLoadGL` has filled in the debug output entry points.
    pub(crate) fn is_loaded() -> bool {
        unsafe { glad_glDebugMessageControl.is_some() && glad_glDebugMessageCallback.is_some() }
    }

    /// Enable every debug message and route them to the GL thunk.
    /// Returns false if GL has not been loaded on this thread yet.
    pub(crate) fn set_debug_message_callback(user_param: *const c_void) -> bool {
        let (Some(control), Some(callback)) = (unsafe { (glad_glDebugMessageControl, glad_glDebugMessageCallback) })
        else {
            return false;
        };
        unsafe {
            control(GL_DONT_CARE, GL_DONT_CARE, GL_DONT_CARE, 0, ptr::null(), GL_TRUE);
            callback(Some(thunk::gl_debug_message), user_param);
        }
        true
    }
}

#[cfg(feature = "opencl")]
pub(crate) mod opencl {
    use std::ffi::{c_char, c_uint, c_void};

    use cvg4j_trampoline::thunk;

    type ContextNotify = unsafe extern "system" fn(*const c_char, *const c_void, usize, *mut c_void);
    type BuildNotify = unsafe extern "system" fn(*mut c_void, *mut c_void);

    #[link(name = "OpenCL")]
    unsafe extern "system" {
        fn clCreateContext(
            properties: *const isize,
            num_devices: c_uint,
            devices: *const *mut c_void,
            pfn_notify: Option<ContextNotify>,
            user_data: *mut c_void,
            errcode_ret: *mut i32,
        ) -> *mut c_void;

        fn clBuildProgram(
            program: *mut c_void,
            num_devices: c_uint,
            device_list: *const *mut c_void,
            options: *const c_char,
            pfn_notify: Option<BuildNotify>,
            user_data: *mut c_void,
        ) -> i32;
    }

    /// `clCreateContext` with the context error thunk as `pfn_notify`.
    ///
    /// # Safety
    ///
    /// Pointers must satisfy `clCreateContext`'s contract.
    pub(crate) unsafe fn create_context(
        properties: *const isize,
        num_devices: c_uint,
        devices: *const *mut c_void,
        user_data: *mut c_void,
        errcode_ret: *mut i32,
    ) -> *mut c_void {
        unsafe {
            clCreateContext(
                properties,
                num_devices,
                devices,
                Some(thunk::cl_context_error),
                user_data,
                errcode_ret,
            )
        }
    }

    /// `clBuildProgram` with the build-finished thunk as `pfn_notify`.
    ///
    /// # Safety
    ///
    /// Pointers must satisfy `clBuildProgram`'s contract.
    pub(crate) unsafe fn build_program(
        program: *mut c_void,
        num_devices: c_uint,
        device_list: *const *mut c_void,
        options: *const c_char,
        user_data: *mut c_void,
    ) -> i32 {
        unsafe {
            clBuildProgram(
                program,
                num_devices,
                device_list,
                options,
                Some(thunk::cl_program_build_finished),
                user_data,
            )
        }
    }
}
