//! Synthetic native events.
//!
//! Every event is derived from a sequence number so the receiving side can
//! recompute what it should have seen. The sequence number travels in the
//! first handle argument (offset by one so it is never null), or in the first
//! int for the slots without a handle.

use std::ffi::{c_char, c_void, CString};
use std::ptr;

use cvg4j_trampoline::{thunk, ManagedArg, Slot};

/// What one managed argument must look like.
#[derive(Debug, Clone, PartialEq)]
pub enum Expect {
    Int(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
    Bytes(Vec<u8>),
    /// A view over this many native pointers.
    Pointers(usize),
}

fn handle(seq: u32) -> i64 {
    i64::from(seq) + 1
}

fn raw_handle(seq: u32) -> *mut c_void {
    handle(seq) as usize as *mut c_void
}

fn error_text(seq: u32) -> String {
    format!("probe error #{seq}")
}

fn payload(seq: u32) -> Vec<u8> {
    let len = (seq % 64) as usize + 1;
    (0..len).map(|i| (seq as usize + i) as u8).collect()
}

fn drop_paths(seq: u32) -> Vec<String> {
    (0..seq % 4 + 1).map(|i| format!("/tmp/probe/{seq}/{i}")).collect()
}

/// The arguments a receiver must see for event `seq` on `slot`.
pub fn expected(slot: Slot, seq: u32) -> Vec<Expect> {
    let n = seq as i32;
    match slot {
        Slot::GlfwError => vec![Expect::Int(n), Expect::Text(error_text(seq))],
        Slot::GlDebugMessage => vec![
            Expect::Int(0x8246),
            Expect::Int(0x824C),
            Expect::Int(n),
            Expect::Int(0x9146),
            Expect::Bytes(payload(seq)),
            Expect::Long(handle(seq)),
        ],
        Slot::ClContextError => vec![
            Expect::Text(error_text(seq)),
            Expect::Bytes(payload(seq)),
            Expect::Long(handle(seq)),
        ],
        Slot::ClProgramBuildFinished => vec![Expect::Long(handle(seq)), Expect::Long(-1)],
        Slot::VkDebugUtilsMessenger => vec![
            Expect::Int(0x1000),
            Expect::Int(0x2),
            Expect::Long(0),
            Expect::Long(handle(seq)),
        ],
        Slot::GlfwWindowSize | Slot::GlfwFramebufferSize => {
            vec![Expect::Long(handle(seq)), Expect::Int(n % 4096), Expect::Int(n % 2160)]
        }
        Slot::GlfwKey => vec![
            Expect::Long(handle(seq)),
            Expect::Int(n % 348),
            Expect::Int(n % 512),
            Expect::Int(n % 3),
            Expect::Int(n % 64),
        ],
        // Codepoints above i32::MAX keep their bit pattern.
        Slot::GlfwChar => vec![Expect::Long(handle(seq)), Expect::Int((0x8000_0000u32 | seq) as i32)],
        Slot::GlfwCursorPos | Slot::GlfwScroll => vec![
            Expect::Long(handle(seq)),
            Expect::Double(f64::from(seq) * 0.5),
            Expect::Double(-f64::from(seq)),
        ],
        Slot::GlfwCursorEnter | Slot::GlfwWindowIconify => {
            vec![Expect::Long(handle(seq)), Expect::Boolean(seq % 2 == 1)]
        }
        Slot::GlfwMouseButton => vec![
            Expect::Long(handle(seq)),
            Expect::Int(n % 8),
            Expect::Int(n % 2),
            Expect::Int(n % 64),
        ],
        Slot::GlfwJoystick => vec![Expect::Int(n), Expect::Int(0x0004_0001 + n % 2)],
        Slot::GlfwDrop => vec![
            Expect::Long(handle(seq)),
            Expect::Int(drop_paths(seq).len() as i32),
            Expect::Pointers(drop_paths(seq).len()),
        ],
        Slot::GlfwWindowRefresh => vec![Expect::Long(handle(seq))],
    }
}

/// Recover the sequence number an event was built from.
pub fn sequence(slot: Slot, args: &[ManagedArg<'_>]) -> Option<u32> {
    let raw = match (slot, args) {
        (Slot::GlfwError | Slot::GlfwJoystick, [ManagedArg::Int(n), ..]) => i64::from(*n),
        (Slot::GlDebugMessage, [.., ManagedArg::Long(h)]) => h - 1,
        (Slot::ClContextError, [_, _, ManagedArg::Long(h)]) => h - 1,
        (Slot::VkDebugUtilsMessenger, [.., ManagedArg::Long(h)]) => h - 1,
        (_, [ManagedArg::Long(h), ..]) => h - 1,
        _ => return None,
    };
    u32::try_from(raw).ok()
}

fn matches(arg: &ManagedArg<'_>, expect: &Expect) -> bool {
    match (arg, expect) {
        (ManagedArg::Int(a), Expect::Int(b)) => a == b,
        (ManagedArg::Long(a), Expect::Long(b)) => a == b,
        (ManagedArg::Double(a), Expect::Double(b)) => a.to_bits() == b.to_bits(),
        (ManagedArg::Boolean(a), Expect::Boolean(b)) => a == b,
        (ManagedArg::Text(a), Expect::Text(b)) => a == b,
        (ManagedArg::View(view), Expect::Bytes(b)) => view.as_bytes() == b.as_slice(),
        (ManagedArg::View(view), Expect::Pointers(n)) => view.len() == n * size_of::<*const c_char>(),
        _ => false,
    }
}

/// True if `args` is exactly what [`fire`] sent for its sequence number.
pub fn verify(slot: Slot, args: &[ManagedArg<'_>]) -> bool {
    let Some(seq) = sequence(slot, args) else {
        return false;
    };
    let expected = expected(slot, seq);
    args.len() == expected.len() && args.iter().zip(&expected).all(|(a, e)| matches(a, e))
}

/// Call the thunk for `slot` the way its native library would.
pub fn fire(slot: Slot, seq: u32) {
    let n = seq as i32;
    let window = raw_handle(seq);
    match slot {
        Slot::GlfwError => {
            let text = c_string(error_text(seq));
            unsafe { thunk::glfw_error(n, text.as_ptr()) };
        }
        Slot::GlDebugMessage => {
            let message = payload(seq);
            unsafe {
                thunk::gl_debug_message(
                    0x8246,
                    0x824C,
                    seq,
                    0x9146,
                    message.len() as i32,
                    message.as_ptr().cast(),
                    window,
                )
            };
        }
        Slot::ClContextError => {
            let text = c_string(error_text(seq));
            let private = payload(seq);
            unsafe { thunk::cl_context_error(text.as_ptr(), private.as_ptr().cast(), private.len(), window) };
        }
        Slot::ClProgramBuildFinished => {
            thunk::cl_program_build_finished(window, usize::MAX as *mut c_void);
        }
        Slot::VkDebugUtilsMessenger => {
            thunk::vk_debug_utils_messenger(0x1000, 0x2, ptr::null(), window);
        }
        Slot::GlfwWindowSize => thunk::glfw_window_size(window, n % 4096, n % 2160),
        Slot::GlfwFramebufferSize => thunk::glfw_framebuffer_size(window, n % 4096, n % 2160),
        Slot::GlfwKey => thunk::glfw_key(window, n % 348, n % 512, n % 3, n % 64),
        Slot::GlfwChar => thunk::glfw_char(window, 0x8000_0000 | seq),
        Slot::GlfwCursorPos => thunk::glfw_cursor_pos(window, f64::from(seq) * 0.5, -f64::from(seq)),
        Slot::GlfwScroll => thunk::glfw_scroll(window, f64::from(seq) * 0.5, -f64::from(seq)),
        Slot::GlfwCursorEnter => thunk::glfw_cursor_enter(window, (seq % 2) as i32),
        Slot::GlfwWindowIconify => thunk::glfw_window_iconify(window, (seq % 2) as i32),
        Slot::GlfwMouseButton => thunk::glfw_mouse_button(window, n % 8, n % 2, n % 64),
        Slot::GlfwJoystick => thunk::glfw_joystick(n, 0x0004_0001 + n % 2),
        Slot::GlfwDrop => {
            let paths: Vec<CString> = drop_paths(seq).into_iter().map(c_string).collect();
            let ptrs: Vec<*const c_char> = paths.iter().map(|p| p.as_ptr()).collect();
            unsafe { thunk::glfw_drop(window, ptrs.len() as i32, ptrs.as_ptr()) };
        }
        Slot::GlfwWindowRefresh => thunk::glfw_window_refresh(window),
    }
}

fn c_string(text: String) -> CString {
    // Generated text never contains NUL.
    CString::new(text).unwrap_or_default()
}
