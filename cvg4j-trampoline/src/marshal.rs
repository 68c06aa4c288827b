//! Marshaling between native callback arguments and managed call arguments.
//!
//! Nothing in here copies native memory. Text is borrowed when it is valid
//! UTF-8 and only re-encoded when it is not; buffers are handed to the managed
//! side as views over the caller's memory, which stays caller-owned.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr};
use std::marker::PhantomData;

use crate::slot::ReturnShape;

/// The opaque handle value of a null native pointer.
pub const NULL_HANDLE: i64 = 0;

/// Convert a native pointer into the fixed-width handle the managed side stores.
pub fn handle_from_ptr<T>(ptr: *const T) -> i64 {
    ptr as usize as i64
}

/// Convert a managed handle back into a native pointer. No validation happens here.
pub fn ptr_from_handle(handle: i64) -> *mut c_void {
    handle as usize as *mut c_void
}

pub fn is_null_handle(handle: i64) -> bool {
    ptr_from_handle(handle).is_null()
}

/// Zero-copy view over native memory owned by someone else.
#[derive(Debug, Clone, Copy)]
pub struct NativeView<'a> {
    ptr: *const u8,
    len: usize,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> NativeView<'a> {
    /// Wrap `len` bytes at `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or valid for reads of `len` bytes for `'a`.
    pub unsafe fn from_raw(ptr: *const c_void, len: usize) -> Option<NativeView<'a>> {
        if ptr.is_null() {
            return None;
        }
        Some(NativeView {
            ptr: ptr.cast(),
            len,
            _borrow: PhantomData,
        })
    }

    /// View over a NUL-terminated native string, terminator excluded.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
    pub unsafe fn from_c_str(ptr: *const c_char) -> Option<NativeView<'a>> {
        if ptr.is_null() {
            return None;
        }
        let len = unsafe { CStr::from_ptr(ptr) }.to_bytes().len();
        unsafe { NativeView::from_raw(ptr.cast(), len) }
    }

    pub fn from_slice(bytes: &'a [u8]) -> NativeView<'a> {
        NativeView {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
            _borrow: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: constructors guarantee a non-null pointer valid for `len` bytes over 'a.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

/// One argument of a managed call, in the managed calling convention.
#[derive(Debug, Clone)]
pub enum ManagedArg<'a> {
    Int(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Text(Cow<'a, str>),
    View(NativeView<'a>),
    /// A null native pointer where the managed side expects an object.
    Null,
}

impl<'a> ManagedArg<'a> {
    /// Marshal a native pointer-sized handle.
    pub fn handle<T>(ptr: *const T) -> ManagedArg<'a> {
        ManagedArg::Long(handle_from_ptr(ptr))
    }

    /// Marshal a C boolean (`int`, nonzero is true).
    pub fn flag(value: i32) -> ManagedArg<'a> {
        ManagedArg::Boolean(value != 0)
    }

    /// Marshal an unsigned native value into a managed `int`, keeping the bit pattern.
    pub fn bits(value: u32) -> ManagedArg<'a> {
        ManagedArg::Int(value as i32)
    }

    /// Transcode a NUL-terminated native string.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
    pub unsafe fn c_text(ptr: *const c_char) -> ManagedArg<'a> {
        if ptr.is_null() {
            return ManagedArg::Null;
        }
        ManagedArg::Text(unsafe { CStr::from_ptr(ptr) }.to_string_lossy())
    }

    /// Wrap native memory as a view, or `Null` for a null pointer.
    ///
    /// # Safety
    ///
    /// Same contract as [`NativeView::from_raw`].
    pub unsafe fn view(ptr: *const c_void, len: usize) -> ManagedArg<'a> {
        match unsafe { NativeView::from_raw(ptr, len) } {
            Some(view) => ManagedArg::View(view),
            None => ManagedArg::Null,
        }
    }

    /// View over an array of `count` native string pointers (GLFW drop paths).
    ///
    /// # Safety
    ///
    /// `paths` must be null or valid for reads of `count` pointers for `'a`.
    pub unsafe fn pointer_array(paths: *const *const c_char, count: i32) -> ManagedArg<'a> {
        let len = usize::try_from(count).unwrap_or(0) * size_of::<*const c_char>();
        unsafe { ManagedArg::view(paths.cast(), len) }
    }

    /// True for arguments that become temporary managed objects during a call.
    pub fn is_temporary(&self) -> bool {
        matches!(self, ManagedArg::Text(_) | ManagedArg::View(_))
    }
}

/// The value a managed entry point handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedReturn {
    Void,
    Boolean(bool),
}

impl ManagedReturn {
    /// The deterministic value returned to the native caller when the managed call fails.
    pub fn fallback(shape: ReturnShape) -> ManagedReturn {
        match shape {
            ReturnShape::Void => ManagedReturn::Void,
            ReturnShape::Boolean => ManagedReturn::Boolean(false),
        }
    }

    pub fn as_bool(self) -> bool {
        matches!(self, ManagedReturn::Boolean(true))
    }

    /// `VK_TRUE` / `VK_FALSE`.
    pub fn to_native_bool(self) -> u32 {
        u32::from(self.as_bool())
    }

    /// Whether this value has the shape the slot promised.
    pub fn matches(self, shape: ReturnShape) -> bool {
        matches!(
            (self, shape),
            (ManagedReturn::Void, ReturnShape::Void) | (ManagedReturn::Boolean(_), ReturnShape::Boolean)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn handles_round_trip_pointers() {
        let value = 7u32;
        let ptr: *const u32 = &value;
        let handle = handle_from_ptr(ptr);
        assert_eq!(ptr_from_handle(handle) as *const u32, ptr);
        assert!(!is_null_handle(handle));
        assert!(is_null_handle(NULL_HANDLE));
        assert_eq!(handle_from_ptr(std::ptr::null::<u8>()), NULL_HANDLE);
    }

    #[test]
    fn null_pointers_marshal_to_null() {
        let text = unsafe { ManagedArg::c_text(std::ptr::null()) };
        assert!(matches!(text, ManagedArg::Null));
        let view = unsafe { ManagedArg::view(std::ptr::null(), 16) };
        assert!(matches!(view, ManagedArg::Null));
        assert!(unsafe { NativeView::from_c_str(std::ptr::null()) }.is_none());
    }

    #[test]
    fn c_text_borrows_valid_utf8() {
        let s = CString::new("GLFW_NOT_INITIALIZED").unwrap();
        match unsafe { ManagedArg::c_text(s.as_ptr()) } {
            ManagedArg::Text(Cow::Borrowed(t)) => assert_eq!(t, "GLFW_NOT_INITIALIZED"),
            other => panic!("expected borrowed text, got {other:?}"),
        }
    }

    #[test]
    fn c_text_replaces_invalid_utf8() {
        let s = CString::new(vec![b'a', 0xff, b'b']).unwrap();
        match unsafe { ManagedArg::c_text(s.as_ptr()) } {
            ManagedArg::Text(t) => assert_eq!(t, "a\u{fffd}b"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn c_str_view_excludes_terminator() {
        let s = CString::new("build log").unwrap();
        let view = unsafe { NativeView::from_c_str(s.as_ptr()) }.unwrap();
        assert_eq!(view.len(), 9);
        assert_eq!(view.as_bytes(), b"build log");
    }

    #[test]
    fn pointer_array_length_scales_with_count() {
        let a = CString::new("/tmp/a").unwrap();
        let b = CString::new("/tmp/b").unwrap();
        let paths = [a.as_ptr(), b.as_ptr()];
        match unsafe { ManagedArg::pointer_array(paths.as_ptr(), 2) } {
            ManagedArg::View(v) => {
                assert_eq!(v.len(), 2 * size_of::<*const c_char>());
                assert_eq!(v.as_ptr(), paths.as_ptr().cast());
            }
            other => panic!("expected view, got {other:?}"),
        }
        match unsafe { ManagedArg::pointer_array(paths.as_ptr(), -3) } {
            ManagedArg::View(v) => assert!(v.is_empty()),
            other => panic!("expected view, got {other:?}"),
        }
    }

    #[test]
    fn unsigned_bits_survive_narrowing() {
        match ManagedArg::bits(0x9146) {
            ManagedArg::Int(v) => assert_eq!(v, 0x9146),
            other => panic!("{other:?}"),
        }
        match ManagedArg::bits(u32::MAX) {
            ManagedArg::Int(v) => assert_eq!(v as u32, u32::MAX),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn fallback_values() {
        assert_eq!(ManagedReturn::fallback(ReturnShape::Void), ManagedReturn::Void);
        assert_eq!(ManagedReturn::fallback(ReturnShape::Boolean), ManagedReturn::Boolean(false));
        assert_eq!(ManagedReturn::fallback(ReturnShape::Boolean).to_native_bool(), 0);
        assert_eq!(ManagedReturn::Boolean(true).to_native_bool(), 1);
        assert!(ManagedReturn::Void.matches(ReturnShape::Void));
        assert!(!ManagedReturn::Void.matches(ReturnShape::Boolean));
    }
}
