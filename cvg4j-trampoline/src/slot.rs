//! Callback slots: one per distinct native callback type.
//!
//! Every slot has exactly one managed entry point. The method names and JNI
//! signatures are part of the contract with the Java classes, so they are
//! fixed here rather than supplied by the caller.

use std::fmt;

use serde::Serialize;

/// How the managed entry point is reached from the registered receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Receiver is an object; the entry point is an instance method on its class.
    Instance,
    /// Receiver is a class; the entry point is a static method on it.
    Static,
}

/// What the native caller expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnShape {
    Void,
    /// A boolean flag (e.g. Vulkan's "abort the call" `VkBool32`).
    Boolean,
}

/// Static description of a slot's managed entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    pub slot: Slot,
    pub method: &'static str,
    pub signature: &'static str,
    pub dispatch: Dispatch,
    pub returns: ReturnShape,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    GlfwError = 0,
    GlDebugMessage,
    ClContextError,
    ClProgramBuildFinished,
    VkDebugUtilsMessenger,
    GlfwWindowSize,
    GlfwFramebufferSize,
    GlfwKey,
    GlfwChar,
    GlfwCursorPos,
    GlfwCursorEnter,
    GlfwMouseButton,
    GlfwScroll,
    GlfwJoystick,
    GlfwDrop,
    GlfwWindowRefresh,
    GlfwWindowIconify,
}

impl Slot {
    pub const COUNT: usize = 17;

    /// All slots in ordinal order. Managed callers refer to slots by this ordinal.
    pub const ALL: [Slot; Slot::COUNT] = [
        Slot::GlfwError,
        Slot::GlDebugMessage,
        Slot::ClContextError,
        Slot::ClProgramBuildFinished,
        Slot::VkDebugUtilsMessenger,
        Slot::GlfwWindowSize,
        Slot::GlfwFramebufferSize,
        Slot::GlfwKey,
        Slot::GlfwChar,
        Slot::GlfwCursorPos,
        Slot::GlfwCursorEnter,
        Slot::GlfwMouseButton,
        Slot::GlfwScroll,
        Slot::GlfwJoystick,
        Slot::GlfwDrop,
        Slot::GlfwWindowRefresh,
        Slot::GlfwWindowIconify,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Look a slot up by the ordinal a managed caller passed in.
    pub fn from_index(index: i32) -> Option<Slot> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Slot::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::GlfwError => "glfw_error",
            Slot::GlDebugMessage => "gl_debug_message",
            Slot::ClContextError => "cl_context_error",
            Slot::ClProgramBuildFinished => "cl_program_build_finished",
            Slot::VkDebugUtilsMessenger => "vk_debug_utils_messenger",
            Slot::GlfwWindowSize => "glfw_window_size",
            Slot::GlfwFramebufferSize => "glfw_framebuffer_size",
            Slot::GlfwKey => "glfw_key",
            Slot::GlfwChar => "glfw_char",
            Slot::GlfwCursorPos => "glfw_cursor_pos",
            Slot::GlfwCursorEnter => "glfw_cursor_enter",
            Slot::GlfwMouseButton => "glfw_mouse_button",
            Slot::GlfwScroll => "glfw_scroll",
            Slot::GlfwJoystick => "glfw_joystick",
            Slot::GlfwDrop => "glfw_drop",
            Slot::GlfwWindowRefresh => "glfw_window_refresh",
            Slot::GlfwWindowIconify => "glfw_window_iconify",
        }
    }

    pub fn from_name(name: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|s| s.name() == name)
    }

    /// True for the per-window GLFW slots whose receiver is the shared window class.
    pub fn is_window_event(self) -> bool {
        matches!(
            self,
            Slot::GlfwWindowSize
                | Slot::GlfwFramebufferSize
                | Slot::GlfwKey
                | Slot::GlfwChar
                | Slot::GlfwCursorPos
                | Slot::GlfwCursorEnter
                | Slot::GlfwMouseButton
                | Slot::GlfwScroll
                | Slot::GlfwDrop
                | Slot::GlfwWindowRefresh
                | Slot::GlfwWindowIconify
        )
    }

    pub fn spec(self) -> SlotSpec {
        use Dispatch::{Instance, Static};
        use ReturnShape::{Boolean, Void};

        let (method, signature, dispatch, returns) = match self {
            Slot::GlfwError => ("onError", "(ILjava/lang/String;)V", Instance, Void),
            Slot::GlDebugMessage => ("message", "(IIIILjava/nio/ByteBuffer;J)V", Instance, Void),
            Slot::ClContextError => (
                "onErrorStatic",
                "(Ljava/lang/String;Ljava/nio/ByteBuffer;J)V",
                Static,
                Void,
            ),
            Slot::ClProgramBuildFinished => ("onProgramBuildFinishedStatic", "(JJ)V", Static, Void),
            Slot::VkDebugUtilsMessenger => ("callback", "(IIJJ)Z", Static, Boolean),
            Slot::GlfwWindowSize => ("window_size_callback", "(JII)V", Static, Void),
            Slot::GlfwFramebufferSize => ("framebuffer_size_callback", "(JII)V", Static, Void),
            Slot::GlfwKey => ("key_callback", "(JIIII)V", Static, Void),
            Slot::GlfwChar => ("character_callback", "(JI)V", Static, Void),
            Slot::GlfwCursorPos => ("cursor_position_callback", "(JDD)V", Static, Void),
            Slot::GlfwCursorEnter => ("cursor_enter_callback", "(JZ)V", Static, Void),
            Slot::GlfwMouseButton => ("mouse_button_callback", "(JIII)V", Static, Void),
            Slot::GlfwScroll => ("scroll_callback", "(JDD)V", Static, Void),
            Slot::GlfwJoystick => ("joystick_callback", "(II)V", Static, Void),
            Slot::GlfwDrop => ("drop_callback", "(JILjava/nio/ByteBuffer;)V", Static, Void),
            Slot::GlfwWindowRefresh => ("window_refresh_callback", "(J)V", Static, Void),
            Slot::GlfwWindowIconify => ("window_iconified", "(JZ)V", Static, Void),
        };

        SlotSpec {
            slot: self,
            method,
            signature,
            dispatch,
            returns,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_match_all_table() {
        for (i, slot) in Slot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
            assert_eq!(Slot::from_index(i as i32), Some(*slot));
        }
        assert_eq!(Slot::from_index(-1), None);
        assert_eq!(Slot::from_index(Slot::COUNT as i32), None);
    }

    #[test]
    fn names_round_trip() {
        for slot in Slot::ALL {
            assert_eq!(Slot::from_name(slot.name()), Some(slot));
        }
        assert_eq!(Slot::from_name("nope"), None);
    }

    #[test]
    fn only_vulkan_returns_a_value() {
        for slot in Slot::ALL {
            let expected = if slot == Slot::VkDebugUtilsMessenger {
                ReturnShape::Boolean
            } else {
                ReturnShape::Void
            };
            assert_eq!(slot.spec().returns, expected, "{slot}");
        }
    }

    #[test]
    fn signature_return_type_agrees_with_shape() {
        for slot in Slot::ALL {
            let spec = slot.spec();
            let ret = spec.signature.rsplit(')').next().unwrap();
            match spec.returns {
                ReturnShape::Void => assert_eq!(ret, "V", "{slot}"),
                ReturnShape::Boolean => assert_eq!(ret, "Z", "{slot}"),
            }
        }
    }

    #[test]
    fn window_events_dispatch_statically() {
        for slot in Slot::ALL.into_iter().filter(|s| s.is_window_event()) {
            assert_eq!(slot.spec().dispatch, Dispatch::Static);
            assert!(slot.spec().signature.starts_with("(J"), "{slot} takes the window handle first");
        }
        assert!(!Slot::GlfwJoystick.is_window_event());
    }
}
