//! [`ManagedRuntime`] over a live `JavaVM`.
//!
//! Threads are attached through the raw invocation interface so the JNI
//! version and thread name from [`BridgeConfig`] are honoured, and a thread
//! attached here stays attached until the bridge's detach policy says
//! otherwise. Every call runs inside its own local frame: the strings and
//! direct buffers built for the arguments are freed when the frame pops.

use std::ffi::{c_char, c_void, CString};
use std::ptr;

use jni::objects::{GlobalRef, JClass, JMethodID, JObject, JStaticMethodID, JString, JThrowable};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{self, jboolean, jvalue, JavaVMAttachArgs, JNI_OK};
use jni::{JNIEnv, JavaVM};

use cvg4j_trampoline::{
    BridgeConfig, Dispatch, Error, ManagedArg, ManagedReturn, ManagedRuntime, Result, ReturnShape, SlotSpec,
    ThreadContext,
};

use crate::error::VmError;

/// A resolved entry point.
#[derive(Debug, Clone, Copy)]
pub enum JvmMethod {
    Instance(JMethodID),
    Static(JStaticMethodID),
}

pub struct JvmRuntime {
    vm: JavaVM,
    version: i32,
    describe_exceptions: bool,
    frame_capacity: i32,
}

impl JvmRuntime {
    pub fn new(vm: JavaVM, config: &BridgeConfig) -> Self {
        Self {
            vm,
            version: config.jni_version,
            describe_exceptions: config.describe_exceptions,
            frame_capacity: config.local_frame_capacity,
        }
    }

    /// Runtime for the VM that owns `env`.
    pub fn from_env(env: &JNIEnv<'_>, config: &BridgeConfig) -> std::result::Result<Self, VmError> {
        Ok(Self::new(env.get_java_vm()?, config))
    }

    fn raw_vm(&self) -> *mut sys::JavaVM {
        self.vm.get_java_vm_pointer()
    }

    fn env(ctx: ThreadContext) -> std::result::Result<JNIEnv<'static>, VmError> {
        Ok(unsafe { JNIEnv::from_raw(ctx.as_raw() as *mut sys::JNIEnv) }?)
    }

    /// Clear a pending Java exception and return its text, if there was one.
    fn take_exception(&self, env: &mut JNIEnv<'_>) -> Option<String> {
        if !env.exception_check().unwrap_or(false) {
            return None;
        }
        let throwable = env.exception_occurred().ok();
        if self.describe_exceptions {
            let _ = env.exception_describe();
        }
        let _ = env.exception_clear();

        let text = throwable.and_then(|t| throwable_text(env, &t));
        Some(text.unwrap_or_else(|| "java exception".to_string()))
    }
}

fn throwable_text(env: &mut JNIEnv<'_>, throwable: &JThrowable<'_>) -> Option<String> {
    let text = env
        .call_method(throwable, "toString", "()Ljava/lang/String;", &[])
        .and_then(|v| v.l());
    match text {
        Ok(obj) if !obj.is_null() => env.get_string(&JString::from(obj)).ok().map(String::from),
        Ok(_) => None,
        Err(_) => {
            let _ = env.exception_clear();
            None
        }
    }
}

fn to_jvalue(env: &mut JNIEnv<'_>, arg: &ManagedArg<'_>) -> std::result::Result<jvalue, VmError> {
    Ok(match arg {
        ManagedArg::Int(v) => jvalue { i: *v },
        ManagedArg::Long(v) => jvalue { j: *v },
        ManagedArg::Double(v) => jvalue { d: *v },
        ManagedArg::Boolean(v) => jvalue { z: jboolean::from(*v) },
        ManagedArg::Text(text) => jvalue {
            l: JObject::from(env.new_string(&**text)?).into_raw(),
        },
        ManagedArg::View(view) => {
            // The buffer aliases native memory that stays valid for the call.
            let buffer = unsafe { env.new_direct_byte_buffer(view.as_ptr().cast_mut(), view.len()) }?;
            jvalue {
                l: JObject::from(buffer).into_raw(),
            }
        }
        ManagedArg::Null => jvalue { l: ptr::null_mut() },
    })
}

fn return_type(shape: ReturnShape) -> ReturnType {
    match shape {
        ReturnShape::Void => ReturnType::Primitive(Primitive::Void),
        ReturnShape::Boolean => ReturnType::Primitive(Primitive::Boolean),
    }
}

impl ManagedRuntime for JvmRuntime {
    type Receiver = GlobalRef;
    type Method = JvmMethod;

    fn current_context(&self) -> Option<ThreadContext> {
        let vm = self.raw_vm();
        let mut env: *mut c_void = ptr::null_mut();
        let status = unsafe {
            let get_env = (**vm).GetEnv?;
            get_env(vm, &mut env, self.version)
        };
        (status == JNI_OK && !env.is_null()).then(|| ThreadContext::from_raw(env as usize))
    }

    fn attach_current_thread(&self, name: Option<&str>) -> Result<ThreadContext> {
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(|_| Error::Attach("thread name contains a NUL byte".to_string()))?;
        let mut args = JavaVMAttachArgs {
            version: self.version,
            name: name.as_ref().map_or(ptr::null_mut(), |n| n.as_ptr() as *mut c_char),
            group: ptr::null_mut(),
        };

        let vm = self.raw_vm();
        let mut env: *mut c_void = ptr::null_mut();
        let attach = unsafe { (**vm).AttachCurrentThread }
            .ok_or_else(|| Error::Attach(VmError::MissingFunction("AttachCurrentThread").to_string()))?;
        let status = unsafe { attach(vm, &mut env, (&mut args as *mut JavaVMAttachArgs).cast()) };
        if status != JNI_OK || env.is_null() {
            let e = VmError::Status {
                call: "AttachCurrentThread",
                status,
            };
            return Err(Error::Attach(e.to_string()));
        }
        Ok(ThreadContext::from_raw(env as usize))
    }

    fn detach_current_thread(&self, ctx: ThreadContext) {
        // Someone else detached (and maybe re-attached) the thread since.
        if self.current_context() != Some(ctx) {
            tracing::debug!(?ctx, "thread no longer attached with this env, not detaching");
            return;
        }
        let vm = self.raw_vm();
        let Some(detach) = (unsafe { (**vm).DetachCurrentThread }) else {
            return;
        };
        let status = unsafe { detach(vm) };
        if status == JNI_OK {
            tracing::debug!(?ctx, "detached native thread");
        } else {
            tracing::warn!(?ctx, status, "DetachCurrentThread failed");
        }
    }

    fn resolve(&self, ctx: ThreadContext, receiver: &GlobalRef, spec: &SlotSpec) -> Result<JvmMethod> {
        let mut env = Self::env(ctx)?;
        // GetStaticMethodID on something that is not a Class is undefined behaviour.
        if spec.dispatch == Dispatch::Static
            && !env
                .is_instance_of(receiver.as_obj(), "java/lang/Class")
                .map_err(VmError::from)?
        {
            return Err(Error::InvalidReceiver {
                slot: spec.slot,
                reason: format!("{} is static and needs a Class, got an instance", spec.method),
            });
        }
        let resolved = match spec.dispatch {
            Dispatch::Instance => env
                .get_object_class(receiver.as_obj())
                .and_then(|class| env.get_method_id(&class, spec.method, spec.signature))
                .map(JvmMethod::Instance),
            Dispatch::Static => {
                let class = <&JClass>::from(receiver.as_obj());
                env.get_static_method_id(class, spec.method, spec.signature)
                    .map(JvmMethod::Static)
            }
        };
        resolved.map_err(|e| {
            let reason = self.take_exception(&mut env).unwrap_or_else(|| e.to_string());
            Error::Resolve {
                slot: spec.slot,
                method: spec.method,
                signature: spec.signature,
                reason,
            }
        })
    }

    fn call(
        &self,
        ctx: ThreadContext,
        receiver: &GlobalRef,
        method: &JvmMethod,
        spec: &SlotSpec,
        args: &[ManagedArg<'_>],
    ) -> Result<ManagedReturn> {
        let mut env = Self::env(ctx)?;
        let outcome = env.with_local_frame(self.frame_capacity, |env| -> std::result::Result<_, VmError> {
            let values = args
                .iter()
                .map(|a| to_jvalue(env, a))
                .collect::<std::result::Result<Vec<_>, _>>();
            let values = match values {
                Ok(values) => values,
                Err(e) => {
                    self.take_exception(env);
                    return Err(e);
                }
            };

            let ret = return_type(spec.returns);
            let result = unsafe {
                match method {
                    JvmMethod::Instance(id) => env.call_method_unchecked(receiver.as_obj(), *id, ret, &values),
                    JvmMethod::Static(id) => {
                        env.call_static_method_unchecked(<&JClass>::from(receiver.as_obj()), *id, ret, &values)
                    }
                }
            };
            if let Some(message) = self.take_exception(env) {
                return Err(VmError::Exception(message));
            }

            let value = result?;
            Ok(match spec.returns {
                ReturnShape::Void => ManagedReturn::Void,
                ReturnShape::Boolean => ManagedReturn::Boolean(value.z()?),
            })
        });

        outcome.map_err(|e| match e {
            VmError::Exception(message) => Error::Managed {
                slot: spec.slot,
                message,
            },
            other => other.into(),
        })
    }
}
