//! Registry and thunk behaviour against the loopback runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cvg4j_trampoline::loopback::{LoopbackCall, LoopbackReceiver, LoopbackRuntime};
use cvg4j_trampoline::{
    Bridge, BridgeConfig, DetachPolicy, ManagedArg, ManagedReturn, ManagedRuntime, NativeView, Slot, ThreadState,
};
use parking_lot::Mutex;

fn bridge() -> Arc<Bridge<LoopbackRuntime>> {
    bridge_with(BridgeConfig::default())
}

fn bridge_with(config: BridgeConfig) -> Arc<Bridge<LoopbackRuntime>> {
    let bridge = Bridge::new(LoopbackRuntime::new(), config);
    // Registration normally happens on a runtime-owned thread.
    bridge.runtime().adopt_current_thread();
    Arc::new(bridge)
}

fn counting(label: &str, hits: &Arc<AtomicUsize>) -> LoopbackReceiver {
    let hits = Arc::clone(hits);
    LoopbackReceiver::new(label, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(ManagedReturn::Void)
    })
}

fn ints(call: &LoopbackCall<'_>) -> Vec<i32> {
    call.args
        .iter()
        .filter_map(|a| match a {
            ManagedArg::Int(v) => Some(*v),
            _ => None,
        })
        .collect()
}

mod attach {
    use super::*;

    #[test]
    fn first_invoke_attaches_once_per_thread() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.register(Slot::GlfwJoystick, counting("joystick", &hits)).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    assert_eq!(bridge.thread_state(), ThreadState::Unattached);
                    for _ in 0..50 {
                        bridge.invoke(Slot::GlfwJoystick, &[ManagedArg::Int(0), ManagedArg::Int(1)]);
                    }
                    assert_eq!(bridge.thread_state(), ThreadState::Attached);
                    thread::current().id()
                })
            })
            .collect();

        for worker in workers {
            let id = worker.join().unwrap();
            assert_eq!(bridge.runtime().attach_count(id), 1);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 200);
        assert_eq!(bridge.stats().attachments, 4);
    }

    #[test]
    fn runtime_owned_threads_are_not_attached_again() {
        let bridge = bridge();
        bridge.register(Slot::GlfwWindowRefresh, counting("refresh", &Arc::default())).unwrap();
        bridge.invoke(Slot::GlfwWindowRefresh, &[ManagedArg::Long(1)]);
        assert_eq!(bridge.runtime().total_attaches(), 0);
        assert_eq!(bridge.stats().attachments, 0);
    }

    #[test]
    fn attached_threads_get_the_configured_name() {
        let config = BridgeConfig {
            thread_name: "glfw-events".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = bridge_with(config);
        bridge.register(Slot::GlfwJoystick, counting("joystick", &Arc::default())).unwrap();

        let b = Arc::clone(&bridge);
        let id = thread::spawn(move || {
            b.invoke(Slot::GlfwJoystick, &[ManagedArg::Int(1), ManagedArg::Int(2)]);
            thread::current().id()
        })
        .join()
        .unwrap();
        assert_eq!(bridge.runtime().thread_name(id).as_deref(), Some("glfw-events"));
    }

    #[test]
    fn never_policy_leaves_threads_attached() {
        let bridge = bridge();
        bridge.register(Slot::GlfwJoystick, counting("joystick", &Arc::default())).unwrap();

        let b = Arc::clone(&bridge);
        let id = thread::spawn(move || {
            b.invoke(Slot::GlfwJoystick, &[ManagedArg::Int(0), ManagedArg::Int(0)]);
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(bridge.runtime().detach_count(id), 0);
        assert!(bridge.runtime().is_attached(id));
    }

    #[test]
    fn on_thread_exit_policy_detaches_when_thread_ends() {
        let config = BridgeConfig {
            detach: DetachPolicy::OnThreadExit,
            ..BridgeConfig::default()
        };
        let bridge = bridge_with(config);
        bridge.register(Slot::GlfwJoystick, counting("joystick", &Arc::default())).unwrap();

        let b = Arc::clone(&bridge);
        let id = thread::spawn(move || {
            for _ in 0..3 {
                b.invoke(Slot::GlfwJoystick, &[ManagedArg::Int(0), ManagedArg::Int(0)]);
            }
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(bridge.runtime().attach_count(id), 1);
        assert_eq!(bridge.runtime().detach_count(id), 1);
        assert!(!bridge.runtime().is_attached(id));
    }

    #[test]
    fn failed_attach_drops_the_event() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge
            .register(Slot::VkDebugUtilsMessenger, counting("vk", &hits))
            .unwrap();
        bridge.runtime().refuse_attach(true);

        let b = Arc::clone(&bridge);
        let ret = thread::spawn(move || {
            let args = [ManagedArg::Int(0x1000), ManagedArg::Int(1), ManagedArg::Long(0), ManagedArg::Long(0)];
            let ret = b.invoke(Slot::VkDebugUtilsMessenger, &args);
            assert_eq!(b.thread_state(), ThreadState::Unattached);
            ret
        })
        .join()
        .unwrap();

        assert_eq!(ret, ManagedReturn::Boolean(false));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let stats = bridge.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn thread_detached_elsewhere_is_attached_again() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.register(Slot::GlfwJoystick, counting("joystick", &hits)).unwrap();

        let b = Arc::clone(&bridge);
        let id = thread::spawn(move || {
            let args = [ManagedArg::Int(0), ManagedArg::Int(1)];
            b.invoke(Slot::GlfwJoystick, &args);
            // Another library on this thread attaches, calls and detaches.
            let ctx = b.runtime().current_context().unwrap();
            b.runtime().detach_current_thread(ctx);
            assert_eq!(b.thread_state(), ThreadState::Unattached);

            b.invoke(Slot::GlfwJoystick, &args);
            b.invoke(Slot::GlfwJoystick, &args);
            assert_eq!(b.thread_state(), ThreadState::Attached);
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bridge.runtime().attach_count(id), 2);
        let stats = bridge.stats();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.attachments, 2);
    }

    #[test]
    fn thread_exit_detaches_only_the_latest_attach() {
        let config = BridgeConfig {
            detach: DetachPolicy::OnThreadExit,
            ..BridgeConfig::default()
        };
        let bridge = bridge_with(config);
        bridge.register(Slot::GlfwJoystick, counting("joystick", &Arc::default())).unwrap();

        let b = Arc::clone(&bridge);
        let id = thread::spawn(move || {
            let args = [ManagedArg::Int(0), ManagedArg::Int(0)];
            b.invoke(Slot::GlfwJoystick, &args);
            let ctx = b.runtime().current_context().unwrap();
            b.runtime().detach_current_thread(ctx);
            b.invoke(Slot::GlfwJoystick, &args);
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(bridge.runtime().attach_count(id), 2);
        // One detach from the other library, one at thread exit.
        assert_eq!(bridge.runtime().detach_count(id), 2);
        assert!(!bridge.runtime().is_attached(id));
    }
}

mod registration {
    use super::*;

    #[test]
    fn replacement_routes_to_new_receiver_and_releases_old_once() {
        let bridge = bridge();
        let a_hits = Arc::new(AtomicUsize::new(0));
        let b_hits = Arc::new(AtomicUsize::new(0));

        let a = counting("a", &a_hits);
        let a_released = a.release_probe();
        bridge.register(Slot::GlfwKey, a).unwrap();
        bridge.invoke(Slot::GlfwKey, &[ManagedArg::Long(1)]);

        let b = counting("b", &b_hits);
        let b_released = b.release_probe();
        bridge.register(Slot::GlfwKey, b).unwrap();
        assert_eq!(a_released.count(), 1);

        for _ in 0..5 {
            bridge.invoke(Slot::GlfwKey, &[ManagedArg::Long(1)]);
        }
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 5);
        assert_eq!(a_released.count(), 1);
        assert_eq!(b_released.count(), 0);

        let stats = bridge.stats();
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.replacements, 1);
    }

    #[test]
    fn first_registration_releases_nothing() {
        let bridge = bridge();
        let receiver = counting("first", &Arc::default());
        let released = receiver.release_probe();

        bridge.register(Slot::ClProgramBuildFinished, receiver).unwrap();
        assert!(bridge.is_registered(Slot::ClProgramBuildFinished));
        assert_eq!(released.count(), 0);
        assert_eq!(bridge.stats().replacements, 0);
    }

    #[test]
    fn unresolvable_receiver_keeps_previous_registration() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.register(Slot::GlfwError, counting("good", &hits)).unwrap();

        let bad = LoopbackReceiver::new("bad", |_| Ok(ManagedReturn::Void)).responding_to(&["somethingElse"]);
        let bad_released = bad.release_probe();
        let err = bridge.register(Slot::GlfwError, bad).unwrap_err();
        assert!(matches!(err, cvg4j_trampoline::Error::Resolve { .. }));
        assert_eq!(bad_released.count(), 1);

        bridge.invoke(Slot::GlfwError, &[ManagedArg::Int(1), ManagedArg::Null]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instance_for_static_slot_is_rejected() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.register(Slot::VkDebugUtilsMessenger, counting("vk-class", &hits)).unwrap();

        let instance = LoopbackReceiver::new("vk-instance", |_| Ok(ManagedReturn::Boolean(true))).instance_only();
        let released = instance.release_probe();
        let err = bridge.register(Slot::VkDebugUtilsMessenger, instance).unwrap_err();
        assert!(matches!(
            err,
            cvg4j_trampoline::Error::InvalidReceiver { slot: Slot::VkDebugUtilsMessenger, .. }
        ));
        assert_eq!(released.count(), 1);

        let args = [ManagedArg::Int(0x1000), ManagedArg::Int(1), ManagedArg::Long(0), ManagedArg::Long(0)];
        assert_eq!(bridge.invoke(Slot::VkDebugUtilsMessenger, &args), ManagedReturn::Boolean(false));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.stats().replacements, 0);
    }

    #[test]
    fn instance_receiver_serves_instance_slots() {
        let bridge = bridge();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge
            .register(Slot::GlDebugMessage, counting("gl", &hits).instance_only())
            .unwrap();
        assert!(bridge.is_registered(Slot::GlDebugMessage));
    }

    #[test]
    fn unregister_and_clear_release_receivers() {
        let bridge = bridge();
        let key = counting("key", &Arc::default());
        let scroll = counting("scroll", &Arc::default());
        let (key_released, scroll_released) = (key.release_probe(), scroll.release_probe());
        bridge.register(Slot::GlfwKey, key).unwrap();
        bridge.register(Slot::GlfwScroll, scroll).unwrap();

        assert!(bridge.unregister(Slot::GlfwKey));
        assert!(!bridge.unregister(Slot::GlfwKey));
        assert_eq!(key_released.count(), 1);

        bridge.clear();
        assert_eq!(scroll_released.count(), 1);
        assert!(bridge.registered_slots().is_empty());
    }

    #[test]
    fn unregistered_slot_answers_fallback() {
        let bridge = bridge();
        assert_eq!(bridge.invoke(Slot::GlfwChar, &[ManagedArg::Long(0), ManagedArg::Int(65)]), ManagedReturn::Void);
        let args = [ManagedArg::Int(0), ManagedArg::Int(0), ManagedArg::Long(0), ManagedArg::Long(0)];
        assert_eq!(bridge.invoke(Slot::VkDebugUtilsMessenger, &args), ManagedReturn::Boolean(false));
        assert_eq!(bridge.stats().unregistered, 2);
    }

    #[test]
    fn in_flight_call_keeps_replaced_receiver_alive() {
        let bridge = bridge();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (resume_tx, resume_rx) = std::sync::mpsc::channel::<()>();
        let resume_rx = Mutex::new(resume_rx);

        let slow = LoopbackReceiver::new("slow", move |_| {
            entered_tx.send(()).ok();
            resume_rx.lock().recv().ok();
            Ok(ManagedReturn::Void)
        });
        let slow_released = slow.release_probe();
        bridge.register(Slot::GlfwWindowRefresh, slow).unwrap();

        let b = Arc::clone(&bridge);
        let caller = thread::spawn(move || b.invoke(Slot::GlfwWindowRefresh, &[ManagedArg::Long(9)]));
        entered_rx.recv().unwrap();

        bridge
            .register(Slot::GlfwWindowRefresh, counting("fast", &Arc::default()))
            .unwrap();
        assert_eq!(slow_released.count(), 0);

        resume_tx.send(()).unwrap();
        assert_eq!(caller.join().unwrap(), ManagedReturn::Void);
        assert_eq!(slow_released.count(), 1);
    }
}

mod invoke {
    use super::*;

    #[test]
    fn concurrent_slots_keep_their_own_arguments() {
        let bridge = bridge();
        let mismatches = Arc::new(AtomicUsize::new(0));

        for (slot, marker) in [(Slot::GlfwKey, 1), (Slot::GlfwMouseButton, 2)] {
            let mismatches = Arc::clone(&mismatches);
            let receiver = LoopbackReceiver::new(slot.name(), move |call| {
                let ints = ints(call);
                let text = match &call.args[0] {
                    ManagedArg::Text(t) => t.to_string(),
                    _ => String::new(),
                };
                if call.slot != slot || ints[0] != marker || text != format!("{marker}:{}", ints[1]) {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
                Ok(ManagedReturn::Void)
            });
            bridge.register(slot, receiver).unwrap();
        }

        let workers: Vec<_> = [(Slot::GlfwKey, 1), (Slot::GlfwMouseButton, 2)]
            .into_iter()
            .map(|(slot, marker)| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    for i in 0..2_000 {
                        let text = format!("{marker}:{i}");
                        let args = [ManagedArg::Text(text.as_str().into()), ManagedArg::Int(marker), ManagedArg::Int(i)];
                        bridge.invoke(slot, &args);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
        let stats = bridge.stats();
        assert_eq!(stats.delivered, 4_000);
        assert_eq!(stats.deliveries["glfw_key"], 2_000);
        assert_eq!(stats.deliveries["glfw_mouse_button"], 2_000);
        assert_eq!(bridge.runtime().live_temporaries(), 0);
    }

    #[test]
    fn managed_error_returns_fallback_and_keeps_context() {
        let bridge = bridge();
        bridge
            .register(
                Slot::VkDebugUtilsMessenger,
                LoopbackReceiver::new("vk", |_| Err("java.lang.NullPointerException".to_string())),
            )
            .unwrap();

        let b = Arc::clone(&bridge);
        let (ret, state) = thread::spawn(move || {
            let args = [
                ManagedArg::Int(0x1000),
                ManagedArg::Int(2),
                ManagedArg::View(NativeView::from_slice(b"callback data")),
                ManagedArg::Long(0),
            ];
            let ret = b.invoke(Slot::VkDebugUtilsMessenger, &args);
            (ret, b.thread_state())
        })
        .join()
        .unwrap();

        assert_eq!(ret, ManagedReturn::Boolean(false));
        assert_eq!(state, ThreadState::Attached);
        assert_eq!(bridge.stats().failed, 1);
        assert_eq!(bridge.runtime().live_temporaries(), 0);
    }

    #[test]
    fn managed_panic_is_contained() {
        let bridge = bridge();
        bridge
            .register(
                Slot::GlfwError,
                LoopbackReceiver::new("panicky", |_| panic!("handler blew up")),
            )
            .unwrap();

        let ret = bridge.invoke(Slot::GlfwError, &[ManagedArg::Int(1), ManagedArg::Text("x".into())]);
        assert_eq!(ret, ManagedReturn::Void);

        let err = bridge
            .try_invoke(Slot::GlfwError, &[ManagedArg::Int(1), ManagedArg::Null])
            .unwrap_err();
        assert!(matches!(err, cvg4j_trampoline::Error::Panicked { slot: Slot::GlfwError, .. }));
        assert_eq!(bridge.runtime().live_temporaries(), 0);
    }

    #[test]
    fn wrong_return_shape_is_replaced_by_fallback() {
        let bridge = bridge();
        bridge
            .register(
                Slot::VkDebugUtilsMessenger,
                LoopbackReceiver::new("vk", |_| Ok(ManagedReturn::Void)),
            )
            .unwrap();
        let args = [ManagedArg::Int(0), ManagedArg::Int(0), ManagedArg::Long(0), ManagedArg::Long(0)];
        assert_eq!(bridge.invoke(Slot::VkDebugUtilsMessenger, &args), ManagedReturn::Boolean(false));
    }

    #[test]
    fn views_reach_the_managed_side_unchanged() {
        let bridge = bridge();
        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink = Arc::clone(&seen);
        bridge
            .register(
                Slot::ClContextError,
                LoopbackReceiver::new("cl", move |call| {
                    if let ManagedArg::View(view) = &call.args[1] {
                        sink.lock().push(view.as_bytes().to_vec());
                    }
                    Ok(ManagedReturn::Void)
                }),
            )
            .unwrap();

        let blobs: Vec<Vec<u8>> = [0usize, 1, 4096]
            .into_iter()
            .map(|n| (0..n).map(|i| (i * 31 % 251) as u8).collect())
            .collect();
        for blob in &blobs {
            let view = NativeView::from_slice(blob);
            assert_eq!(view.as_ptr(), blob.as_ptr());
            let args = [ManagedArg::Text("CL_OUT_OF_RESOURCES".into()), ManagedArg::View(view), ManagedArg::Long(0)];
            bridge.invoke(Slot::ClContextError, &args);
        }

        assert_eq!(*seen.lock(), blobs);
    }
}

mod stats {
    use super::*;

    #[test]
    fn snapshot_serialises_to_json() {
        let bridge = bridge();
        bridge.register(Slot::GlfwScroll, counting("scroll", &Arc::default())).unwrap();
        for _ in 0..3 {
            bridge.invoke(
                Slot::GlfwScroll,
                &[ManagedArg::Long(1), ManagedArg::Double(0.0), ManagedArg::Double(1.0)],
            );
        }
        bridge.invoke(Slot::GlfwJoystick, &[ManagedArg::Int(0), ManagedArg::Int(0)]);

        let json = serde_json::to_value(bridge.stats()).unwrap();
        assert_eq!(json["invocations"], 4);
        assert_eq!(json["delivered"], 3);
        assert_eq!(json["unregistered"], 1);
        assert_eq!(json["registered"], serde_json::json!(["glfw_scroll"]));
        assert_eq!(json["deliveries"], serde_json::json!({ "glfw_scroll": 3 }));
    }
}

mod thunks {
    use super::*;
    use std::ffi::{c_void, CString};

    use cvg4j_trampoline::thunk;

    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn native_thunks_reach_registered_receivers() {
        let _serial = SERIAL.lock();
        let bridge = bridge();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bridge
            .register(
                Slot::GlfwError,
                LoopbackReceiver::new("errors", move |call| {
                    if let [ManagedArg::Int(code), ManagedArg::Text(text)] = call.args {
                        sink.lock().push(format!("{code:#x} {text}"));
                    }
                    Ok(ManagedReturn::Void)
                }),
            )
            .unwrap();
        bridge
            .register(
                Slot::VkDebugUtilsMessenger,
                LoopbackReceiver::new("vk", |call| Ok(ManagedReturn::Boolean(ints(call)[0] >= 0x1000))),
            )
            .unwrap();
        thunk::install(bridge.clone());

        let message = CString::new("Invalid window").unwrap();
        let vk = thread::spawn(move || {
            unsafe { thunk::glfw_error(0x00010008, message.as_ptr()) };
            (
                thunk::vk_debug_utils_messenger(0x1000, 1, std::ptr::null(), std::ptr::null_mut::<c_void>()),
                thunk::vk_debug_utils_messenger(0x0010, 1, std::ptr::null(), std::ptr::null_mut::<c_void>()),
            )
        })
        .join()
        .unwrap();
        thunk::uninstall();

        assert_eq!(vk, (1, 0));
        assert_eq!(*seen.lock(), vec!["0x10008 Invalid window".to_string()]);
        assert_eq!(bridge.stats().attachments, 1);
    }
}
