//! Module lifecycle: load, ordered init with rollback, ordered stop.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serial_test::serial;

use gatehouse::config::BusSettings;
use gatehouse::core::bus::Envelope;
use gatehouse::core::frame::{Frame, OK};
use gatehouse::core::loader::{ModuleDecl, MODULE_ABI_VERSION};
use gatehouse::core::runtime::ModuleContext;
use gatehouse::{CoreError, MessageBus, ModuleDefinition, ModuleManager};

fn events() -> &'static Mutex<Vec<String>> {
    static EVENTS: OnceLock<Mutex<Vec<String>>> = OnceLock::new();
    EVENTS.get_or_init(|| Mutex::new(Vec::new()))
}

fn record(event: String) {
    events().lock().unwrap().push(event);
}

fn reset_events() {
    events().lock().unwrap().clear();
}

fn recorded() -> Vec<String> {
    events().lock().unwrap().clone()
}

/// Records readiness and stop, answers OK to every command.
fn probe_entry(mut ctx: ModuleContext) -> BoxFuture<'static, anyhow::Result<()>> {
    async move {
        let mut endpoint = ctx.bind()?;
        record(format!("{}:ready", ctx.address()));
        ctx.ready();
        while let Some(envelope) = endpoint.next().await {
            match envelope {
                Envelope::Command(request) => request.reply(Frame::of(OK)),
                Envelope::Stop => break,
            }
        }
        record(format!("{}:stopped", endpoint.address()));
        Ok(())
    }
    .boxed()
}

/// Fails initialization after recording the attempt.
fn failing_entry(mut ctx: ModuleContext) -> BoxFuture<'static, anyhow::Result<()>> {
    async move {
        record(format!("{}:init-failed", ctx.address()));
        ctx.ready_failed("simulated hardware failure");
        anyhow::bail!("simulated hardware failure")
    }
    .boxed()
}

/// Signals ready, then panics on the module thread.
fn panicking_entry(mut ctx: ModuleContext) -> BoxFuture<'static, anyhow::Result<()>> {
    async move {
        let _endpoint = ctx.bind()?;
        ctx.ready();
        panic!("simulated module crash");
    }
    .boxed()
}

fn test_manager() -> (MessageBus, ModuleManager) {
    let bus = MessageBus::new(&BusSettings::default());
    let mut manager = ModuleManager::new(bus.clone());
    let decl = |entry| ModuleDecl {
        abi_version: MODULE_ABI_VERSION,
        entry,
    };
    manager.register_builtin("probe", decl(probe_entry));
    manager.register_builtin("failing", decl(failing_entry));
    manager.register_builtin("panicking", decl(panicking_entry));
    (bus, manager)
}

#[test]
#[serial]
fn init_follows_level_order_with_insertion_tiebreak() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("a", "probe").with_level(50))
        .unwrap();
    manager
        .load_module(ModuleDefinition::new("b", "probe").with_level(10))
        .unwrap();
    manager
        .load_module(ModuleDefinition::new("c", "probe").with_level(50))
        .unwrap();

    manager.init_modules().unwrap();
    assert_eq!(recorded(), vec!["b:ready", "a:ready", "c:ready"]);

    manager.stop_modules();
    assert_eq!(
        recorded(),
        vec![
            "b:ready",
            "a:ready",
            "c:ready",
            "b:stopped",
            "a:stopped",
            "c:stopped",
        ]
    );
}

#[test]
#[serial]
fn lower_level_is_ready_before_higher_level_spawns() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("high", "probe").with_level(50))
        .unwrap();
    manager
        .load_module(ModuleDefinition::new("low", "probe").with_level(10))
        .unwrap();

    manager.init_modules().unwrap();
    let events = recorded();
    let low = events.iter().position(|e| e == "low:ready").unwrap();
    let high = events.iter().position(|e| e == "high:ready").unwrap();
    assert!(low < high);
}

#[test]
#[serial]
fn init_failure_rolls_back_started_modules() {
    reset_events();
    let (bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("first", "probe").with_level(10))
        .unwrap();
    manager
        .load_module(ModuleDefinition::new("broken", "failing").with_level(50))
        .unwrap();
    manager
        .load_module(ModuleDefinition::new("never", "probe").with_level(90))
        .unwrap();

    let err = manager.init_modules().unwrap_err();
    match err {
        CoreError::Init { module, reason } => {
            assert_eq!(module, "broken");
            assert_eq!(reason, "simulated hardware failure");
        }
        other => panic!("unexpected error: {other}"),
    }

    let events = recorded();
    assert_eq!(
        events,
        vec!["first:ready", "broken:init-failed", "first:stopped"]
    );
    // Rolled back, so no endpoint remains bound.
    assert!(bus.client("first").is_err());
    assert!(bus.client("never").is_err());
}

#[test]
#[serial]
fn command_round_trip_through_a_started_module() {
    reset_events();
    let (bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("door", "probe"))
        .unwrap();
    manager.init_modules().unwrap();

    let reply = bus.client("door").unwrap().call(Frame::of("PING")).unwrap();
    assert_eq!(reply.str_part(0).unwrap(), OK);

    manager.stop_modules();
}

#[test]
#[serial]
fn missing_library_leaves_the_registry_unchanged() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    let err = manager
        .load_module(ModuleDefinition::new("ghost", "libnope.so"))
        .unwrap_err();
    assert!(matches!(err, CoreError::LibraryNotFound { .. }));
    assert!(manager.module_names().is_empty());
}

#[test]
#[serial]
fn duplicate_module_names_are_rejected() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("door", "probe"))
        .unwrap();
    let err = manager
        .load_module(ModuleDefinition::new("door", "probe"))
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateModule(_)));
    assert_eq!(manager.module_names(), vec!["door"]);
}

#[test]
#[serial]
fn stop_is_idempotent() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("door", "probe"))
        .unwrap();
    manager.init_modules().unwrap();
    manager.stop_modules();
    manager.stop_modules();
    assert_eq!(recorded(), vec!["door:ready", "door:stopped"]);
}

#[test]
#[serial]
fn a_panicked_module_does_not_wedge_shutdown() {
    reset_events();
    let (_bus, mut manager) = test_manager();
    manager
        .load_module(ModuleDefinition::new("crashy", "panicking"))
        .unwrap();
    manager.init_modules().unwrap();

    // Give the module thread time to panic.
    std::thread::sleep(Duration::from_millis(100));
    manager.stop_modules();
}
