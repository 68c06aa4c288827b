//! Stress probe for the callback bridge.
//!
//! Installs a loopback-backed bridge, spawns native threads that call the
//! real thunks, and checks that every event arrived intact exactly once.
//! Exits non-zero when deliveries differ from what was sent.
//!
//! Usage:
//!   cargo run --release -p cvg4j-probe -- --threads 8 --events 5000 --fail-every 97

mod events;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cvg4j_trampoline::loopback::{LoopbackReceiver, LoopbackRuntime};
use cvg4j_trampoline::{thunk, Bridge, BridgeConfig, DetachPolicy, LogConfig, ManagedReturn, Slot, StatsSnapshot};

#[derive(Parser, Debug)]
#[command(name = "cvg4j-probe", about = "Callback bridge stress probe")]
struct Args {
    /// Native threads to fire events from
    #[arg(long, default_value = "4")]
    threads: usize,

    /// Events per thread
    #[arg(long, default_value = "1000")]
    events: u32,

    /// Comma-separated slot names to exercise (default: all)
    #[arg(long, value_delimiter = ',', value_parser = parse_slot)]
    slots: Vec<Slot>,

    /// Bridge config file (default: CVG4J_BRIDGE_CONFIG or the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the detach policy (never, on-thread-exit)
    #[arg(long, value_parser = parse_detach)]
    detach: Option<DetachPolicy>,

    /// Make every Nth managed call fail (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_slot(name: &str) -> Result<Slot, String> {
    Slot::from_name(name.trim()).ok_or_else(|| {
        let known: Vec<_> = Slot::ALL.iter().map(|s| s.name()).collect();
        format!("unknown slot {name:?} (expected one of: {})", known.join(", "))
    })
}

fn parse_detach(value: &str) -> Result<DetachPolicy, String> {
    match value {
        "never" => Ok(DetachPolicy::Never),
        "on-thread-exit" => Ok(DetachPolicy::OnThreadExit),
        other => Err(format!("unknown detach policy {other:?}")),
    }
}

/// What the receivers observed.
#[derive(Default)]
struct Tally {
    calls: AtomicU64,
    injected: AtomicU64,
    mismatches: AtomicU64,
}

#[derive(Debug, Serialize)]
struct Report {
    threads: usize,
    events_per_thread: u32,
    slots: Vec<Slot>,
    detach: DetachPolicy,
    elapsed_ms: u128,
    events_per_sec: f64,
    attaches: u32,
    detaches: u32,
    injected_failures: u64,
    mismatches: u64,
    live_temporaries: isize,
    stats: StatsSnapshot,
}

fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("invalid log filter {:?}: {e}", config.filter);
        EnvFilter::new("cvg4j=info")
    });
    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// The bridge config the run uses, plus a broken default file's error to log
/// once the subscriber exists.
fn resolve_config(args: &Args) -> Result<(BridgeConfig, Option<cvg4j_trampoline::Error>)> {
    let (mut config, problem) = match &args.config {
        Some(path) => {
            let mut config =
                BridgeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            (config, None)
        }
        None => BridgeConfig::load_reporting(),
    };
    if let Some(detach) = args.detach {
        config.detach = detach;
    }
    Ok((config, problem))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (config, problem) = resolve_config(&args)?;
    init_logging(&config.log);
    if let Some(e) = problem {
        tracing::warn!("{e}; using defaults");
    }
    let slots = if args.slots.is_empty() { Slot::ALL.to_vec() } else { args.slots.clone() };

    let runtime = Arc::new(LoopbackRuntime::new());
    runtime.adopt_current_thread();
    let bridge = Arc::new(Bridge::with_shared_runtime(runtime.clone(), config));
    let tally = Arc::new(Tally::default());

    for &slot in &slots {
        bridge.register(slot, receiver(slot, tally.clone(), args.fail_every))?;
    }
    thunk::install(bridge.clone());
    tracing::info!(bridge = bridge.id(), threads = args.threads, events = args.events, "probe starting");

    let started = Instant::now();
    let handles = (0..args.threads)
        .map(|t| {
            let slots = slots.clone();
            let events = args.events;
            thread::Builder::new()
                .name(format!("probe-native-{t}"))
                .spawn(move || {
                    for seq in 0..events {
                        let slot = slots[(seq as usize + t) % slots.len()];
                        events::fire(slot, seq);
                    }
                })
                .context("spawning native thread")
        })
        .collect::<Result<Vec<_>>>()?;
    for handle in handles {
        if handle.join().is_err() {
            bail!("a native thread panicked");
        }
    }
    let elapsed = started.elapsed();
    thunk::uninstall();

    let report = build_report(&args, slots, &bridge, &runtime, &tally, elapsed);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    check(&report, bridge.config().detach)
}

fn receiver(slot: Slot, tally: Arc<Tally>, fail_every: u64) -> LoopbackReceiver {
    let answer = ManagedReturn::fallback(slot.spec().returns);
    LoopbackReceiver::new(format!("probe:{slot}"), move |call| {
        let n = tally.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !events::verify(call.slot, call.args) {
            tally.mismatches.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(slot = %call.slot, args = ?call.args, "argument mismatch");
        }
        if fail_every > 0 && n % fail_every == 0 {
            tally.injected.fetch_add(1, Ordering::SeqCst);
            return Err(format!("injected failure #{n}"));
        }
        Ok(answer)
    })
}

fn build_report(
    args: &Args,
    slots: Vec<Slot>,
    bridge: &Bridge<LoopbackRuntime>,
    runtime: &LoopbackRuntime,
    tally: &Tally,
    elapsed: Duration,
) -> Report {
    let total = args.threads as u64 * u64::from(args.events);
    Report {
        threads: args.threads,
        events_per_thread: args.events,
        slots,
        detach: bridge.config().detach,
        elapsed_ms: elapsed.as_millis(),
        events_per_sec: total as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        attaches: runtime.total_attaches(),
        detaches: runtime.total_detaches(),
        injected_failures: tally.injected.load(Ordering::SeqCst),
        mismatches: tally.mismatches.load(Ordering::SeqCst),
        live_temporaries: runtime.live_temporaries(),
        stats: bridge.stats(),
    }
}

fn print_report(report: &Report) {
    let stats = &report.stats;
    println!("═══════════════════════════════════════════");
    println!("  CALLBACK PROBE RESULTS");
    println!("═══════════════════════════════════════════");
    println!("  Threads:          {}", report.threads);
    println!("  Events/thread:    {}", report.events_per_thread);
    println!("  Slots:            {}", report.slots.len());
    println!("  Detach policy:    {:?}", report.detach);
    println!("  Elapsed:          {} ms ({:.0} events/s)", report.elapsed_ms, report.events_per_sec);
    println!("  Attaches:         {}", report.attaches);
    println!("  Detaches:         {}", report.detaches);
    println!("  Invocations:      {}", stats.invocations);
    println!("  Delivered:        {}", stats.delivered);
    println!("  Failed:           {} ({} injected)", stats.failed, report.injected_failures);
    println!("  Dropped:          {}", stats.dropped);
    println!("  Unregistered:     {}", stats.unregistered);
    println!("  Mismatches:       {}", report.mismatches);
    println!("  Live temporaries: {}", report.live_temporaries);
    println!("───────────────────────────────────────────");
    for (slot, count) in &stats.deliveries {
        println!("  {slot:<28} {count}");
    }
    println!("═══════════════════════════════════════════");
}

fn check(report: &Report, detach: DetachPolicy) -> Result<()> {
    let stats = &report.stats;
    let total = report.threads as u64 * u64::from(report.events_per_thread);
    let mut problems = Vec::new();

    if stats.invocations != total {
        problems.push(format!("{} invocations for {total} events", stats.invocations));
    }
    if stats.delivered + stats.failed != total {
        problems.push(format!(
            "{} delivered + {} failed != {total} events",
            stats.delivered, stats.failed
        ));
    }
    if stats.failed != report.injected_failures {
        problems.push(format!(
            "{} failures but {} injected",
            stats.failed, report.injected_failures
        ));
    }
    if report.attaches as usize != report.threads {
        problems.push(format!("{} attaches for {} threads", report.attaches, report.threads));
    }
    if report.live_temporaries != 0 {
        problems.push(format!("{} temporaries leaked", report.live_temporaries));
    }
    if report.mismatches > 0 {
        problems.push(format!("{} events arrived with the wrong arguments", report.mismatches));
    }
    // Thread-exit detaches run from TLS destructors, which not every platform guarantees.
    if detach == DetachPolicy::OnThreadExit && report.detaches != report.attaches {
        tracing::warn!(attaches = report.attaches, detaches = report.detaches, "not every attached thread detached");
    }

    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        eprintln!("✗ {problem}");
    }
    bail!("{} check(s) failed", problems.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_drives_logging_and_detach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "detach = \"on-thread-exit\"\n\n[log]\nfilter = \"cvg4j_trampoline=trace\"\njson = true\n").unwrap();

        let args = Args::parse_from(["cvg4j-probe", "--config", path.to_str().unwrap()]);
        let (config, problem) = resolve_config(&args).unwrap();
        assert!(problem.is_none());
        assert_eq!(config.detach, DetachPolicy::OnThreadExit);
        if std::env::var("CVG4J_LOG").is_err() {
            assert_eq!(config.log.filter, "cvg4j_trampoline=trace");
        }
        assert!(config.log.json || std::env::var("CVG4J_LOG_JSON").is_ok());
    }

    #[test]
    fn detach_flag_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "detach = \"on-thread-exit\"\n").unwrap();

        let args = Args::parse_from(["cvg4j-probe", "--config", path.to_str().unwrap(), "--detach", "never"]);
        let (config, _) = resolve_config(&args).unwrap();
        assert_eq!(config.detach, DetachPolicy::Never);
    }

    #[test]
    fn unreadable_config_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::parse_from(["cvg4j-probe", "--config", dir.path().join("absent.toml").to_str().unwrap()]);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn slot_list_parses_names() {
        let args = Args::parse_from(["cvg4j-probe", "--slots", "glfw_key,gl_debug_message"]);
        assert_eq!(args.slots, vec![Slot::GlfwKey, Slot::GlDebugMessage]);
        assert!(parse_slot("glfw_nope").is_err());
    }
}
