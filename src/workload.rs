// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Demo greeter workload.
//!
//! Each cycle sends a greeting (a `GreeterActivity` span plus an integer
//! count), records a random floating-point measurement, and greets again,
//! with 100 ms pauses in between. Interactive runs poll the terminal in raw
//! mode until `q` is pressed.

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::TelemetryConfig;
use crate::error::{InstrumentError, Result};
use crate::instrument::{Context, Counter, InstrumentationRegistry, TraceSource};

pub const GREETER_METER: &str = "signalpost.greeter";
pub const GREETER_METER2: &str = "signalpost.greeter2";
pub const GREETER_ACTIVITY: &str = "signalpost.greeter.activity";
pub const GREETER_VERSION: &str = "1.0.0";

pub const GREETINGS_COUNTER: &str = "greeter.greetings.count";
pub const ANOTHER_COUNTER: &str = "greeter.another.count";
pub const GREETING: &str = "Hello World!";

const STEP_DELAY: Duration = Duration::from_millis(100);
const KEY_POLL: Duration = Duration::from_millis(50);

/// Declare the greeter's sources and bind them to the providers.
pub fn configure_sources(config: &mut TelemetryConfig) {
    config.add_metric_source(GREETER_METER, GREETER_VERSION);
    config.add_metric_source(GREETER_METER2, GREETER_VERSION);
    config.add_trace_source(GREETER_ACTIVITY, GREETER_VERSION);
}

/// How long the workload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Until `q` (or Ctrl-C) is pressed.
    Interactive,
    /// A fixed number of cycles, no terminal needed.
    Iterations(u64),
}

pub struct Greeter {
    greetings: Counter<u64>,
    another: Counter<f64>,
    activity: TraceSource,
}

impl Greeter {
    pub fn new(registry: &InstrumentationRegistry) -> std::result::Result<Self, InstrumentError> {
        let greetings = registry
            .metric_source(GREETER_METER, GREETER_VERSION)
            .u64_counter(GREETINGS_COUNTER, "Counts the number of greetings")?;
        let another = registry
            .metric_source(GREETER_METER2, GREETER_VERSION)
            .f64_counter(ANOTHER_COUNTER, "Counts something else")?;
        let activity = registry.trace_source(GREETER_ACTIVITY, GREETER_VERSION);

        Ok(Self {
            greetings,
            another,
            activity,
        })
    }

    pub fn greetings(&self) -> &Counter<u64> {
        &self.greetings
    }

    pub fn another(&self) -> &Counter<f64> {
        &self.another
    }

    /// One greeting, recorded as a span scoped to this call.
    pub fn send_greeting(&self, parent: &Context) -> &'static str {
        let span = self.activity.start_span("GreeterActivity", parent);
        debug!("Sending greeting");
        self.greetings.add(1, &[]);
        span.set_tag("greeting", GREETING);
        GREETING
    }

    fn send_other(&self, parent: &Context) {
        let amount = rand::thread_rng().gen_range(0.0..10.0);
        self.another.add(amount, &[]);
        self.send_greeting(parent);
    }

    /// One full workload cycle.
    pub async fn cycle(&self) {
        let root = Context::root();
        tokio::time::sleep(STEP_DELAY).await;
        self.send_greeting(&root);
        tokio::time::sleep(STEP_DELAY).await;
        self.send_other(&root);
        tokio::time::sleep(STEP_DELAY).await;
    }
}

/// Run the workload and return the number of completed cycles.
///
/// Prints `Bye!` when the run ends.
pub async fn run(greeter: &Greeter, mode: RunMode) -> Result<u64> {
    info!(?mode, "Doing something");

    let cycles = match mode {
        RunMode::Iterations(limit) => {
            for _ in 0..limit {
                greeter.cycle().await;
            }
            limit
        }
        RunMode::Interactive => run_interactive(greeter).await?,
    };

    println!("Bye!");
    Ok(cycles)
}

async fn run_interactive(greeter: &Greeter) -> Result<u64> {
    if !io::stdin().is_terminal() {
        anyhow::bail!("No TTY available for key input. Use --iterations to run headless.");
    }

    println!("Press q to stop.");
    let _raw = RawMode::enable()?;
    let watcher = KeyWatcher::spawn();
    let mut quit = watcher.quit;

    let mut cycles = 0;
    loop {
        greeter.cycle().await;
        cycles += 1;

        match quit.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => {}
            _ => break,
        }
    }

    watcher.stop.store(true, Ordering::Relaxed);
    Ok(cycles)
}

/// Raw terminal mode for the life of the guard.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

struct KeyWatcher {
    quit: oneshot::Receiver<()>,
    stop: Arc<AtomicBool>,
}

impl KeyWatcher {
    /// Poll the terminal on a blocking thread until a quit key arrives or
    /// `stop` is set.
    fn spawn() -> Self {
        let (tx, quit) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);

        tokio::task::spawn_blocking(move || {
            while !stopped.load(Ordering::Relaxed) {
                match event::poll(KEY_POLL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => break,
                }
                match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press && is_quit(key.code, key.modifiers) => {
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });

        Self { quit, stop }
    }
}

fn is_quit(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Char('Q') => true,
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::NumberValue;

    #[test]
    fn test_configure_sources() {
        let mut config = TelemetryConfig::default();
        configure_sources(&mut config);
        configure_sources(&mut config);

        assert_eq!(config.metrics.sources, vec![GREETER_METER, GREETER_METER2]);
        assert_eq!(config.traces.sources, vec![GREETER_ACTIVITY]);
        assert_eq!(config.sources.len(), 3);
        assert!(config.sources.iter().all(|s| s.version == GREETER_VERSION));
    }

    #[test]
    fn test_send_greeting_counts() {
        let registry = InstrumentationRegistry::new();
        let greeter = Greeter::new(&registry).unwrap();

        assert_eq!(greeter.send_greeting(&Context::root()), "Hello World!");
        greeter.send_greeting(&Context::root());
        assert_eq!(greeter.greetings().value(&[]), Some(NumberValue::Int(2)));
        assert_eq!(greeter.another().value(&[]), None);
    }

    #[test]
    fn test_send_other_stays_in_range() {
        let registry = InstrumentationRegistry::new();
        let greeter = Greeter::new(&registry).unwrap();

        greeter.send_other(&Context::root());
        let value = greeter.another().value(&[]).unwrap().as_f64();
        assert!((0.0..10.0).contains(&value));
        assert_eq!(greeter.greetings().value(&[]), Some(NumberValue::Int(1)));
    }

    #[tokio::test]
    async fn test_run_iterations() {
        let registry = InstrumentationRegistry::new();
        let greeter = Greeter::new(&registry).unwrap();

        let cycles = run(&greeter, RunMode::Iterations(2)).await.unwrap();
        assert_eq!(cycles, 2);
        assert_eq!(greeter.greetings().value(&[]), Some(NumberValue::Int(4)));
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(is_quit(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!is_quit(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(!is_quit(KeyCode::Enter, KeyModifiers::NONE));
    }
}
