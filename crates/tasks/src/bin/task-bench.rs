//! task-bench: drives a TaskController with synthetic sleeping tasks.
//!
//! Submits a batch of normal-priority tasks plus a few high-priority ones,
//! some of which fail or panic, then prints one JSON line per tick with the
//! queue state until the generation drains. A final line carries the
//! controller metrics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use specflow_core::{load_dotenv, Config, TaskSettings};
use specflow_tasks::{QueueListener, Task, TaskController, TaskPriority, TaskState, TaskStatus};

// ── CLI ─────────────────────────────────────────────────────────────

/// Exercise the task controller with synthetic work.
#[derive(Parser, Debug)]
#[command(name = "task-bench", version, about)]
struct Cli {
    /// Optional TOML file with a `[tasks]` section.
    #[arg(long, env = "SPECFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Normal-priority tasks to submit.
    #[arg(long, default_value_t = 20)]
    tasks: usize,

    /// High-priority tasks to submit after the normal batch.
    #[arg(long, default_value_t = 2)]
    high: usize,

    /// Override the concurrency cap (0 = automatic).
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Override the dispatch tick in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// How many normal tasks end in an error state.
    #[arg(long, default_value_t = 1)]
    fail: usize,

    /// How many normal tasks panic mid-run.
    #[arg(long, default_value_t = 1)]
    panic: usize,

    /// Wall time each synthetic task spends working.
    #[arg(long, default_value_t = 400)]
    duration_ms: u64,

    /// Give up (and cancel everything) after this many seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

// ── Synthetic work ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Finish,
    Fail,
    Panic,
}

const STEPS: u64 = 10;

struct SleepTask {
    name: String,
    state: TaskState,
    step: Duration,
    done_steps: AtomicU64,
    ending: Ending,
}

impl SleepTask {
    fn new(name: String, duration: Duration, ending: Ending) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: TaskState::new(),
            step: duration / STEPS as u32,
            done_steps: AtomicU64::new(0),
            ending,
        })
    }
}

impl Task for SleepTask {
    fn description(&self) -> String {
        self.name.clone()
    }

    fn finished_percentage(&self) -> f64 {
        self.done_steps.load(Ordering::Relaxed) as f64 / STEPS as f64
    }

    fn run(&self) {
        self.state.set_status(TaskStatus::Processing);
        for step in 1..=STEPS {
            if self.state.is_canceled() {
                return;
            }
            thread::sleep(self.step);
            self.done_steps.store(step, Ordering::Relaxed);

            if step == STEPS / 2 {
                match self.ending {
                    Ending::Fail => {
                        self.state.error("synthetic failure at half way");
                        return;
                    }
                    Ending::Panic => panic!("synthetic panic in {}", self.name),
                    Ending::Finish => {}
                }
            }
        }
        self.state.set_status(TaskStatus::Finished);
    }

    fn state(&self) -> &TaskState {
        &self.state
    }
}

struct ActiveCountLogger;

impl QueueListener for ActiveCountLogger {
    fn on_active_count_changed(&self, active: usize) {
        info!(active, "active tasks");
    }
}

// ── Output ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TickLine {
    elapsed_ms: u64,
    queued: usize,
    active: usize,
    running_workers: usize,
    waiting: usize,
    processing: usize,
    finished: usize,
    error: usize,
    canceled: usize,
}

impl TickLine {
    fn sample(controller: &TaskController, started: Instant) -> Self {
        let rows = controller.task_rows();
        let count = |status: TaskStatus| rows.iter().filter(|r| r.status == status).count();
        Self {
            elapsed_ms: started.elapsed().as_millis() as u64,
            queued: rows.len(),
            active: controller.active_count(),
            running_workers: controller.running_workers(),
            waiting: count(TaskStatus::Waiting),
            processing: count(TaskStatus::Processing),
            finished: count(TaskStatus::Finished),
            error: count(TaskStatus::Error),
            canceled: count(TaskStatus::Canceled),
        }
    }
}

fn resolve_settings(cli: &Cli, config: &Config) -> Result<TaskSettings> {
    let mut settings = match &cli.config {
        Some(path) => TaskSettings::from_file(path, &config.profile)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => config.tasks.clone(),
    };
    if let Some(max) = cli.max_concurrent {
        settings.max_concurrent_tasks = max;
    }
    if let Some(tick) = cli.tick_ms {
        settings.tick_interval_ms = tick;
    }
    Ok(settings)
}

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.fail + cli.panic > cli.tasks {
        bail!(
            "--fail ({}) + --panic ({}) exceeds --tasks ({})",
            cli.fail,
            cli.panic,
            cli.tasks
        );
    }

    let config = Config::from_env();
    config.log_summary();
    let settings = resolve_settings(&cli, &config)?;

    let reported = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&reported);
    let controller = TaskController::from_settings(
        &settings,
        Arc::new(move |description: &str, message: &str| {
            sink.fetch_add(1, Ordering::Relaxed);
            warn!(task = %description, error = %message, "task reported an error");
        }),
    )
    .context("invalid task settings")?;
    controller.add_queue_listener(Arc::new(ActiveCountLogger));
    controller.start()?;

    let duration = Duration::from_millis(cli.duration_ms);
    let normal: Vec<Arc<dyn Task>> = (0..cli.tasks)
        .map(|i| {
            let ending = if i < cli.fail {
                Ending::Fail
            } else if i < cli.fail + cli.panic {
                Ending::Panic
            } else {
                Ending::Finish
            };
            SleepTask::new(format!("normal-{i}"), duration, ending) as Arc<dyn Task>
        })
        .collect();
    let high: Vec<Arc<dyn Task>> = (0..cli.high)
        .map(|i| SleepTask::new(format!("high-{i}"), duration, Ending::Finish) as Arc<dyn Task>)
        .collect();

    let started = Instant::now();
    controller.submit(normal, TaskPriority::Normal);
    controller.submit(high, TaskPriority::High);
    info!(
        normal = cli.tasks,
        high = cli.high,
        max_concurrent = controller.config().resolved_max_concurrent_tasks(),
        "bench submitted"
    );

    let tick = Duration::from_millis(settings.tick_interval_ms);
    let deadline = started + Duration::from_secs(cli.timeout_secs);
    loop {
        thread::sleep(tick);
        let line = TickLine::sample(&controller, started);
        println!("{}", serde_json::to_string(&line)?);

        if line.queued == 0 && line.running_workers == 0 {
            break;
        }
        if Instant::now() >= deadline {
            controller.cancel_all();
            controller.shutdown();
            bail!("bench did not drain within {}s", cli.timeout_secs);
        }
    }

    controller.shutdown();
    println!("{}", serde_json::to_string(&controller.metrics())?);
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        errors_reported = reported.load(Ordering::Relaxed),
        "bench finished"
    );
    Ok(())
}
