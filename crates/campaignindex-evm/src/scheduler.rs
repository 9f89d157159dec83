//! Per-chain timers.
//!
//! Every chain gets its own scan task and, when repair is enabled, a repair
//! task. Ticks that arrive while a cycle is still running are skipped rather
//! than queued, so a slow cycle never overlaps itself. Cancelling the handle
//! stops the timers and interrupts any in-flight cycle at its next await.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use campaignindex_core::error::IndexerError;

use crate::pipeline::ChainPipeline;
use crate::repair::RepairJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Scan,
    Repair,
}

impl TaskKind {
    fn as_str(self) -> &'static str {
        match self {
            TaskKind::Scan => "scan",
            TaskKind::Repair => "repair",
        }
    }
}

/// Drives a set of [`ChainPipeline`]s on their configured intervals.
#[derive(Default)]
pub struct Scheduler {
    pipelines: Vec<Arc<ChainPipeline>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, pipeline: Arc<ChainPipeline>) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Use an externally owned token, e.g. one tied to Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Spawn one scan task per chain, plus a repair task where enabled.
    pub fn start(self) -> SchedulerHandle {
        let mut tasks = JoinSet::new();
        for pipeline in self.pipelines {
            let scan_every = pipeline.scan_config().interval();
            tasks.spawn(run_timer(
                pipeline.clone(),
                TaskKind::Scan,
                scan_every,
                self.cancel.clone(),
            ));

            let repair = pipeline.repair_config();
            if repair.enabled {
                let repair_every = repair.interval();
                tasks.spawn(run_timer(
                    pipeline.clone(),
                    TaskKind::Repair,
                    repair_every,
                    self.cancel.clone(),
                ));
            }
        }
        info!(tasks = tasks.len(), "scheduler started");
        SchedulerHandle {
            cancel: self.cancel,
            tasks,
        }
    }
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl SchedulerHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of timer tasks still running.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every timer and wait for the tasks to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.drain().await;
        info!("scheduler stopped");
    }

    /// Wait until the token is cancelled elsewhere, then drain the tasks.
    pub async fn wait(mut self) {
        self.cancel.cancelled().await;
        self.drain().await;
        info!("scheduler stopped");
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduler task panicked");
            }
        }
    }
}

async fn run_cycle(
    pipeline: &ChainPipeline,
    repair: &RepairJob,
    kind: TaskKind,
) -> Result<(), IndexerError> {
    match kind {
        TaskKind::Scan => pipeline.scan_cycle().await.map(|_| ()),
        TaskKind::Repair => repair.run_once().await.map(|_| ()),
    }
}

async fn run_timer(
    pipeline: Arc<ChainPipeline>,
    kind: TaskKind,
    every: Duration,
    cancel: CancellationToken,
) {
    let chain_id = pipeline.chain_id();
    let task = kind.as_str();
    let repair = RepairJob::new(pipeline.clone());
    // repair waits one period so the first scan gets a head start
    let first = match kind {
        TaskKind::Scan => Instant::now(),
        TaskKind::Repair => Instant::now() + every,
    };
    let mut ticker = tokio::time::interval_at(first, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(chain_id, task, "cycle interrupted by shutdown");
                break;
            }
            r = run_cycle(&pipeline, &repair, kind) => r,
        };

        if let Err(e) = result {
            error!(chain_id, task, error = %e, "cycle failed");
        }
        let took = started.elapsed();
        if took > every {
            warn!(
                chain_id,
                task,
                took_ms = took.as_millis() as u64,
                interval_ms = every.as_millis() as u64,
                "cycle overran its interval, skipping missed ticks"
            );
        }
    }
}
