//! Simulated multipart upload
//!
//! Each unit stands in for one "upload part" request: it sleeps for a random
//! latency and fails with the configured probability. Parts record their own
//! attempts in a shared ledger, since the batch only reports aggregates.

use crate::settings::{SimulationConfig, Settings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ferry_core::domain::{BatchReport, UnitId};
use ferry_core::port::{SharedUnit, WorkUnit};
use ferry_core::{BatchCoordinator, BatchError, Placement, RunnerStats, TaskRunner};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
#[error("part {part} rejected by storage on attempt {attempt}")]
pub struct PartError {
    pub part: usize,
    pub attempt: u32,
}

/// Final state of one part as seen by the part itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartRecord {
    pub part: usize,
    pub attempts: u32,
    pub state: PartState,
    pub last_latency_ms: u64,
}

/// Shared record of part attempts
#[derive(Clone, Default)]
pub struct Ledger {
    parts: Arc<Mutex<BTreeMap<usize, PartRecord>>>,
}

impl Ledger {
    fn record(&self, part: usize, state: PartState, latency_ms: u64) -> u32 {
        let mut parts = self.parts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = parts.entry(part).or_insert(PartRecord {
            part,
            attempts: 0,
            state: state.clone(),
            last_latency_ms: 0,
        });
        entry.attempts += 1;
        entry.state = state;
        entry.last_latency_ms = latency_ms;
        entry.attempts
    }

    pub fn records(&self) -> Vec<PartRecord> {
        let parts = self.parts.lock().unwrap_or_else(|e| e.into_inner());
        parts.values().cloned().collect()
    }
}

/// One simulated upload-part request
pub struct SimulatedPart {
    part: usize,
    failure_rate: f64,
    max_latency_ms: u64,
    ledger: Ledger,
}

impl SimulatedPart {
    pub fn new(part: usize, config: &SimulationConfig, ledger: Ledger) -> Self {
        Self {
            part,
            failure_rate: config.failure_rate,
            max_latency_ms: config.max_latency_ms,
            ledger,
        }
    }
}

#[async_trait]
impl WorkUnit for SimulatedPart {
    type Output = usize;
    type Error = PartError;

    async fn run(&self) -> Result<usize, PartError> {
        // ThreadRng is not Send: draw before the first await
        let (latency_ms, fails) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..=self.max_latency_ms),
                rng.gen_bool(self.failure_rate),
            )
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fails {
            let attempt = self.ledger.record(self.part, PartState::Failed, latency_ms);
            debug!(part = self.part, attempt, latency_ms, "Part upload failed");
            Err(PartError {
                part: self.part,
                attempt,
            })
        } else {
            let attempt = self.ledger.record(self.part, PartState::Uploaded, latency_ms);
            debug!(part = self.part, attempt, latency_ms, "Part uploaded");
            Ok(self.part)
        }
    }
}

/// Everything the summary renderer needs
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub batch_id: String,
    pub fulfilled: bool,
    pub report: BatchReport,
    pub failed_units: Vec<UnitId>,
    pub inserted: usize,
    pub runner: RunnerStats,
    pub parts: Vec<PartRecord>,
}

fn parts(
    range: std::ops::Range<usize>,
    config: &SimulationConfig,
    ledger: &Ledger,
) -> Vec<SharedUnit<usize, PartError>> {
    range
        .map(|part| {
            Arc::new(SimulatedPart::new(part, config, ledger.clone())) as SharedUnit<usize, PartError>
        })
        .collect()
}

/// Run one simulated multipart upload through a fresh runner
pub async fn run_simulation(settings: &Settings) -> Result<SimulationSummary> {
    let runner = TaskRunner::new(settings.runner.clone()).context("Failed to create runner")?;
    let coordinator = BatchCoordinator::new(runner.clone());
    let sim = &settings.simulation;
    let ledger = Ledger::default();

    info!(
        units = sim.units,
        insert = sim.insert,
        failure_rate = sim.failure_rate,
        max_concurrency = runner.max_concurrency(),
        "Starting simulated upload"
    );

    let handle = coordinator
        .start(parts(0..sim.units, sim, &ledger), settings.batch.clone())
        .context("Failed to start batch")?;

    let mut inserted = 0;
    if sim.insert > 0 {
        tokio::time::sleep(Duration::from_millis(sim.insert_after_ms)).await;
        let extra = parts(sim.units..sim.units + sim.insert, sim, &ledger);
        match handle.insert(extra, Placement::Back) {
            Ok(ids) => {
                inserted = ids.len();
                info!(batch_id = %handle.id(), inserted, "Inserted parts mid-flight");
            }
            Err(e) => warn!(error = %e, "Mid-flight insertion skipped"),
        }
    }

    let (fulfilled, report, failed_units) = match handle.done().await {
        Ok(report) => (true, report, Vec::new()),
        Err(BatchError::Rejected {
            report, failures, ..
        }) => {
            let ids = failures.iter().map(|f| f.unit_id).collect();
            (false, report, ids)
        }
        Err(e) => return Err(e).context("Batch did not settle"),
    };

    Ok(SimulationSummary {
        batch_id: handle.id().to_string(),
        fulfilled,
        report,
        failed_units,
        inserted,
        runner: runner.stats(),
        parts: ledger.records(),
    })
}
