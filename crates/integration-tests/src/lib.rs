//! Shared helpers for the behavioural test suites

use ferry_core::application::RunnerConfig;
use ferry_core::port::id_provider::mocks::SequentialIdProvider;
use ferry_core::port::clock::mocks::SteppingClock;
use ferry_core::port::work_unit::mocks::{ConcurrencyProbe, Journal, MockWorkUnit};
use ferry_core::port::SharedUnit;
use ferry_core::{BatchCoordinator, TaskRunner};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub type Unit = SharedUnit<String, String>;

pub fn runner(max_concurrency: usize) -> TaskRunner {
    TaskRunner::new(RunnerConfig::new(max_concurrency)).expect("valid runner config")
}

pub fn coordinator(runner: &TaskRunner) -> BatchCoordinator {
    BatchCoordinator::with_providers(
        runner.clone(),
        Arc::new(SteppingClock::new(10_000, 5)),
        Arc::new(SequentialIdProvider::new("batch")),
    )
}

/// Poll `cond` until it holds, failing the test after ~2s
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

/// Shared fixtures for one test: a gate, a journal and a concurrency probe
#[derive(Clone)]
pub struct Harness {
    pub gate: Arc<Semaphore>,
    pub journal: Journal,
    pub probe: ConcurrencyProbe,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            journal: Journal::new(),
            probe: ConcurrencyProbe::new(),
        }
    }

    /// Let `n` gated invocations finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Attach the harness to a mock unit
    pub fn wire(&self, unit: MockWorkUnit) -> MockWorkUnit {
        unit.with_gate(Arc::clone(&self.gate))
            .with_journal(self.journal.clone())
            .with_probe(self.probe.clone())
    }

    pub fn gated_success(&self, name: &str) -> Unit {
        Arc::new(self.wire(MockWorkUnit::new_success(name)))
    }

    /// One-shot closure for `TaskRunner::submit` that records its start and
    /// waits on the gate
    pub fn gated_call(
        &self,
        name: &str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, String>> + Send + 'static {
        let name = name.to_string();
        let gate = Arc::clone(&self.gate);
        let journal = self.journal.clone();
        move || {
            async move {
                journal.record(name.clone());
                gate.acquire().await.map_err(|e| e.to_string())?.forget();
                Ok(name)
            }
            .boxed()
        }
    }
}
