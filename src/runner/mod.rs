// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runners: execute a [`TestGroup`](crate::group::TestGroup) and stream
//! results.
//!
//! Two runners share the [`TestRunner`] contract: [`SimpleRunner`] treats
//! the group as an unordered set, [`DependencyRunner`] dispatches a test
//! only after its dependencies completed correctly. Both bound concurrency
//! by the [`Capacity`] carried in the [`RunContext`] — there is no
//! process-global manager.

mod deps;
mod simple;

pub use deps::DependencyRunner;
pub use simple::SimpleRunner;

use crate::{
    driver::SimulatorDriver,
    errors::DriverError,
    persistence::Persistence,
    test::{Test, TestResult},
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};
use tracing::debug;

/// How many tests may execute at once.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Capacity {
    /// Every eligible test runs immediately.
    #[default]
    Unbounded,
    /// At most this many tests execute concurrently.
    Limit(NonZeroUsize),
}

impl Capacity {
    /// A capacity of one: strictly sequential execution.
    pub fn sequential() -> Self {
        Capacity::Limit(NonZeroUsize::MIN)
    }

    // The concrete permit count for a group of `group_len` tests.
    pub(crate) fn permits(self, group_len: usize) -> usize {
        match self {
            Capacity::Unbounded => group_len.max(1),
            Capacity::Limit(n) => n.get(),
        }
    }
}

/// Everything a worker needs to run one test: the driver, the optional
/// persistence sink, the capacity, and the shutdown flag.
#[derive(Clone)]
pub struct RunContext {
    driver: Arc<dyn SimulatorDriver>,
    persistence: Option<Arc<dyn Persistence>>,
    capacity: Capacity,
    shutdown: Arc<AtomicBool>,
}

impl RunContext {
    /// Creates a context with the given driver and capacity.
    pub fn new(driver: Arc<dyn SimulatorDriver>, capacity: Capacity) -> Self {
        Self {
            driver,
            persistence: None,
            capacity,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attaches a persistence sink notified around each test.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Signals the runner to stop dispatching new tests.
    ///
    /// In-flight tests run to their natural completion; tests never
    /// dispatched are reported with result
    /// [`Abort`](crate::test::TestResult::Abort).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> Capacity {
        self.capacity
    }
}

/// The outcome of one test within a run.
#[derive(Debug)]
pub struct RunResult {
    /// The finished test, carrying its result and score fields.
    pub test: Test,
    /// For skipped tests, the first dependency that did not complete
    /// correctly.
    pub skip_cause: Option<String>,
    /// An infrastructure failure from the driver, if any. The test's last
    /// known result still accompanies it.
    pub error: Option<DriverError>,
}

/// Executes a test group, streaming results as tests finish.
pub trait TestRunner: Send {
    /// Consumes the runner and starts execution.
    ///
    /// Each test's result is delivered exactly once, in no particular
    /// order between independent tests; the channel closes after every
    /// test has run, skipped, or aborted.
    fn run(self: Box<Self>) -> mpsc::Receiver<RunResult>;
}

// Runs one test through the driver on a blocking thread, wrapped in the
// persistence notifications.
pub(crate) async fn run_single(ctx: RunContext, test: Test) -> RunResult {
    if let Some(persistence) = &ctx.persistence {
        persistence.notify_start(&test);
    }
    debug!(id = %test.dependency_id, "running test");

    // Keep a copy so a panicking driver still yields a result record.
    let fallback = test.clone();
    let driver = Arc::clone(&ctx.driver);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut test = test;
        let result = driver.run_test(&mut test);
        (test, result)
    })
    .await;

    let result = match outcome {
        Ok((test, Ok(()))) => RunResult {
            test,
            skip_cause: None,
            error: None,
        },
        Ok((test, Err(error))) => RunResult {
            test,
            skip_cause: None,
            error: Some(error),
        },
        Err(join_error) => {
            let mut test = fallback;
            test.result = TestResult::Abort;
            RunResult {
                test,
                skip_cause: None,
                error: Some(DriverError::new(format!(
                    "driver task failed: {join_error}"
                ))),
            }
        }
    };

    if let Some(persistence) = &ctx.persistence {
        persistence.notify_complete(&result.test);
    }
    result
}

// Marks a test as aborted without running it.
pub(crate) fn abort_result(ctx: &RunContext, mut test: Test) -> RunResult {
    test.result = TestResult::Abort;
    if let Some(persistence) = &ctx.persistence {
        persistence.notify_complete(&test);
    }
    RunResult {
        test,
        skip_cause: None,
        error: None,
    }
}
