// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dependency runner: a test dispatches only after every dependency
//! completed, and only runs if they all completed correctly.

use super::{abort_result, run_single, Capacity, RunContext, RunResult, TestRunner};
use crate::{
    errors::RunnerBuildError,
    group::TestGroup,
    test::{Test, TestResult},
};
use indexmap::IndexMap;
use std::{
    collections::{HashMap, VecDeque},
    sync::{mpsc, Arc},
};
use tokio::{runtime::Runtime, sync::mpsc::unbounded_channel, sync::Semaphore};
use tracing::debug;

/// Runs a group in dependency order.
///
/// A test becomes eligible once every in-group dependency has completed;
/// if any of them did not finish with
/// [`Correct`](crate::test::TestResult::Correct), the test is skipped
/// without running and the first such dependency is reported as the cause.
pub struct DependencyRunner {
    group: TestGroup,
    ctx: RunContext,
    runtime: Runtime,
}

impl DependencyRunner {
    /// Creates a runner for `group`.
    ///
    /// The group should have been built with dependency expansion; missing
    /// dependencies do not gate execution.
    pub fn new(group: TestGroup, ctx: RunContext) -> Result<Self, RunnerBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("simgrade-worker")
            .build()
            .map_err(RunnerBuildError::TokioRuntimeCreate)?;
        Ok(Self {
            group,
            ctx,
            runtime,
        })
    }
}

impl TestRunner for DependencyRunner {
    fn run(self: Box<Self>) -> mpsc::Receiver<RunResult> {
        let (tx, rx) = mpsc::channel();
        let DependencyRunner {
            group,
            ctx,
            runtime,
        } = *self;

        std::thread::Builder::new()
            .name("simgrade-dependency-runner".to_string())
            .spawn(move || {
                runtime.block_on(dispatch(group, ctx, tx));
            })
            .expect("runner thread should spawn");

        rx
    }
}

// The dispatcher loop. Worker tasks report completions over an internal
// channel; each completion may release dependents, which are dispatched,
// skipped, or aborted as they become eligible.
async fn dispatch(group: TestGroup, ctx: RunContext, tx: mpsc::Sender<RunResult>) {
    let mut dispatcher = Dispatcher::new(group, ctx, tx);

    // Everything without in-group dependencies is eligible at once.
    let ready: Vec<String> = dispatcher
        .unmet
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(id, _)| id.clone())
        .collect();
    for id in ready {
        dispatcher.make_eligible(&id);
    }
    dispatcher.process_completions();

    while dispatcher.outstanding > 0 {
        let Some(result) = dispatcher.done_rx.recv().await else {
            break;
        };
        dispatcher.outstanding -= 1;
        let id = result.test.dependency_id.clone();
        dispatcher.statuses.insert(id.clone(), result.test.result);
        let _ = dispatcher.tx.send(result);
        dispatcher.completions.push_back(id);
        dispatcher.process_completions();
    }

    // Anything still here was unreachable (the group should be acyclic,
    // but never leave the channel short of results).
    let leftovers: Vec<String> = dispatcher.tests.keys().cloned().collect();
    for id in leftovers {
        dispatcher.emit_abort(&id);
    }
}

struct Dispatcher {
    ctx: RunContext,
    tx: mpsc::Sender<RunResult>,
    tests: IndexMap<String, Test>,
    // Count of in-group dependencies not yet completed, per test.
    unmet: IndexMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    statuses: HashMap<String, TestResult>,
    completions: VecDeque<String>,
    semaphore: Option<Arc<Semaphore>>,
    done_tx: tokio::sync::mpsc::UnboundedSender<RunResult>,
    done_rx: tokio::sync::mpsc::UnboundedReceiver<RunResult>,
    outstanding: usize,
}

impl Dispatcher {
    fn new(group: TestGroup, ctx: RunContext, tx: mpsc::Sender<RunResult>) -> Self {
        let tests = group.tests;

        let mut unmet: IndexMap<String, usize> = IndexMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (id, test) in &tests {
            let deps: Vec<&String> = test
                .depends
                .iter()
                .filter(|dep| *dep != id && tests.contains_key(*dep))
                .collect();
            unmet.insert(id.clone(), deps.len());
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        let semaphore = match ctx.capacity() {
            Capacity::Unbounded => None,
            Capacity::Limit(n) => Some(Arc::new(Semaphore::new(n.get()))),
        };
        let (done_tx, done_rx) = unbounded_channel();

        Self {
            ctx,
            tx,
            tests,
            unmet,
            dependents,
            statuses: HashMap::new(),
            completions: VecDeque::new(),
            semaphore,
            done_tx,
            done_rx,
            outstanding: 0,
        }
    }

    // Walks the completion queue, releasing dependents as their last
    // dependency lands. Skips and aborts complete immediately and feed
    // back into the queue, cascading without ever dispatching.
    fn process_completions(&mut self) {
        while let Some(done_id) = self.completions.pop_front() {
            let Some(released) = self.dependents.get(&done_id).cloned() else {
                continue;
            };
            for id in released {
                let Some(count) = self.unmet.get_mut(&id) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    self.make_eligible(&id);
                }
            }
        }
    }

    // Called exactly once per test, when its dependency count hits zero.
    fn make_eligible(&mut self, id: &str) {
        self.unmet.shift_remove(id);
        let Some(test) = self.tests.shift_remove(id) else {
            return;
        };

        if self.ctx.is_shutdown() {
            self.complete_immediately(abort_result(&self.ctx, test));
            return;
        }

        if let Some(cause) = self.first_bad_dep(&test) {
            self.complete_immediately(self.skip_result(test, cause));
            return;
        }

        debug!(id = %id, "dispatching test");
        let ctx = self.ctx.clone();
        let done_tx = self.done_tx.clone();
        let semaphore = self.semaphore.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let result = run_single(ctx, test).await;
            // A send failure means the dispatcher is gone; nothing to do.
            let _ = done_tx.send(result);
        });
    }

    // The first dependency, in declared order, that did not complete
    // correctly.
    fn first_bad_dep(&self, test: &Test) -> Option<String> {
        test.depends
            .iter()
            .find(|dep| {
                self.statuses
                    .get(*dep)
                    .is_some_and(|status| *status != TestResult::Correct)
            })
            .cloned()
    }

    fn skip_result(&self, mut test: Test, cause: String) -> RunResult {
        test.result = TestResult::Skip;
        if let Some(persistence) = &self.ctx.persistence {
            persistence.notify_complete(&test);
        }
        RunResult {
            test,
            skip_cause: Some(cause),
            error: None,
        }
    }

    // Records and emits a result that never went through a worker.
    fn complete_immediately(&mut self, result: RunResult) {
        let id = result.test.dependency_id.clone();
        self.statuses.insert(id.clone(), result.test.result);
        let _ = self.tx.send(result);
        self.completions.push_back(id);
    }

    fn emit_abort(&mut self, id: &str) {
        if let Some(test) = self.tests.shift_remove(id) {
            let result = abort_result(&self.ctx, test);
            let _ = self.tx.send(result);
        }
    }
}
