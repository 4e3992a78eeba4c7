// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runner tests with a scripted driver standing in for the
//! simulator.

use camino_tempfile::{tempdir, Utf8TempDir};
use simgrade::{
    driver::SimulatorDriver,
    environment::TestEnvironment,
    errors::DriverError,
    group::{GroupConfig, TestGroup},
    persistence::Persistence,
    runner::{Capacity, DependencyRunner, RunContext, RunResult, SimpleRunner, TestRunner},
    test::{ScoringMethod, Test, TestResult},
};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// A driver that returns pre-scripted results and records concurrency.
#[derive(Default)]
struct ScriptedDriver {
    // dependency id -> scripted result; unlisted tests come back correct.
    outcomes: HashMap<String, TestResult>,
    panic_on: Option<String>,
    delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    fn failing(id: &str) -> Self {
        let mut outcomes = HashMap::new();
        outcomes.insert(id.to_string(), TestResult::Incorrect);
        ScriptedDriver {
            outcomes,
            ..ScriptedDriver::default()
        }
    }

    fn max_observed(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl SimulatorDriver for ScriptedDriver {
    fn run_test(&self, test: &mut Test) -> Result<(), DriverError> {
        if self.panic_on.as_deref() == Some(&test.dependency_id) {
            panic!("scripted panic for {}", test.dependency_id);
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        self.order
            .lock()
            .unwrap()
            .push(test.dependency_id.clone());

        test.result = self
            .outcomes
            .get(&test.dependency_id)
            .copied()
            .unwrap_or(TestResult::Correct);
        if test.result == TestResult::Correct
            && test.scoring_method == ScoringMethod::Entire
        {
            test.points_earned = test.points_available;
        }
        Ok(())
    }
}

fn env_with(files: &[(&str, &str)]) -> (Utf8TempDir, TestEnvironment) {
    let dir = tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
    let env = TestEnvironment::load(dir.path()).unwrap();
    (dir, env)
}

fn chain_env() -> (Utf8TempDir, TestEnvironment) {
    env_with(&[
        ("boot.t", "q"),
        ("threads/tt1.t", "---\ndepends: [boot]\n---\ntt1"),
        ("sync/sy1.t", "---\ndepends: [threads/tt1]\n---\nsy1"),
    ])
}

fn group(env: &TestEnvironment, use_deps: bool, seeds: &[&str]) -> TestGroup {
    let config = GroupConfig {
        name: "test".to_string(),
        use_deps,
        tests: seeds.iter().map(|s| s.to_string()).collect(),
    };
    TestGroup::from_config(&config, env).unwrap()
}

fn collect(rx: std::sync::mpsc::Receiver<RunResult>) -> BTreeMap<String, RunResult> {
    rx.into_iter()
        .map(|r| (r.test.dependency_id.clone(), r))
        .collect()
}

#[test]
fn simple_runner_runs_everything() {
    let (_dir, env) = chain_env();
    let g = group(&env, false, &["boot", "threads/tt1", "sync/sy1"]);
    let driver = Arc::new(ScriptedDriver::default());
    let ctx = RunContext::new(driver, Capacity::Unbounded);

    let runner = Box::new(SimpleRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 3);
    assert!(results
        .values()
        .all(|r| r.test.result == TestResult::Correct && r.error.is_none()));
}

#[test]
fn simple_runner_respects_capacity() {
    let (_dir, env) = env_with(&[
        ("a.t", "q"),
        ("b.t", "q"),
        ("c.t", "q"),
        ("d.t", "q"),
    ]);
    let g = group(&env, false, &["a", "b", "c", "d"]);
    let driver = Arc::new(ScriptedDriver {
        delay: Some(Duration::from_millis(25)),
        ..ScriptedDriver::default()
    });
    let ctx = RunContext::new(driver.clone(), Capacity::sequential());

    let runner = Box::new(SimpleRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 4);
    assert_eq!(driver.max_observed(), 1, "tests ran sequentially");
}

#[test]
fn dependency_runner_orders_chain() {
    let (_dir, env) = chain_env();
    let g = group(&env, true, &["sync/sy1"]);
    let driver = Arc::new(ScriptedDriver::default());
    let ctx = RunContext::new(driver.clone(), Capacity::Unbounded);

    let runner = Box::new(DependencyRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 3);
    assert!(results
        .values()
        .all(|r| r.test.result == TestResult::Correct));

    let order = driver.order.lock().unwrap().clone();
    let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
    assert!(pos("boot") < pos("threads/tt1"));
    assert!(pos("threads/tt1") < pos("sync/sy1"));
}

#[test]
fn dependency_runner_skips_on_failure() {
    let (_dir, env) = chain_env();
    let g = group(&env, true, &["sync/sy1"]);
    let driver = Arc::new(ScriptedDriver::failing("boot"));
    let ctx = RunContext::new(driver.clone(), Capacity::Unbounded);

    let runner = Box::new(DependencyRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 3);
    assert_eq!(results["boot"].test.result, TestResult::Incorrect);

    // tt1 is skipped because of boot; sy1 because of tt1.
    let tt1 = &results["threads/tt1"];
    assert_eq!(tt1.test.result, TestResult::Skip);
    assert_eq!(tt1.skip_cause.as_deref(), Some("boot"));
    let sy1 = &results["sync/sy1"];
    assert_eq!(sy1.test.result, TestResult::Skip);
    assert_eq!(sy1.skip_cause.as_deref(), Some("threads/tt1"));

    // Skipped tests never reached the driver.
    assert_eq!(driver.order.lock().unwrap().as_slice(), ["boot"]);
}

#[test]
fn shutdown_aborts_pending_tests() {
    let (_dir, env) = chain_env();
    let g = group(&env, true, &["sync/sy1"]);
    let driver = Arc::new(ScriptedDriver::default());
    let ctx = RunContext::new(driver, Capacity::Unbounded);

    ctx.shutdown();
    let runner = Box::new(DependencyRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 3);
    assert!(results
        .values()
        .all(|r| r.test.result == TestResult::Abort));
}

#[test]
fn panicking_driver_reports_infrastructure_error() {
    let (_dir, env) = env_with(&[("a.t", "q"), ("b.t", "q")]);
    let g = group(&env, false, &["a", "b"]);
    let driver = Arc::new(ScriptedDriver {
        panic_on: Some("a".to_string()),
        ..ScriptedDriver::default()
    });
    let ctx = RunContext::new(driver, Capacity::Unbounded);

    let runner = Box::new(SimpleRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 2, "a failing test does not halt the others");
    let a = &results["a"];
    assert_eq!(a.test.result, TestResult::Abort);
    assert!(a.error.is_some());
    assert_eq!(results["b"].test.result, TestResult::Correct);
}

#[test]
fn persistence_sees_every_test() {
    #[derive(Default)]
    struct CountingPersistence {
        started: AtomicUsize,
        completed: AtomicUsize,
        saw_skip: AtomicBool,
    }

    impl Persistence for CountingPersistence {
        fn notify_start(&self, _test: &Test) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn notify_complete(&self, test: &Test) {
            self.completed.fetch_add(1, Ordering::SeqCst);
            if test.result == TestResult::Skip {
                self.saw_skip.store(true, Ordering::SeqCst);
            }
        }
    }

    let (_dir, env) = chain_env();
    let g = group(&env, true, &["sync/sy1"]);
    let driver = Arc::new(ScriptedDriver::failing("threads/tt1"));
    let persistence = Arc::new(CountingPersistence::default());
    let ctx = RunContext::new(driver, Capacity::Unbounded)
        .with_persistence(persistence.clone());

    let runner = Box::new(DependencyRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results.len(), 3);
    // boot and tt1 started; sy1 skipped without starting.
    assert_eq!(persistence.started.load(Ordering::SeqCst), 2);
    assert_eq!(persistence.completed.load(Ordering::SeqCst), 3);
    assert!(persistence.saw_skip.load(Ordering::SeqCst));
}

#[test]
fn graded_target_instance_runs_and_scores() {
    let (_dir, env) = env_with(&[
        ("boot.t", "q"),
        ("threads/tt1.t", "---\ndepends: [boot]\n---\ntt1"),
        (
            "asst1.tt",
            "name: asst1\npoints: 25\nkconfig: ASST1\ntests:\n  - id: threads/tt1\n    points: 25\n",
        ),
    ]);

    let target = env.target("asst1").unwrap();
    let g = target.instance(&env).unwrap();

    // boot came in as a dependency and carries no points.
    assert_eq!(g.tests.len(), 2);
    assert!(g.tests["boot"].is_dependency);
    assert_eq!(g.tests["threads/tt1"].points_available, 25);
    assert!(g.tests["threads/tt1"].required_by.contains("asst1"));
    assert!(g.tests["boot"].required_by.contains("asst1"));

    let driver = Arc::new(ScriptedDriver::default());
    let ctx = RunContext::new(driver, Capacity::Unbounded);
    let runner = Box::new(DependencyRunner::new(g, ctx).unwrap());
    let results = collect(runner.run());

    assert_eq!(results["threads/tt1"].test.points_earned, 25);
    assert_eq!(results["boot"].test.points_earned, 0);
}
