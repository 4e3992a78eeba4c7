// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persistence interface: hooks invoked around each test's execution.
//!
//! Implementations (console printers, database writers) live outside the
//! core; runners call these hooks from worker context, so implementations
//! must be thread-safe.

use crate::test::Test;

/// Receives lifecycle notifications for each test in a run.
pub trait Persistence: Send + Sync {
    /// Called immediately before a test is handed to the driver.
    fn notify_start(&self, test: &Test);

    /// Called once a test has finished, skipped, or aborted, with its
    /// final state.
    fn notify_complete(&self, test: &Test);
}

/// A persistence sink that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
    fn notify_start(&self, _test: &Test) {}

    fn notify_complete(&self, _test: &Test) {}
}
