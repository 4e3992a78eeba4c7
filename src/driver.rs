// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External collaborator interfaces: the simulator driver and the kernel
//! build helper.
//!
//! The core treats both as opaque. Drivers run a test's command script
//! against a simulator instance; build helpers produce the kernel tree a
//! target's `kconfig` names.

use crate::{
    errors::{BuildError, DriverError},
    test::Test,
};

/// Drives one test against a simulator instance.
///
/// The driver delivers the test's commands in order, enforcing per-command
/// timeouts and output expectations from the test's configuration, and
/// records `result`, `points_earned`, and the memory-leak fields on the
/// test. An `Err` means the simulator could not be driven at all; a test
/// failing its expectations is a normal `Ok` outcome with the result field
/// set accordingly.
pub trait SimulatorDriver: Send + Sync {
    /// Runs every command of `test`, recording results and scores on it.
    fn run_test(&self, test: &mut Test) -> Result<(), DriverError>;
}

/// Parameters for building a kernel from source.
#[derive(Clone, Debug, Default)]
pub struct BuildConf {
    /// The repository to clone.
    pub repo: String,
    /// The commit to check out.
    pub commit_id: String,
    /// The kernel configuration label to build.
    pub config: String,
}

/// Clones and builds a kernel tree for a grading run.
pub trait BuildHelper {
    /// Fetches the sources named by `conf`, returning build output.
    fn get_sources(&self, conf: &BuildConf) -> Result<String, BuildError>;

    /// Builds the kernel (and userland if required), returning build
    /// output.
    fn build_kernel(&self, conf: &BuildConf) -> Result<String, BuildError>;

    /// Removes any scratch state left behind by the build.
    fn clean_up(&self, conf: &BuildConf) -> Result<(), BuildError>;
}
