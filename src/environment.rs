// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test environment: a registry of tests and targets discovered from a
//! directory tree.
//!
//! Every `*.t` file parses as a test, keyed by its dependency id (the path
//! from the root without the extension); every `*.tt` file parses as a
//! target, keyed by name. The registry is read-only once loaded; groups
//! clone tests out of it.

use crate::{
    errors::EnvironmentError,
    target::Target,
    test::Test,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use tracing::debug;

/// An indexed tree of tests and targets.
#[derive(Clone, Debug, Default)]
pub struct TestEnvironment {
    test_dir: Utf8PathBuf,
    tests: BTreeMap<String, Test>,
    targets: BTreeMap<String, Target>,
    tags: BTreeMap<String, Vec<String>>,
}

impl TestEnvironment {
    /// Discovers and indexes every test and target under `dir`.
    ///
    /// Meta-target relationships are validated and linked as part of the
    /// load; any violation fails the whole load.
    pub fn load(dir: impl AsRef<Utf8Path>) -> Result<Self, EnvironmentError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EnvironmentError::NotADirectory {
                path: dir.to_owned(),
            });
        }

        let mut env = TestEnvironment {
            test_dir: dir.to_owned(),
            ..TestEnvironment::default()
        };
        env.walk(dir)?;
        env.link_targets()?;

        debug!(
            tests = env.tests.len(),
            targets = env.targets.len(),
            "test environment loaded"
        );
        Ok(env)
    }

    /// The root the environment was loaded from.
    pub fn test_dir(&self) -> &Utf8Path {
        &self.test_dir
    }

    /// Looks up a test by dependency id.
    pub fn test(&self, id: &str) -> Option<&Test> {
        self.tests.get(id)
    }

    /// Looks up a target by name.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// All tests, by dependency id.
    pub fn tests(&self) -> &BTreeMap<String, Test> {
        &self.tests
    }

    /// All targets, by name.
    pub fn targets(&self) -> &BTreeMap<String, Target> {
        &self.targets
    }

    /// The tests carrying a tag.
    pub fn tests_for_tag(&self, tag: &str) -> Vec<&Test> {
        self.tags
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.tests.get(id)).collect())
            .unwrap_or_default()
    }

    fn walk(&mut self, dir: &Utf8Path) -> Result<(), EnvironmentError> {
        let entries = dir.read_dir_utf8().map_err(|source| EnvironmentError::Io {
            path: dir.to_owned(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| EnvironmentError::Io {
                path: dir.to_owned(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| EnvironmentError::Io {
                path: path.to_owned(),
                source,
            })?;

            if file_type.is_dir() {
                self.walk(path)?;
            } else if path.extension() == Some("t") {
                self.add_test(path)?;
            } else if path.extension() == Some("tt") {
                self.add_target(path)?;
            }
        }
        Ok(())
    }

    fn add_test(&mut self, path: &Utf8Path) -> Result<(), EnvironmentError> {
        let test =
            Test::from_file(path, &self.test_dir).map_err(|source| EnvironmentError::Test {
                path: path.to_owned(),
                source,
            })?;
        for tag in &test.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .push(test.dependency_id.clone());
        }
        debug!(id = %test.dependency_id, "indexed test");
        self.tests.insert(test.dependency_id.clone(), test);
        Ok(())
    }

    fn add_target(&mut self, path: &Utf8Path) -> Result<(), EnvironmentError> {
        let target = Target::from_file(path).map_err(|source| EnvironmentError::Target {
            path: path.to_owned(),
            source,
        })?;
        if self.targets.contains_key(&target.name) {
            return Err(EnvironmentError::DuplicateTargetName {
                name: target.name.clone(),
                path: path.to_owned(),
            });
        }
        debug!(name = %target.name, "indexed target");
        self.targets.insert(target.name.clone(), target);
        Ok(())
    }

    // Validates meta-targets and resolves each target's previous
    // sub-targets. Computed against the immutable map first, then applied.
    fn link_targets(&mut self) -> Result<(), EnvironmentError> {
        let mut links: Vec<(String, Vec<String>)> = Vec::new();

        for (name, target) in &self.targets {
            if target.is_meta_target {
                // A meta-target accumulates all of its sub-targets.
                links.push((name.clone(), target.validate_meta(&self.targets)?));
            } else if !target.meta_name.is_empty() {
                links.push((name.clone(), target.link_sub(&self.targets)?));
            }
        }

        for (name, previous) in links {
            if let Some(target) = self.targets.get_mut(&name) {
                target.previous_sub_target_names = previous;
            }
        }
        Ok(())
    }
}
