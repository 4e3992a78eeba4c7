// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Targets: grading manifests that bundle tests with points and scoring
//! rules.
//!
//! A target is either runnable on its own, a sub-target of a meta-target,
//! or a meta-target composed of ordered sub-targets. Meta relationships are
//! stored as names and resolved through the
//! [`TestEnvironment`](crate::environment::TestEnvironment).

use crate::{
    config::TriBool,
    environment::TestEnvironment,
    errors::{CommandApplyError, GroupBuildError, MetaTargetError, TargetParseError},
    group::{GroupConfig, TestGroup},
    test::{ScoringMethod, Test},
};
use camino::Utf8Path;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    str::FromStr,
};

/// The kind of work a target grades.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// An assignment target.
    #[default]
    Asst,
    /// A performance target.
    Perf,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Asst => write!(f, "asst"),
            TargetType::Perf => write!(f, "perf"),
        }
    }
}

/// A grading manifest.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Target {
    /// The target name, unique within an environment.
    pub name: String,
    /// Whether submissions are currently accepted.
    pub active: TriBool,
    /// Manifest version.
    pub version: u32,
    /// Assignment or performance grading.
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Total points; must equal the sum over `tests`.
    pub points: u32,
    /// The kernel build label tests run against.
    pub kconfig: String,
    /// Whether a built userland is required.
    #[serde(rename = "userland")]
    pub requires_userland: bool,
    /// The graded tests.
    pub tests: Vec<TargetTest>,
    /// Whether this target only composes sub-targets.
    pub is_meta_target: bool,
    /// Ordered sub-target names (meta-targets only).
    pub sub_target_names: Vec<String>,
    /// The meta-target this target belongs to, if any.
    pub meta_name: String,
    /// Display name for front ends.
    pub print_name: String,
    /// Free-form description.
    pub description: String,
    /// Whether runs appear on the leaderboard.
    pub leaderboard: TriBool,

    /// Names of the sub-targets whose work this target's grading
    /// accumulates, in meta order. Populated by the environment.
    #[serde(skip)]
    pub previous_sub_target_names: Vec<String>,
}

/// The scoring assignment for one test within a target.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetTest {
    /// The test's dependency id.
    pub id: String,
    /// How points map onto the test's commands.
    pub scoring: ScoringMethod,
    /// Points for the test.
    pub points: u32,
    /// Points for a leak-free run.
    pub mem_leak_points: u32,
    /// Per-command overrides.
    pub commands: Vec<TargetCommand>,
}

/// A per-command override within a target test.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetCommand {
    /// The command id to match.
    pub id: String,
    /// 1-based instance to apply to; 0 applies to every instance.
    pub index: u32,
    /// Points for the command under partial scoring.
    pub points: u32,
    /// Replacement positional arguments.
    pub args: Vec<String>,
}

impl Target {
    /// Loads a target from a manifest file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, TargetParseError> {
        let text = fs::read_to_string(path).map_err(|source| TargetParseError::Io {
            path: path.to_owned(),
            source,
        })?;
        text.parse()
    }

    // Normalizes the tri-state display fields after deserialization.
    fn fix_defaults(&mut self) {
        if self.active != TriBool::False {
            self.active = TriBool::True;
        }
        if self.leaderboard != TriBool::False {
            self.leaderboard = TriBool::True;
        }
    }

    /// Validates this meta-target against the environment's targets and
    /// returns its ordered sub-target names.
    ///
    /// Meta-targets carry no tests of their own, name at least one
    /// sub-target, and agree with every sub-target on kernel config, type,
    /// and userland requirement; their points must equal the sub-target
    /// total.
    pub(crate) fn validate_meta(
        &self,
        targets: &BTreeMap<String, Target>,
    ) -> Result<Vec<String>, MetaTargetError> {
        if !self.is_meta_target {
            return Err(MetaTargetError::NotMetaTarget {
                name: self.name.clone(),
            });
        }
        if !self.tests.is_empty() {
            return Err(MetaTargetError::HasOwnTests {
                name: self.name.clone(),
            });
        }
        if self.sub_target_names.is_empty() {
            return Err(MetaTargetError::NoSubTargets {
                name: self.name.clone(),
            });
        }

        let mut points = 0u32;
        for sub_name in &self.sub_target_names {
            let sub = targets
                .get(sub_name)
                .ok_or_else(|| MetaTargetError::UnknownSubTarget {
                    meta: self.name.clone(),
                    sub: sub_name.clone(),
                })?;
            if sub.requires_userland != self.requires_userland {
                return Err(MetaTargetError::UserlandMismatch {
                    meta: self.name.clone(),
                    sub: sub_name.clone(),
                });
            }
            if sub.kconfig != self.kconfig {
                return Err(MetaTargetError::KConfigMismatch {
                    meta: self.name.clone(),
                    sub: sub_name.clone(),
                });
            }
            if sub.target_type != self.target_type {
                return Err(MetaTargetError::TypeMismatch {
                    meta: self.name.clone(),
                    sub: sub_name.clone(),
                });
            }
            points += sub.points;
        }

        if points != self.points {
            return Err(MetaTargetError::PointsMismatch {
                meta: self.name.clone(),
                expected: self.points,
                actual: points,
            });
        }

        Ok(self.sub_target_names.clone())
    }

    /// Resolves the sub-targets that come before this one in its declared
    /// meta-target.
    pub(crate) fn link_sub(
        &self,
        targets: &BTreeMap<String, Target>,
    ) -> Result<Vec<String>, MetaTargetError> {
        let meta = targets
            .get(&self.meta_name)
            .ok_or_else(|| MetaTargetError::UnknownMetaTarget {
                sub: self.name.clone(),
                meta: self.meta_name.clone(),
            })?;

        let mut previous = Vec::new();
        for name in &meta.sub_target_names {
            if *name == self.name {
                // Sub-targets are ordered; everything before this one
                // accumulates into its grading.
                return Ok(previous);
            }
            if !targets.contains_key(name) {
                return Err(MetaTargetError::UnknownSubTarget {
                    meta: meta.name.clone(),
                    sub: name.clone(),
                });
            }
            previous.push(name.clone());
        }

        Err(MetaTargetError::SubTargetNotListed {
            sub: self.name.clone(),
            meta: meta.name.clone(),
        })
    }

    /// Creates a runnable, scored [`TestGroup`] from this target.
    ///
    /// The group combines this target's tests (none for a meta-target) with
    /// every previous sub-target's, expands dependencies, applies points and
    /// command overrides, and validates the per-target point totals.
    pub fn instance(&self, env: &TestEnvironment) -> Result<TestGroup, Vec<GroupBuildError>> {
        let mut all_targets: Vec<&Target> = Vec::new();
        if !self.is_meta_target {
            all_targets.push(self);
        }
        for name in &self.previous_sub_target_names {
            let target = env
                .target(name)
                .ok_or_else(|| vec![GroupBuildError::UnknownTarget { name: name.clone() }])?;
            all_targets.push(target);
        }

        let mut config = GroupConfig {
            name: self.name.clone(),
            use_deps: true,
            tests: Vec::new(),
        };

        let mut seen = BTreeSet::new();
        for target in &all_targets {
            for tt in &target.tests {
                if !seen.insert(tt.id.clone()) {
                    return Err(vec![GroupBuildError::DuplicateTargetTest {
                        id: tt.id.clone(),
                    }]);
                }
                config.tests.push(tt.id.clone());
            }
        }

        let mut group = TestGroup::from_config(&config, env)?;

        for target in &all_targets {
            let mut total = 0u32;
            for tt in &target.tests {
                let test = group.tests.get_mut(&tt.id).ok_or_else(|| {
                    vec![GroupBuildError::TargetTestNotFound { id: tt.id.clone() }]
                })?;
                tt.apply_to(test).map_err(|source| {
                    vec![GroupBuildError::CommandApply {
                        test: tt.id.clone(),
                        source,
                    }]
                })?;
                test.target_name = Some(target.name.clone());
                total += tt.points;
            }
            if total != target.points {
                return Err(vec![GroupBuildError::TargetPointsMismatch {
                    target: target.name.clone(),
                    expected: target.points,
                    actual: total,
                }]);
            }
        }

        assign_required_by(&mut group);

        Ok(group)
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut target: Target = serde_yaml::from_str(text)?;
        target.fix_defaults();
        Ok(target)
    }
}

impl TargetTest {
    /// Maps this scoring assignment onto a test.
    ///
    /// Argument overrides always apply; command points apply only under
    /// partial scoring, where they must sum to the test's points. An
    /// override may address all instances of a command id or a single
    /// 1-based instance, but once any instance of an id is addressed, every
    /// instance must be covered exactly once.
    pub fn apply_to(&self, test: &mut Test) -> Result<(), CommandApplyError> {
        test.points_available = self.points;
        test.scoring_method = self.scoring;
        test.mem_leak_points = self.mem_leak_points;

        // id -> command positions, in script order.
        let mut instances: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (pos, cmd) in test.commands.iter().enumerate() {
            instances.entry(cmd.id().to_string()).or_default().push(pos);
        }

        // Application bookkeeping stays local to this pass.
        let mut applied: BTreeSet<usize> = BTreeSet::new();
        let mut points_assigned = 0u32;

        for tc in &self.commands {
            let positions =
                instances
                    .get(&tc.id)
                    .ok_or_else(|| CommandApplyError::UnknownCommand {
                        id: tc.id.clone(),
                    })?;

            let selected: Vec<usize> = if tc.index > 0 {
                if tc.index as usize > positions.len() {
                    return Err(CommandApplyError::BadIndex {
                        id: tc.id.clone(),
                        index: tc.index,
                        available: positions.len(),
                    });
                }
                vec![positions[tc.index as usize - 1]]
            } else {
                positions.clone()
            };

            for pos in selected {
                if !applied.insert(pos) {
                    return Err(CommandApplyError::AlreadyApplied { id: tc.id.clone() });
                }
                let command = &mut test.commands[pos];
                if !tc.args.is_empty() {
                    command.input.replace_args(tc.args.clone());
                }
                if self.scoring == ScoringMethod::Partial {
                    command.points_available = tc.points;
                    points_assigned += tc.points;
                }
            }
        }

        if self.scoring == ScoringMethod::Partial && points_assigned != self.points {
            return Err(CommandApplyError::PartialPointsMismatch {
                available: self.points,
                assigned: points_assigned,
            });
        }

        // Any id an override touched must have all of its instances
        // covered.
        for tc in &self.commands {
            if let Some(positions) = instances.get(&tc.id) {
                for pos in positions {
                    if !applied.contains(pos) {
                        return Err(CommandApplyError::UnassignedInstance {
                            id: tc.id.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Marks every graded test's dependency closure as required by its target.
fn assign_required_by(group: &mut TestGroup) {
    let marks: Vec<(String, BTreeSet<String>)> = group
        .tests
        .values()
        .filter_map(|test| {
            test.target_name
                .clone()
                .map(|name| (name, test.expanded_deps.clone()))
        })
        .collect();

    for (name, deps) in marks {
        for test in group.tests.values_mut() {
            if deps.contains(&test.dependency_id) || test.target_name.as_deref() == Some(&name) {
                test.required_by.insert(name.clone());
            }
        }
    }
}
