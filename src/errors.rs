// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by simgrade.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while parsing a test document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestParseError {
    /// The test file could not be read.
    #[error("failed to read test file `{path}`")]
    Io {
        /// The file that failed to read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The front matter was opened with `---` but never closed.
    #[error("front matter is missing its closing `---` line")]
    UnterminatedFrontMatter,

    /// The front matter was not valid YAML for the test schema.
    #[error("invalid front matter")]
    FrontMatter(#[source] serde_yaml::Error),

    /// A body line was empty or whitespace-only.
    #[error("empty command line in test body")]
    EmptyCommand,

    /// A kernel `q` command appeared anywhere but the final position.
    #[error("`q` must be the last command in a test")]
    QuitNotLast,

    /// A repetition count could not be parsed or was zero.
    #[error("invalid repetition count `{text}`")]
    BadRepeat {
        /// The count as written.
        text: String,
    },

    /// A line used a reserved prefix character with no matching
    /// `commandconf` entry.
    #[error("no command configuration for prefix `{prefix}`")]
    UnknownPrefix {
        /// The prefix character.
        prefix: char,
    },

    /// Expanding a custom prefix re-entered itself (directly or through
    /// another entry's `start`).
    #[error("command prefix `{prefix}` expands recursively")]
    PrefixRecursion {
        /// The prefix character.
        prefix: char,
    },

    /// The `commandconf` table failed validation.
    #[error(transparent)]
    CommandConf(#[from] CommandConfError),
}

/// An error in a custom command-prefix (`commandconf`) table.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandConfError {
    /// A prefix was not exactly one character.
    #[error("command prefix `{prefix}` must be a single character")]
    MultiCharPrefix {
        /// The prefix as written.
        prefix: String,
    },

    /// `$` is the built-in shell prefix and cannot be redefined.
    #[error("command prefix `$` is reserved for the user shell")]
    ShellPrefix,

    /// The character is not in the reserved prefix alphabet.
    #[error("`{prefix}` is not a valid command prefix character")]
    InvalidPrefix {
        /// The rejected character.
        prefix: char,
    },

    /// Two entries defined the same prefix.
    #[error("duplicate command prefix `{prefix}`")]
    DuplicatePrefix {
        /// The duplicated character.
        prefix: char,
    },

    /// An entry had an empty `start` line.
    #[error("command prefix `{prefix}` has an empty start command")]
    EmptyStart {
        /// The offending entry's prefix.
        prefix: char,
    },

    /// An entry's `start` began with its own prefix.
    #[error("start command for prefix `{prefix}` cannot begin with itself")]
    SelfRecursiveStart {
        /// The offending entry's prefix.
        prefix: char,
    },

    /// An entry's `end` began with a registered prefix.
    #[error("end command for prefix `{prefix}` cannot begin with prefix `{referenced}`")]
    EndBeginsWithPrefix {
        /// The offending entry's prefix.
        prefix: char,
        /// The registered prefix the `end` began with.
        referenced: char,
    },

    /// A `start` or `end` referenced a prefix that is not registered.
    #[error("prefix `{referenced}` referenced by `{prefix}` is not defined")]
    UnknownPrefixReference {
        /// The offending entry's prefix.
        prefix: char,
        /// The unregistered character that was referenced.
        referenced: char,
    },
}

/// An error that occurred while parsing a target manifest.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TargetParseError {
    /// The target file could not be read.
    #[error("failed to read target file `{path}`")]
    Io {
        /// The file that failed to read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The document was not valid YAML for the target schema.
    #[error("invalid target document")]
    Yaml(#[from] serde_yaml::Error),
}

/// A meta-target or sub-target constraint violation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetaTargetError {
    /// `init_as_meta_target` was invoked on a non-meta target.
    #[error("target `{name}` is not a meta-target")]
    NotMetaTarget {
        /// The target name.
        name: String,
    },

    /// Meta-targets may not carry tests of their own.
    #[error("meta-target `{name}` cannot have tests of its own")]
    HasOwnTests {
        /// The meta-target name.
        name: String,
    },

    /// Meta-targets must name at least one sub-target.
    #[error("meta-target `{name}` must contain at least one sub-target")]
    NoSubTargets {
        /// The meta-target name.
        name: String,
    },

    /// A sub-target's `meta_name` does not resolve.
    #[error("cannot find meta-target `{meta}` declared by `{sub}`")]
    UnknownMetaTarget {
        /// The sub-target that declared the link.
        sub: String,
        /// The missing meta-target name.
        meta: String,
    },

    /// A name in `sub_target_names` does not resolve.
    #[error("cannot find sub-target `{sub}` in meta-target `{meta}`")]
    UnknownSubTarget {
        /// The meta-target being linked.
        meta: String,
        /// The missing sub-target name.
        sub: String,
    },

    /// A sub-target does not appear in its declared meta-target's list.
    #[error("sub-target `{sub}` is not listed by meta-target `{meta}`")]
    SubTargetNotListed {
        /// The sub-target being linked.
        sub: String,
        /// The meta-target that omits it.
        meta: String,
    },

    /// A sub-target's userland requirement differs from the meta-target's.
    #[error("sub-target `{sub}` and meta-target `{meta}` must have the same userland requirement")]
    UserlandMismatch {
        /// The meta-target name.
        meta: String,
        /// The sub-target name.
        sub: String,
    },

    /// A sub-target's kernel configuration differs from the meta-target's.
    #[error("sub-target `{sub}` and meta-target `{meta}` must use the same kernel configuration")]
    KConfigMismatch {
        /// The meta-target name.
        meta: String,
        /// The sub-target name.
        sub: String,
    },

    /// A sub-target's type differs from the meta-target's.
    #[error("sub-target `{sub}` and meta-target `{meta}` must have the same type")]
    TypeMismatch {
        /// The meta-target name.
        meta: String,
        /// The sub-target name.
        sub: String,
    },

    /// The meta-target's points do not equal the sum of its sub-targets'.
    #[error("meta-target `{meta}` points ({expected}) do not match the sub-target total ({actual})")]
    PointsMismatch {
        /// The meta-target name.
        meta: String,
        /// The meta-target's declared points.
        expected: u32,
        /// The sum over its sub-targets.
        actual: u32,
    },
}

/// An error applying a per-command override from a target to a test.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandApplyError {
    /// The override named a command id the test does not contain.
    #[error("cannot find command instance: {id}")]
    UnknownCommand {
        /// The command id.
        id: String,
    },

    /// The 1-based instance index was out of range.
    #[error("invalid index {index} for command `{id}` ({available} instances)")]
    BadIndex {
        /// The command id.
        id: String,
        /// The requested 1-based index.
        index: u32,
        /// How many instances exist.
        available: usize,
    },

    /// The same command instance was matched by two overrides.
    #[error("command instance already applied: {id}")]
    AlreadyApplied {
        /// The command id.
        id: String,
    },

    /// Indexed overrides left an instance of the command uncovered.
    #[error("unassigned command instance: {id}")]
    UnassignedInstance {
        /// The command id.
        id: String,
    },

    /// With partial scoring, the per-command points did not sum to the
    /// test's points.
    #[error("invalid partial command point assignment: available ({available}) != assigned ({assigned})")]
    PartialPointsMismatch {
        /// The target-test's declared points.
        available: u32,
        /// The sum actually assigned to commands.
        assigned: u32,
    },
}

/// An error constructing a runnable test group.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GroupBuildError {
    /// A seed name resolved to neither a test id nor a tag.
    #[error("cannot find test or tag `{name}`")]
    UnknownTest {
        /// The unresolved name.
        name: String,
    },

    /// A dependency named by a test could not be resolved.
    #[error("cannot find dependency `{name}` required by `{wanted_by}`")]
    UnknownDependency {
        /// The unresolved dependency name.
        name: String,
        /// The test whose `depends` list named it.
        wanted_by: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle between tests: {}", .members.join(", "))]
    DependencyCycle {
        /// The tests participating in the cycle.
        members: Vec<String>,
    },

    /// The same test id appeared twice across a target and its
    /// sub-targets.
    #[error("duplicate test detected: `{id}`; duplicate tests are not allowed in targets")]
    DuplicateTargetTest {
        /// The duplicated test id.
        id: String,
    },

    /// A target named a test that is missing from the built group.
    #[error("cannot find `{id}` in the test group")]
    TargetTestNotFound {
        /// The missing test id.
        id: String,
    },

    /// A sub-target name did not resolve in the environment.
    #[error("cannot find target `{name}`")]
    UnknownTarget {
        /// The missing target name.
        name: String,
    },

    /// A per-command override failed to apply.
    #[error("command overrides for test `{test}` failed")]
    CommandApply {
        /// The test the overrides were applied to.
        test: String,
        /// The underlying error.
        #[source]
        source: CommandApplyError,
    },

    /// A target's points do not equal the sum of its test points.
    #[error("target `{target}` points ({expected}) do not match sum of test points ({actual})")]
    TargetPointsMismatch {
        /// The target name.
        target: String,
        /// The target's declared points.
        expected: u32,
        /// The sum over its target-tests.
        actual: u32,
    },
}

/// An error discovering and indexing a tree of tests and targets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvironmentError {
    /// A directory or file could not be read.
    #[error("failed to read `{path}`")]
    Io {
        /// The path that failed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The environment root is not a directory.
    #[error("test root `{path}` is not a directory")]
    NotADirectory {
        /// The offending path.
        path: Utf8PathBuf,
    },

    /// A test file failed to parse.
    #[error("failed to load test `{path}`")]
    Test {
        /// The test file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: TestParseError,
    },

    /// A target file failed to parse.
    #[error("failed to load target `{path}`")]
    Target {
        /// The target file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: TargetParseError,
    },

    /// Two target files declared the same target name.
    #[error("duplicate target `{name}` (second definition in `{path}`)")]
    DuplicateTargetName {
        /// The duplicated name.
        name: String,
        /// The file with the second definition.
        path: Utf8PathBuf,
    },

    /// Meta-target linking failed.
    #[error(transparent)]
    Meta(#[from] MetaTargetError),
}

/// An error that occurred while building a runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerBuildError {
    /// The tokio runtime could not be created.
    #[error("error creating tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),
}

/// An infrastructure failure reported by a simulator driver.
///
/// A test failing is not a driver error; this covers the cases where the
/// simulator could not be driven at all.
#[derive(Debug, Error)]
#[error("simulator driver failure: {message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    /// Creates a new driver error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error from the kernel source-build helper.
#[derive(Debug, Error)]
#[error("kernel build failure: {message}")]
pub struct BuildError {
    message: String,
}

impl BuildError {
    /// Creates a new build error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
