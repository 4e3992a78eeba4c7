// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test configuration records and the defaults-merge discipline.
//!
//! Every scalar field treats its zero value as "unset" so that a parsed
//! configuration can be merged over [`CONF_DEFAULTS`] without clobbering
//! explicit settings. Boolean settings use [`TriBool`] so that "unset" stays
//! distinguishable from an explicit `false`.

use crate::{
    command::{is_prefix_char, split_prefix, SHELL_PREFIX},
    errors::CommandConfError,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::LazyLock};

/// A boolean setting that can also be unset.
///
/// Deserializes from a YAML boolean or the strings `"true"` / `"false"`;
/// an empty string or a missing key is [`TriBool::Unset`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TriBool {
    /// No value was provided; merging may fill one in.
    #[default]
    Unset,
    /// Explicitly false.
    False,
    /// Explicitly true.
    True,
}

impl TriBool {
    /// Returns true if no value was provided.
    pub fn is_unset(self) -> bool {
        self == TriBool::Unset
    }

    /// Resolves to a plain boolean, falling back to `default` when unset.
    pub fn unwrap_or(self, default: bool) -> bool {
        match self {
            TriBool::Unset => default,
            TriBool::False => false,
            TriBool::True => true,
        }
    }

    fn merge(&mut self, defaults: TriBool) {
        if self.is_unset() {
            *self = defaults;
        }
    }
}

impl From<bool> for TriBool {
    fn from(value: bool) -> Self {
        if value { TriBool::True } else { TriBool::False }
    }
}

impl fmt::Display for TriBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriBool::Unset => Ok(()),
            TriBool::False => write!(f, "false"),
            TriBool::True => write!(f, "true"),
        }
    }
}

impl Serialize for TriBool {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            TriBool::Unset => serializer.serialize_str(""),
            TriBool::False => serializer.serialize_str("false"),
            TriBool::True => serializer.serialize_str("true"),
        }
    }
}

impl<'de> Deserialize<'de> for TriBool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TriBool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a boolean, \"true\", \"false\", or \"\"")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(v.into())
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    "true" => Ok(TriBool::True),
                    "false" => Ok(TriBool::False),
                    "" => Ok(TriBool::Unset),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Simulator instance parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sys161Conf {
    /// Path to the simulator binary.
    pub path: String,
    /// Number of simulated CPUs.
    pub cpus: u32,
    /// RAM size, e.g. `"1M"`.
    pub ram: String,
    /// Randomization seed; 0 leaves seeding to the driver.
    pub random: u32,
    /// First simulated disk.
    pub disk1: DiskConf,
    /// Second simulated disk.
    pub disk2: DiskConf,
}

/// A simulated disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConf {
    /// Whether the disk is attached.
    pub enabled: TriBool,
    /// Disk size, e.g. `"2M"`.
    pub bytes: String,
    /// Rotation speed.
    pub rpm: u32,
    /// Whether the doom counter is disabled.
    pub nodoom: TriBool,
}

/// Statistics collection settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatConf {
    /// Sampling resolution in seconds.
    pub resolution: f32,
    /// Number of samples in the statistics window.
    pub window: u32,
}

/// Runtime monitor thresholds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConf {
    /// Whether the monitor is active.
    pub enabled: TriBool,
    /// Number of statistics intervals the monitor averages over.
    pub window: u32,
    /// Kernel cycle-share limits.
    pub kernel: Limits,
    /// User cycle-share limits.
    pub user: Limits,
    /// Seconds without progress before the monitor kills a command.
    pub progresstimeout: f32,
    /// Overall per-command wall-clock limit in seconds.
    pub commandtimeout: f32,
}

/// Minimum/maximum share limits for one execution mode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    /// Whether the minimum bound is enforced.
    pub enablemin: TriBool,
    /// Minimum share.
    pub min: f64,
    /// Maximum share.
    pub max: f64,
}

/// Miscellaneous timeouts and knobs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MiscConf {
    /// How many times the driver may resend a command.
    pub commandretries: u32,
    /// Seconds to wait for a prompt before giving up.
    pub prompttimeout: f32,
    /// Milliseconds allowed between echoed characters.
    pub charactertimeout: u32,
    /// Scratch directory for simulator instances.
    pub tempdir: String,
    /// Whether dropped characters are resent.
    pub retrycharacters: TriBool,
    /// Whether the simulator is killed as soon as the script ends.
    pub killonexit: TriBool,
}

/// A user-defined command prefix.
///
/// A line `<prefix> <body>` runs `body` inside the region opened by `start`
/// and closed by `end`, with `prompt` marking readiness.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConf {
    /// The single prefix character.
    pub prefix: String,
    /// The prompt printed by the subprogram.
    pub prompt: String,
    /// The command line that enters the region. May itself carry a known
    /// prefix (`$ ` to go through the user shell).
    pub start: String,
    /// The command line that leaves the region, if any.
    pub end: String,
}

impl CommandConf {
    /// The prefix as a character, if it is exactly one character.
    pub fn prefix_char(&self) -> Option<char> {
        let trimmed = self.prefix.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

/// The full configuration carried by a test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConf {
    /// Simulator parameters.
    pub sys161: Sys161Conf,
    /// Statistics settings.
    pub stat: StatConf,
    /// Runtime monitor settings.
    pub monitor: MonitorConf,
    /// Miscellaneous timeouts.
    pub misc: MiscConf,
    /// Custom command prefixes.
    pub commandconf: Vec<CommandConf>,
}

/// Canonical defaults merged into every test configuration.
pub static CONF_DEFAULTS: LazyLock<TestConf> = LazyLock::new(|| TestConf {
    sys161: Sys161Conf {
        path: "sys161".to_string(),
        cpus: 8,
        ram: "1M".to_string(),
        random: 0,
        disk1: DiskConf {
            enabled: TriBool::False,
            bytes: "2M".to_string(),
            rpm: 7200,
            nodoom: TriBool::True,
        },
        disk2: DiskConf {
            enabled: TriBool::False,
            bytes: "2M".to_string(),
            rpm: 7200,
            nodoom: TriBool::False,
        },
    },
    stat: StatConf {
        resolution: 0.01,
        window: 1,
    },
    monitor: MonitorConf {
        enabled: TriBool::True,
        window: 400,
        kernel: Limits {
            enablemin: TriBool::False,
            min: 0.001,
            max: 1.0,
        },
        user: Limits {
            enablemin: TriBool::False,
            min: 0.0001,
            max: 1.0,
        },
        progresstimeout: 10.0,
        commandtimeout: 60.0,
    },
    misc: MiscConf {
        commandretries: 5,
        prompttimeout: 300.0,
        charactertimeout: 250,
        tempdir: "/tmp/simgrade".to_string(),
        retrycharacters: TriBool::True,
        killonexit: TriBool::False,
    },
    commandconf: Vec::new(),
});

fn merge_u32(value: &mut u32, defaults: u32) {
    if *value == 0 {
        *value = defaults;
    }
}

fn merge_f32(value: &mut f32, defaults: f32) {
    if *value == 0.0 {
        *value = defaults;
    }
}

fn merge_f64(value: &mut f64, defaults: f64) {
    if *value == 0.0 {
        *value = defaults;
    }
}

fn merge_string(value: &mut String, defaults: &str) {
    if value.is_empty() {
        defaults.clone_into(value);
    }
}

impl TestConf {
    /// Fills every unset field from `defaults`, leaving set fields alone.
    ///
    /// Merging is idempotent: applying the same defaults twice equals
    /// applying them once.
    pub fn merge_defaults(&mut self, defaults: &TestConf) {
        self.sys161.merge_defaults(&defaults.sys161);
        self.stat.merge_defaults(&defaults.stat);
        self.monitor.merge_defaults(&defaults.monitor);
        self.misc.merge_defaults(&defaults.misc);
        if self.commandconf.is_empty() {
            self.commandconf = defaults.commandconf.clone();
        }
    }

    /// Looks up the `commandconf` entry for a prefix character.
    pub fn command_conf(&self, prefix: char) -> Option<&CommandConf> {
        self.commandconf
            .iter()
            .find(|entry| entry.prefix_char() == Some(prefix))
    }

    /// Validates the custom prefix table.
    ///
    /// Each prefix must be a single character from the reserved alphabet,
    /// not `$`, and unique. Every entry needs a non-empty `start` that does
    /// not begin with its own prefix; `start` and `end` may only reference
    /// prefixes that are actually defined, and `end` may not begin with a
    /// prefix at all.
    pub fn check_command_conf(&self) -> Result<(), CommandConfError> {
        let mut table: BTreeMap<char, &CommandConf> = BTreeMap::new();

        for entry in &self.commandconf {
            let prefix = entry
                .prefix_char()
                .ok_or_else(|| CommandConfError::MultiCharPrefix {
                    prefix: entry.prefix.clone(),
                })?;
            if prefix == SHELL_PREFIX {
                return Err(CommandConfError::ShellPrefix);
            }
            if !is_prefix_char(prefix) {
                return Err(CommandConfError::InvalidPrefix { prefix });
            }
            if table.insert(prefix, entry).is_some() {
                return Err(CommandConfError::DuplicatePrefix { prefix });
            }
            if entry.start.trim().is_empty() {
                return Err(CommandConfError::EmptyStart { prefix });
            }
        }

        // Reference checks need the complete table.
        for (&prefix, entry) in &table {
            if let (Some(referenced), _) = split_prefix(&entry.start) {
                if referenced == prefix {
                    return Err(CommandConfError::SelfRecursiveStart { prefix });
                }
                if referenced != SHELL_PREFIX && !table.contains_key(&referenced) {
                    return Err(CommandConfError::UnknownPrefixReference { prefix, referenced });
                }
            }
            if !entry.end.trim().is_empty() {
                if let (Some(referenced), _) = split_prefix(&entry.end) {
                    if referenced == SHELL_PREFIX || table.contains_key(&referenced) {
                        return Err(CommandConfError::EndBeginsWithPrefix { prefix, referenced });
                    }
                    return Err(CommandConfError::UnknownPrefixReference { prefix, referenced });
                }
            }
        }

        Ok(())
    }
}

impl Sys161Conf {
    fn merge_defaults(&mut self, defaults: &Sys161Conf) {
        merge_string(&mut self.path, &defaults.path);
        merge_u32(&mut self.cpus, defaults.cpus);
        merge_string(&mut self.ram, &defaults.ram);
        merge_u32(&mut self.random, defaults.random);
        self.disk1.merge_defaults(&defaults.disk1);
        self.disk2.merge_defaults(&defaults.disk2);
    }
}

impl DiskConf {
    fn merge_defaults(&mut self, defaults: &DiskConf) {
        self.enabled.merge(defaults.enabled);
        merge_string(&mut self.bytes, &defaults.bytes);
        merge_u32(&mut self.rpm, defaults.rpm);
        self.nodoom.merge(defaults.nodoom);
    }
}

impl StatConf {
    fn merge_defaults(&mut self, defaults: &StatConf) {
        merge_f32(&mut self.resolution, defaults.resolution);
        merge_u32(&mut self.window, defaults.window);
    }
}

impl MonitorConf {
    fn merge_defaults(&mut self, defaults: &MonitorConf) {
        self.enabled.merge(defaults.enabled);
        merge_u32(&mut self.window, defaults.window);
        self.kernel.merge_defaults(&defaults.kernel);
        self.user.merge_defaults(&defaults.user);
        merge_f32(&mut self.progresstimeout, defaults.progresstimeout);
        merge_f32(&mut self.commandtimeout, defaults.commandtimeout);
    }
}

impl Limits {
    fn merge_defaults(&mut self, defaults: &Limits) {
        self.enablemin.merge(defaults.enablemin);
        merge_f64(&mut self.min, defaults.min);
        merge_f64(&mut self.max, defaults.max);
    }
}

impl MiscConf {
    fn merge_defaults(&mut self, defaults: &MiscConf) {
        merge_u32(&mut self.commandretries, defaults.commandretries);
        merge_f32(&mut self.prompttimeout, defaults.prompttimeout);
        merge_u32(&mut self.charactertimeout, defaults.charactertimeout);
        merge_string(&mut self.tempdir, &defaults.tempdir);
        self.retrycharacters.merge(defaults.retrycharacters);
        self.killonexit.merge(defaults.killonexit);
    }
}
