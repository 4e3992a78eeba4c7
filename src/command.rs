// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The command-line grammar.
//!
//! A body line may combine three optional modifiers, each applying to the
//! remainder of the line:
//!
//! ```text
//! [<N>x][|][<PrefixChar> ]<body>
//! ```
//!
//! `<N>x` repeats the expansion of the rest, `|` wraps it in kernel `khu`
//! sentinels, and a prefix character routes the body into the user shell
//! (`$`) or a custom region from the `commandconf` table.

use crate::{config::TestConf, errors::TestParseError};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The built-in user-shell prefix.
pub const SHELL_PREFIX: char = '$';

/// Characters reserved for `commandconf` prefixes.
pub const RESERVED_PREFIXES: &[char] = &['^', '!', '%', '@', '#', '&', '*'];

/// Returns true for characters that can ever act as a command prefix.
pub fn is_prefix_char(c: char) -> bool {
    c == SHELL_PREFIX || RESERVED_PREFIXES.contains(&c)
}

/// Splits a leading prefix character off a command line.
///
/// A prefix is recognized when and only when the first character of the
/// trimmed line is in the prefix alphabet and the next character is
/// whitespace. The returned body is trimmed either way.
pub fn split_prefix(line: &str) -> (Option<char>, &str) {
    let line = line.trim();
    let mut chars = line.chars();
    if let (Some(first), Some(second)) = (chars.next(), chars.next()) {
        if is_prefix_char(first) && second.is_whitespace() {
            return (Some(first), line[first.len_utf8()..].trim());
        }
    }
    (None, line)
}

/// Whether a command is delivered at the kernel prompt or inside the user
/// shell.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Delivered at the kernel menu prompt.
    Kernel,
    /// Delivered inside the user shell.
    User,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Kernel => write!(f, "kernel"),
            CommandType::User => write!(f, "user"),
        }
    }
}

/// The input line of a command: the raw line plus its positional arguments.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandInput {
    /// The full line as delivered to the simulator.
    pub line: String,
    /// The whitespace-delimited arguments after the command id.
    pub args: Vec<String>,
}

impl CommandInput {
    /// Builds an input from a raw line, splitting off positional arguments.
    pub fn new(line: &str) -> Self {
        let line = line.trim();
        let args = line
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect();
        Self {
            line: line.to_string(),
            args,
        }
    }

    /// The command id: the first whitespace-delimited token of the line.
    pub fn id(&self) -> &str {
        self.line.split_whitespace().next().unwrap_or("")
    }

    /// Replaces the positional arguments, rebuilding the raw line.
    pub fn replace_args(&mut self, args: Vec<String>) {
        let id = self.id().to_string();
        self.line = if args.is_empty() {
            id
        } else {
            format!("{} {}", id, args.join(" "))
        };
        self.args = args;
    }
}

/// One line of output the driver expects a command to produce.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedOutputLine {
    /// The expected text, possibly with substitution markers.
    pub text: String,
    /// Whether the line must be secured with a key.
    pub trusted: bool,
    /// The key used to verify a trusted line.
    #[serde(rename = "keyname")]
    pub key_name: String,
}

/// One command to be delivered to the simulator.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Kernel or user delivery.
    pub command_type: CommandType,
    /// The input line and arguments.
    pub input: CommandInput,
    /// Whether the command is expected to panic the kernel.
    pub panics: bool,
    /// Whether the command is expected to time out rather than finish.
    pub times_out: bool,
    /// Per-command timeout; zero defers to the configured defaults.
    pub timeout: Duration,
    /// Points this command is worth under partial scoring.
    pub points_available: u32,
    /// Output the driver should verify.
    pub expected_output: Vec<ExpectedOutputLine>,
}

impl Command {
    pub(crate) fn new(command_type: CommandType, line: &str) -> Self {
        Self {
            command_type,
            input: CommandInput::new(line),
            panics: false,
            times_out: false,
            timeout: Duration::ZERO,
            points_available: 0,
            expected_output: Vec::new(),
        }
    }

    /// The command id, derived from the input line.
    pub fn id(&self) -> &str {
        self.input.id()
    }
}

/// The region a body atom executes in, before transitions are synthesized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AtomContext {
    /// The kernel menu prompt.
    Kernel,
    /// The user shell, entered with `s` and left with `exit`.
    Shell,
    /// A custom region from the `commandconf` table.
    Custom(char),
}

/// A body line reduced to its region and bare command.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Atom {
    pub(crate) context: AtomContext,
    pub(crate) line: String,
}

impl Atom {
    fn kernel(line: &str) -> Self {
        Atom {
            context: AtomContext::Kernel,
            line: line.to_string(),
        }
    }
}

/// Splits a leading `<N>x` repetition off a line.
fn split_repeat(line: &str) -> Result<Option<(u32, &str)>, TestParseError> {
    let digits: String = line.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line[digits.len()..].strip_prefix('x') else {
        return Ok(None);
    };
    let count: u32 = digits.parse().map_err(|_| TestParseError::BadRepeat {
        text: digits.clone(),
    })?;
    if count == 0 {
        return Err(TestParseError::BadRepeat { text: digits });
    }
    Ok(Some((count, rest)))
}

/// Expands one body line into atoms, applying repetition, `khu` wrapping,
/// and prefix routing.
pub(crate) fn expand_line(line: &str, conf: &TestConf) -> Result<Vec<Atom>, TestParseError> {
    let line = line.trim();

    if let Some((count, rest)) = split_repeat(line)? {
        let inner = expand_line(rest, conf)?;
        let mut atoms = Vec::with_capacity(inner.len() * count as usize);
        for _ in 0..count {
            atoms.extend(inner.iter().cloned());
        }
        return Ok(atoms);
    }

    if let Some(rest) = line.strip_prefix('|') {
        let mut atoms = vec![Atom::kernel("khu")];
        atoms.extend(expand_line(rest, conf)?);
        atoms.push(Atom::kernel("khu"));
        return Ok(atoms);
    }

    let (prefix, body) = split_prefix(line);
    if body.is_empty() {
        return Err(TestParseError::EmptyCommand);
    }
    match prefix {
        None => Ok(vec![Atom::kernel(body)]),
        Some(SHELL_PREFIX) => Ok(vec![Atom {
            context: AtomContext::Shell,
            line: body.to_string(),
        }]),
        Some(c) => {
            if conf.command_conf(c).is_none() {
                return Err(TestParseError::UnknownPrefix { prefix: c });
            }
            Ok(vec![Atom {
                context: AtomContext::Custom(c),
                line: body.to_string(),
            }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConf;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("$ simple", Some('$'), "simple" ; "shell")]
    #[test_case("$  whitespace ", Some('$'), "whitespace" ; "extra whitespace")]
    #[test_case("^  another ", Some('^'), "another" ; "reserved char")]
    #[test_case("p not_a_prefix  ", None, "p not_a_prefix" ; "unrecognized char")]
    #[test_case("khu", None, "khu" ; "no prefix")]
    #[test_case("$", None, "$" ; "prefix char alone")]
    fn split_prefix_cases(line: &str, prefix: Option<char>, body: &str) {
        assert_eq!(split_prefix(line), (prefix, body));
    }

    #[test]
    fn command_input_args() {
        let mut input = CommandInput::new("  /testbin/forktest a b  ");
        assert_eq!(input.line, "/testbin/forktest a b");
        assert_eq!(input.id(), "/testbin/forktest");
        assert_eq!(input.args, vec!["a", "b"]);

        input.replace_args(vec!["c".to_string()]);
        assert_eq!(input.line, "/testbin/forktest c");

        input.replace_args(Vec::new());
        assert_eq!(input.line, "/testbin/forktest");
    }

    #[test]
    fn repeat_expansion() {
        let conf = TestConf::default();
        let atoms = expand_line("3x cvt1", &conf).unwrap();
        assert_eq!(atoms.len(), 3);
        assert!(atoms.iter().all(|a| a.line == "cvt1"));
    }

    #[test]
    fn repeat_zero_is_an_error() {
        let conf = TestConf::default();
        assert!(matches!(
            expand_line("0x cvt1", &conf),
            Err(TestParseError::BadRepeat { .. })
        ));
    }

    #[test]
    fn khu_wrapping_orders() {
        let conf = TestConf::default();

        // Repetition outside the marker repeats the whole wrapped block.
        let atoms = expand_line("2x| cvt1", &conf).unwrap();
        let lines: Vec<&str> = atoms.iter().map(|a| a.line.as_str()).collect();
        assert_eq!(lines, ["khu", "cvt1", "khu", "khu", "cvt1", "khu"]);

        // Repetition inside the marker shares one pair of sentinels.
        let atoms = expand_line("|2x cvt1", &conf).unwrap();
        let lines: Vec<&str> = atoms.iter().map(|a| a.line.as_str()).collect();
        assert_eq!(lines, ["khu", "cvt1", "cvt1", "khu"]);
    }

    #[test]
    fn unknown_custom_prefix() {
        let conf = TestConf::default();
        assert!(matches!(
            expand_line("^ cvt1", &conf),
            Err(TestParseError::UnknownPrefix { prefix: '^' })
        ));
    }

    #[test]
    fn custom_prefix_routes_to_table() {
        let conf = TestConf {
            commandconf: vec![CommandConf {
                prefix: "!".to_string(),
                prompt: "TEST".to_string(),
                start: "$ test".to_string(),
                end: "quit".to_string(),
            }],
            ..TestConf::default()
        };
        let atoms = expand_line("! run", &conf).unwrap();
        assert_eq!(
            atoms,
            vec![Atom {
                context: AtomContext::Custom('!'),
                line: "run".to_string(),
            }]
        );
    }
}
