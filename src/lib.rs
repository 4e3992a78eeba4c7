// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for simgrade: scored, dependency-aware orchestration of
//! scripted tests against an instructional OS kernel simulator.
//!
//! Tests are small documents (`*.t` files) made of an optional YAML front
//! matter and a body of command lines in a prefix grammar. Targets (`*.tt`
//! files) bundle tests with points and scoring rules for grading. This crate
//! parses both, expands tests into a dependency-ordered group, and runs the
//! group with bounded concurrency.
//!
//! Driving the simulator itself is delegated to an implementation of
//! [`driver::SimulatorDriver`]; reporting hooks go through
//! [`persistence::Persistence`].

pub mod command;
pub mod config;
pub mod driver;
pub mod environment;
pub mod errors;
pub mod group;
pub mod persistence;
pub mod runner;
pub mod target;
