// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The simple runner: every test is eligible immediately.

use super::{abort_result, run_single, RunContext, RunResult, TestRunner};
use crate::{errors::RunnerBuildError, group::TestGroup};
use future_queue::StreamExt as _;
use futures::StreamExt as _;
use std::sync::mpsc;
use tokio::runtime::Runtime;

/// Runs a group as an unordered set, bounded only by capacity.
///
/// Suitable when dependencies were not expanded or when the caller accepts
/// arbitrary ordering.
pub struct SimpleRunner {
    group: TestGroup,
    ctx: RunContext,
    runtime: Runtime,
}

impl SimpleRunner {
    /// Creates a runner for `group`.
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

impl TestRunner for SimpleRunner {
    fn run(self: Box<Self>) -> mpsc::Receiver<RunResult> {
        let (tx, rx) = mpsc::channel();
        let SimpleRunner {
            group,
            ctx,
            runtime,
        } = *self;

        std::thread::Builder::new()
            .name("simgrade-simple-runner".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let limit = ctx.capacity().permits(group.tests.len());
                    futures::stream::iter(group.tests.into_values())
                        .map(|test| {
                            let ctx = ctx.clone();
                            let fut = async move {
                                if ctx.is_shutdown() {
                                    return abort_result(&ctx, test);
                                }
                                run_single(ctx, test).await
                            };
                            (1usize, fut)
                        })
                        .future_queue(limit)
                        .for_each(|result| {
                            // A send failure means the receiver was dropped;
                            // keep draining so every test still completes.
                            let _ = tx.send(result);
                            std::future::ready(())
                        })
                        .await;
                });
            })
            .expect("runner thread should spawn");

        rx
    }
}
