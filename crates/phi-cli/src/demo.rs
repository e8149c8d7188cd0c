//! 各デモ共通の配線: Context の寿命、Task の起動、結果の出力

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, bail, ensure};
use phi_core::{Context, Handler, Task, parallel};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

pub type RunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Boxed `task.run(ctx)` so tasks with different handlers can share one
/// [`parallel::run_all`] call.
pub fn runner<H: Handler>(task: &Task<H>, ctx: &Context) -> RunFuture {
    let task = task.clone();
    let ctx = ctx.clone();
    Box::pin(async move { task.run(&ctx).await })
}

/// Lifetime of one demo run.
///
/// `ctx` bounds everything (tasks, sends, waits) by the timeout. `finished`
/// is a child the demo's handlers cancel once the topology has reached its
/// goal.
pub struct Session {
    ctx: Context,
    finished: Context,
    started: Instant,
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        let ctx = Context::background().with_timeout(timeout);
        let finished = ctx.with_cancel();
        Self {
            ctx,
            finished,
            started: Instant::now(),
        }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn finished(&self) -> Context {
        self.finished.clone()
    }

    /// Start every run future in the background.
    pub fn spawn(&self, runs: Vec<RunFuture>) -> JoinHandle<()> {
        tokio::spawn(parallel::run_all(runs))
    }

    /// Wait for the goal (or the timeout), stop the tasks and return the
    /// elapsed time. A task whose run ends early (a handler panic) fails the
    /// demo right away.
    pub async fn finish(self, mut runs: JoinHandle<()>) -> Result<Duration> {
        tokio::select! {
            biased;
            _ = self.finished.cancelled() => {}
            joined = &mut runs => {
                self.ctx.cancel();
                joined.context("task run failed")?;
                bail!("tasks stopped before the demo finished");
            }
        }
        let elapsed = self.started.elapsed();
        let timed_out = self.ctx.is_cancelled();

        self.ctx.cancel();
        runs.await.context("task run failed")?;
        ensure!(!timed_out, "demo did not finish before the timeout");
        info!(elapsed_ms = elapsed.as_millis() as u64, "demo finished");
        Ok(elapsed)
    }
}

/// Outcome of a demo, printed as text or JSON.
pub trait Summary: Serialize + fmt::Display {
    fn succeeded(&self) -> bool;
}

pub fn report(summary: &impl Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    ensure!(summary.succeeded(), "demo check failed: {summary}");
    Ok(())
}
