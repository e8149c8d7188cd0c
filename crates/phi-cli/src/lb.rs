//! Load balancer demo
//!
//! `Balancer` は scale = workers の Task。各 worker は `work` だけ sleep して
//! `Done` を返す。`User` は `Init` を受けるたびに Balancer へ送り、応答を
//! 自分の mailbox に戻す。負荷分散が効いていれば、全体は `work` を少し超える
//! 程度で終わる（workers × work ではない）。

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use phi_core::{Address, Context, Handler, Message, Options, RetryPolicy, Sender, Task};
use serde::Serialize;
use tracing::{info, warn};

use crate::demo::{Session, Summary, runner};

#[derive(Debug, Clone, Copy)]
pub struct Init;

#[derive(Debug, Clone, Copy)]
pub struct Done;

#[derive(Debug)]
pub enum UserMsg {
    Init,
    Done,
}

/// Simulates slow work by sleeping before answering.
pub struct Balancer {
    work: Duration,
}

#[async_trait]
impl Handler for Balancer {
    type Input = Init;
    type Output = Done;

    async fn handle(&self, _: &Address<Init, Done>, _: Init) -> Message<Done> {
        tokio::time::sleep(self.work).await;
        Message::Single(Done)
    }
}

/// Sends work to the balancer and counts the answers.
pub struct User {
    balancer: Address<Init, Done>,
    results: AtomicUsize,
    needed: usize,
    ctx: Context,
    finished: Context,
}

impl User {
    fn forward(&self, address: &Address<UserMsg, ()>) {
        let balancer = self.balancer.clone();
        let address = address.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let outcome: phi_core::Result<()> = async {
                let reply = balancer
                    .send_with_reply_until(&ctx, Message::Single(Init))
                    .await?;
                let done = reply.wait(&ctx).await?;
                let answers: Message<UserMsg> =
                    done.into_leaves().into_iter().map(|Done| UserMsg::Done).collect();
                let retry = RetryPolicy::fixed(Duration::from_millis(10), 100);
                address.send_with_retry(&ctx, answers, &retry).await
            }
            .await;
            if let Err(err) = outcome
                && !err.is_cancelled()
            {
                warn!(error = %err, "request to balancer failed");
            }
        });
    }
}

#[async_trait]
impl Handler for User {
    type Input = UserMsg;
    type Output = ();

    async fn handle(&self, address: &Address<UserMsg, ()>, message: UserMsg) -> Message<()> {
        match message {
            UserMsg::Init => self.forward(address),
            UserMsg::Done => {
                let seen = self.results.fetch_add(1, Ordering::SeqCst) + 1;
                if seen >= self.needed {
                    self.finished.cancel();
                }
            }
        }
        Message::empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LbSummary {
    pub workers: usize,
    pub requests: usize,
    pub work_ms: u64,
    pub elapsed_ms: u64,
}

impl Summary for LbSummary {
    // 直列なら workers × work かかる
    fn succeeded(&self) -> bool {
        self.elapsed_ms < 2 * self.work_ms.max(1) + 1_000
    }
}

impl fmt::Display for LbSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} requests on {} workers ({}ms each) in {}ms",
            self.requests, self.workers, self.work_ms, self.elapsed_ms
        )
    }
}

pub async fn run(workers: usize, work: Duration, timeout: Duration) -> Result<LbSummary> {
    let session = Session::new(timeout);

    let balancer = Task::new(Balancer { work }, Options::new(workers).with_scale(workers));
    let user = Task::new(
        User {
            balancer: balancer.address(),
            results: AtomicUsize::new(0),
            needed: workers,
            ctx: session.ctx().clone(),
            finished: session.finished(),
        },
        Options::new(workers),
    );
    let runs = session.spawn(vec![
        runner(&balancer, session.ctx()),
        runner(&user, session.ctx()),
    ]);

    info!(workers, work_ms = work.as_millis() as u64, "sending requests");
    for _ in 0..workers {
        user.send_until(session.ctx(), Message::Single(UserMsg::Init))
            .await?;
    }

    let elapsed = session.finish(runs).await?;
    Ok(LbSummary {
        workers,
        requests: workers,
        work_ms: work.as_millis() as u64,
        elapsed_ms: elapsed.as_millis() as u64,
    })
}
