//! Ping-pong demo
//!
//! `Pinger` は `send_and_wait` で `Ponger` に Ping を送り、返ってきた Pong を
//! 自分の mailbox に戻す。Pong を受けるたびに次の Ping を送り、`rounds` 回で終わる。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use phi_core::{Address, Context, Handler, Message, Options, Request, Sender, Task, send_and_wait};
use serde::Serialize;
use tracing::{info, warn};

use crate::demo::{Session, Summary, runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub round: u32,
}

#[derive(Debug)]
pub enum PongerMsg {
    Ping(Request<Ping, Pong>),
}

impl From<Request<Ping, Pong>> for PongerMsg {
    fn from(request: Request<Ping, Pong>) -> Self {
        PongerMsg::Ping(request)
    }
}

#[derive(Debug)]
pub enum PingerMsg {
    Begin,
    Pong(Pong),
}

pub struct Ponger {
    delay: Duration,
    pings: AtomicU32,
}

#[async_trait]
impl Handler for Ponger {
    type Input = PongerMsg;
    type Output = ();

    async fn handle(&self, _: &Address<PongerMsg, ()>, message: PongerMsg) -> Message<()> {
        match message {
            PongerMsg::Ping(request) => {
                let round = request.request().round;
                info!(round, "received ping");
                self.pings.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                request.respond(Pong { round });
            }
        }
        Message::empty()
    }
}

/// Sends a ping after each pong until `rounds` pongs have arrived.
pub struct Pinger {
    ponger: Address<PongerMsg, ()>,
    rounds: u32,
    delay: Duration,
    pongs: AtomicU32,
    ctx: Context,
    finished: Context,
}

impl Pinger {
    fn ping(&self, address: &Address<PingerMsg, ()>, round: u32) {
        let ponger = self.ponger.clone();
        let address = address.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let outcome: phi_core::Result<()> = async {
                let pong: Pong = send_and_wait(&ponger, &ctx, Ping { round }).await?;
                address
                    .send_until(&ctx, Message::Single(PingerMsg::Pong(pong)))
                    .await
            }
            .await;
            if let Err(err) = outcome
                && !err.is_cancelled()
            {
                warn!(round, error = %err, "ping failed");
            }
        });
    }
}

#[async_trait]
impl Handler for Pinger {
    type Input = PingerMsg;
    type Output = ();

    async fn handle(&self, address: &Address<PingerMsg, ()>, message: PingerMsg) -> Message<()> {
        match message {
            PingerMsg::Begin => {
                info!("pinger beginning");
                self.ping(address, 1);
            }
            PingerMsg::Pong(pong) => {
                info!(round = pong.round, "received pong");
                let pongs = self.pongs.fetch_add(1, Ordering::SeqCst) + 1;
                if pongs >= self.rounds {
                    self.finished.cancel();
                } else {
                    tokio::time::sleep(self.delay).await;
                    self.ping(address, pong.round + 1);
                }
            }
        }
        Message::empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingPongSummary {
    pub rounds: u32,
    pub pings: u32,
    pub pongs: u32,
    pub elapsed_ms: u64,
}

impl Summary for PingPongSummary {
    fn succeeded(&self) -> bool {
        self.pings == self.rounds && self.pongs == self.rounds
    }
}

impl fmt::Display for PingPongSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pings / {} pongs over {} rounds in {}ms",
            self.pings, self.pongs, self.rounds, self.elapsed_ms
        )
    }
}

pub async fn run(rounds: u32, delay: Duration, timeout: Duration) -> Result<PingPongSummary> {
    anyhow::ensure!(rounds > 0, "rounds must be at least 1");
    let session = Session::new(timeout);

    let ponger = Task::new(
        Ponger {
            delay,
            pings: AtomicU32::new(0),
        },
        Options::new(1),
    );
    let pinger = Task::new(
        Pinger {
            ponger: ponger.address(),
            rounds,
            delay,
            pongs: AtomicU32::new(0),
            ctx: session.ctx().clone(),
            finished: session.finished(),
        },
        Options::new(1),
    );
    let runs = session.spawn(vec![
        runner(&ponger, session.ctx()),
        runner(&pinger, session.ctx()),
    ]);

    pinger
        .send_until(session.ctx(), Message::Single(PingerMsg::Begin))
        .await?;

    let elapsed = session.finish(runs).await?;
    Ok(PingPongSummary {
        rounds,
        pings: ponger.handler().pings.load(Ordering::SeqCst),
        pongs: pinger.handler().pongs.load(Ordering::SeqCst),
        elapsed_ms: elapsed.as_millis() as u64,
    })
}
