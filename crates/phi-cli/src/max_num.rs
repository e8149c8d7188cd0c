//! Max number demo: ring 上での最大値の合意
//!
//! N 人の Player が有向リング（i → i+1 mod N）に並び、それぞれ異なる数を持つ。
//! Player は自分の数を次の Player へ送り、受け取った他人の数も、その数の
//! 持ち主の手前まで転送する。N-1 個の数を見た Player は最大値を確定して `Done` を出す。
//!
//! Player は他の Task を直接知らない。1 回の handle で `Event` を batch にまとめて
//! 返し、Coordinator がルーティング表に従って次の Player に届け、`Done` を集計する。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use phi_core::{Address, Context, Handler, Message, Options, Sender, Task};
use rand::seq::index;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::demo::{RunFuture, Session, Summary, runner};

/// Messages a player receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    Begin,
    Num { origin: usize, num: u64 },
}

/// What players report to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Num { from: usize, origin: usize, num: u64 },
    Done { player: usize, max: u64 },
}

#[derive(Debug)]
struct Knowledge {
    max: u64,
    seen: usize,
}

pub struct Player {
    index: usize,
    players: usize,
    num: u64,
    knowledge: Mutex<Knowledge>,
}

impl Player {
    fn new(index: usize, players: usize, num: u64) -> Self {
        Self {
            index,
            players,
            num,
            knowledge: Mutex::new(Knowledge { max: num, seen: 0 }),
        }
    }

    fn next(&self) -> usize {
        (self.index + 1) % self.players
    }

    fn done(&self, max: u64) -> Message<Event> {
        info!(player = self.index, max, "player done");
        Message::Single(Event::Done {
            player: self.index,
            max,
        })
    }
}

#[async_trait]
impl Handler for Player {
    type Input = Ring;
    type Output = Event;

    async fn handle(&self, _: &Address<Ring, Event>, message: Ring) -> Message<Event> {
        match message {
            Ring::Begin if self.players == 1 => self.done(self.num),
            Ring::Begin => Message::Single(Event::Num {
                from: self.index,
                origin: self.index,
                num: self.num,
            }),
            Ring::Num { origin, num } => {
                debug_assert_ne!(origin, self.index, "own number came back around the ring");
                let (max, seen) = {
                    let mut knowledge = self.knowledge.lock().unwrap_or_else(PoisonError::into_inner);
                    knowledge.max = knowledge.max.max(num);
                    knowledge.seen += 1;
                    (knowledge.max, knowledge.seen)
                };

                let mut out = Message::empty();
                // 持ち主の手前で止める
                if self.next() != origin {
                    out = out.concat(Message::Single(Event::Num {
                        from: self.index,
                        origin,
                        num,
                    }));
                }
                if seen == self.players - 1 {
                    out = out.concat(self.done(max));
                }
                out
            }
        }
    }
}

type PlayerTask = Task<Player>;

/// Delivers player output along the ring and tallies `Done` reports.
pub struct Coordinator {
    players: Vec<Address<Ring, Event>>,
    /// `route_table[i]` is the player that hears from player `i`.
    route_table: Vec<usize>,
    reports: Mutex<BTreeMap<usize, u64>>,
    ctx: Context,
    finished: Context,
}

impl Coordinator {
    // Player に送り、返ってきた batch を自分の mailbox に戻す
    fn deliver(&self, address: &Address<Event, ()>, to: usize, message: Ring) {
        let Some(player) = self.players.get(to).cloned() else {
            warn!(to, "no such player");
            return;
        };
        debug!(to, ?message, "delivering");
        let address = address.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let outcome: phi_core::Result<()> = async {
                let reply = player
                    .send_with_reply_until(&ctx, Message::Single(message))
                    .await?;
                let events = reply.wait(&ctx).await?;
                if events.leaf_count() == 0 {
                    return Ok(());
                }
                address.send_until(&ctx, events).await
            }
            .await;
            if let Err(err) = outcome
                && !err.is_cancelled()
            {
                warn!(to, error = %err, "delivery failed");
            }
        });
    }
}

#[async_trait]
impl Handler for Coordinator {
    type Input = Event;
    type Output = ();

    async fn handle(&self, address: &Address<Event, ()>, event: Event) -> Message<()> {
        match event {
            Event::Start => {
                for player in 0..self.players.len() {
                    self.deliver(address, player, Ring::Begin);
                }
            }
            Event::Num { from, origin, num } => {
                self.deliver(address, self.route_table[from], Ring::Num { origin, num });
            }
            Event::Done { player, max } => {
                let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
                reports.insert(player, max);
                if reports.len() == self.players.len() {
                    self.finished.cancel();
                }
            }
        }
        Message::empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaxNumSummary {
    pub players: usize,
    pub expected: u64,
    /// Maximum reported by each player, by index.
    pub reported: Vec<u64>,
    pub elapsed_ms: u64,
}

impl Summary for MaxNumSummary {
    fn succeeded(&self) -> bool {
        self.reported.len() == self.players && self.reported.iter().all(|&max| max == self.expected)
    }
}

impl fmt::Display for MaxNumSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let agreed = if self.succeeded() { "agreed" } else { "disagreed" };
        write!(
            f,
            "{} players {agreed} on max {} (expected {}) in {}ms",
            self.players,
            self.reported.first().copied().unwrap_or_default(),
            self.expected,
            self.elapsed_ms
        )
    }
}

/// Run the ring with `players` distinct random numbers drawn from `0..max`.
pub async fn run(players: usize, max: u64, timeout: Duration) -> Result<MaxNumSummary> {
    ensure!(players > 0, "at least one player is required");
    ensure!(
        max >= players as u64,
        "max must be at least the number of players to draw distinct numbers"
    );
    let numbers: Vec<u64> = index::sample(&mut rand::thread_rng(), max as usize, players)
        .into_vec()
        .into_iter()
        .map(|n| n as u64)
        .collect();
    run_with_numbers(numbers, timeout).await
}

/// Run the ring where player `i` starts with `numbers[i]`.
pub async fn run_with_numbers(numbers: Vec<u64>, timeout: Duration) -> Result<MaxNumSummary> {
    let players = numbers.len();
    ensure!(players > 0, "at least one player is required");
    let expected = numbers.iter().copied().max().unwrap_or_default();
    info!(players, ?numbers, "starting ring");

    let session = Session::new(timeout);
    // 各 Player に届くのは Begin と他人の数 N-1 個
    let tasks: Vec<PlayerTask> = numbers
        .iter()
        .enumerate()
        .map(|(index, &num)| Task::new(Player::new(index, players, num), Options::new(players + 1)))
        .collect();
    let coordinator = Task::new(
        Coordinator {
            players: tasks.iter().map(Task::address).collect(),
            route_table: (0..players).map(|i| (i + 1) % players).collect(),
            reports: Mutex::default(),
            ctx: session.ctx().clone(),
            finished: session.finished(),
        },
        Options::new(players.max(16)),
    );

    let mut runs: Vec<RunFuture> = tasks.iter().map(|task| runner(task, session.ctx())).collect();
    runs.push(runner(&coordinator, session.ctx()));
    let runs = session.spawn(runs);

    coordinator
        .send_until(session.ctx(), Message::Single(Event::Start))
        .await?;
    let elapsed = session.finish(runs).await?;

    let reports = coordinator
        .handler()
        .reports
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Ok(MaxNumSummary {
        players,
        expected,
        reported: reports.into_values().collect(),
        elapsed_ms: elapsed.as_millis() as u64,
    })
}
