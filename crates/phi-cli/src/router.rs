//! Router demo
//!
//! User は A/B/C の 3 種類のメッセージを Router に送る。Router は種類ごとに
//! Alice/Bob/Charlie のどれかへ転送し、宛先は自分の名前で応答する。
//! 異なる 3 つの応答を受け取れば成功、同じ名前が 2 回来たら失敗。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use phi_core::{
    Address, Context, Handler, Message, Options, Request, Resolver, RetryPolicy, Router, Sender,
    Target, Task,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::demo::{Session, Summary, runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    A,
    B,
    C,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::A, Kind::B, Kind::C];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub from: String,
}

#[derive(Debug)]
pub enum Letter {
    A(Request<(), Response>),
    B(Request<(), Response>),
    C(Request<(), Response>),
}

impl Letter {
    fn new(kind: Kind, request: Request<(), Response>) -> Self {
        match kind {
            Kind::A => Letter::A(request),
            Kind::B => Letter::B(request),
            Kind::C => Letter::C(request),
        }
    }

    fn into_parts(self) -> (Kind, Request<(), Response>) {
        match self {
            Letter::A(request) => (Kind::A, request),
            Letter::B(request) => (Kind::B, request),
            Letter::C(request) => (Kind::C, request),
        }
    }
}

/// Answers with its own name. Only ever receives letters of one kind.
pub struct Destination {
    name: &'static str,
    accepts: Kind,
}

#[async_trait]
impl Handler for Destination {
    type Input = Letter;
    type Output = ();

    async fn handle(&self, _: &Address<Letter, ()>, letter: Letter) -> Message<()> {
        let (kind, request) = letter.into_parts();
        if kind != self.accepts {
            unreachable!("{} received a letter of kind {kind:?}", self.name);
        }
        request.respond(Response {
            from: self.name.to_string(),
        });
        Message::empty()
    }
}

/// Routes each letter kind to its destination.
pub struct ThreeWay {
    a: Target<Letter>,
    b: Target<Letter>,
    c: Target<Letter>,
}

impl Resolver<Letter> for ThreeWay {
    fn resolve(&mut self, letter: &Letter) -> Option<Target<Letter>> {
        let target = match letter {
            Letter::A(_) => &self.a,
            Letter::B(_) => &self.b,
            Letter::C(_) => &self.c,
        };
        Some(Arc::clone(target))
    }
}

#[derive(Debug)]
pub enum UserMsg {
    Send(Kind),
    Response(Response),
}

#[derive(Debug, Default)]
struct Outcome {
    seen: BTreeSet<String>,
    duplicate: bool,
    terminated: bool,
}

pub struct User {
    router: Arc<Router<Letter>>,
    outcome: Mutex<Outcome>,
    ctx: Context,
    finished: Context,
}

impl User {
    fn send_async(&self, address: &Address<UserMsg, ()>, kind: Kind) {
        let router = Arc::clone(&self.router);
        let address = address.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let retry = RetryPolicy::fixed(Duration::from_millis(10), 100);
            let outcome: phi_core::Result<()> = async {
                let (request, pending) = Request::new(());
                router
                    .send_with_retry(&ctx, Message::Single(Letter::new(kind, request)), &retry)
                    .await?;
                let response = pending.wait(&ctx).await?;
                address
                    .send_with_retry(&ctx, Message::Single(UserMsg::Response(response)), &retry)
                    .await
            }
            .await;
            if let Err(err) = outcome
                && !err.is_cancelled()
            {
                warn!(?kind, error = %err, "routed request failed");
            }
        });
    }

    fn record(&self, response: Response) {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if outcome.terminated {
            return;
        }
        info!(from = %response.from, "received response");
        if !outcome.seen.insert(response.from) {
            outcome.duplicate = true;
            outcome.terminated = true;
        } else if outcome.seen.len() == Kind::ALL.len() {
            outcome.terminated = true;
        }
        if outcome.terminated {
            self.finished.cancel();
        }
    }
}

#[async_trait]
impl Handler for User {
    type Input = UserMsg;
    type Output = ();

    async fn handle(&self, address: &Address<UserMsg, ()>, message: UserMsg) -> Message<()> {
        match message {
            UserMsg::Send(kind) => self.send_async(address, kind),
            UserMsg::Response(response) => self.record(response),
        }
        Message::empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterSummary {
    pub responses: Vec<String>,
    pub duplicate: bool,
    pub elapsed_ms: u64,
}

impl Summary for RouterSummary {
    fn succeeded(&self) -> bool {
        !self.duplicate && self.responses.len() == Kind::ALL.len()
    }
}

impl fmt::Display for RouterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "responses from [{}] in {}ms",
            self.responses.join(", "),
            self.elapsed_ms
        )?;
        if self.duplicate {
            write!(f, " (duplicate response)")?;
        }
        Ok(())
    }
}

pub async fn run(timeout: Duration) -> Result<RouterSummary> {
    let session = Session::new(timeout);

    let destination = |name, accepts| Task::new(Destination { name, accepts }, Options::new(1));
    let alice = destination("Alice", Kind::A);
    let bob = destination("Bob", Kind::B);
    let charlie = destination("Charlie", Kind::C);

    // Router は Sender なので run しない
    let router = Arc::new(Router::new(ThreeWay {
        a: Arc::new(alice.address()),
        b: Arc::new(bob.address()),
        c: Arc::new(charlie.address()),
    }));
    let user = Task::new(
        User {
            router,
            outcome: Mutex::default(),
            ctx: session.ctx().clone(),
            finished: session.finished(),
        },
        Options::new(3),
    );

    let runs = session.spawn(vec![
        runner(&alice, session.ctx()),
        runner(&bob, session.ctx()),
        runner(&charlie, session.ctx()),
        runner(&user, session.ctx()),
    ]);

    for kind in Kind::ALL {
        anyhow::ensure!(
            user.send(Message::Single(UserMsg::Send(kind))),
            "could not send {kind:?} to the user"
        );
    }

    let elapsed = session.finish(runs).await?;
    let outcome = user
        .handler()
        .outcome
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Ok(RouterSummary {
        responses: outcome.seen.iter().cloned().collect(),
        duplicate: outcome.duplicate,
        elapsed_ms: elapsed.as_millis() as u64,
    })
}
