//! Router - メッセージの内容を見て転送先を選ぶ Sender
//!
//! # 動作
//! - Batch は leaf ごとに resolve して、それぞれの転送先に送る
//! - resolve は Mutex で直列化（Resolver が可変のルーティング表を持てる）
//! - 転送そのものは直列化しない（lock は転送前に外す）
//! - 転送先が見つからない leaf は受理して捨てる（エラーにしない）
//!
//! Router 自身は mailbox を持たず、backpressure は転送先の結果をそのまま返す。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::clock::SystemClock;
use crate::context::Context;
use crate::error::{Error, SendError};
use crate::ids::{IdGenerator, RouterId, UlidGenerator};
use crate::message::Message;
use crate::sender::Sender;

/// A routing target.
pub type Target<M> = Arc<dyn Sender<M>>;

/// Picks the target for one message, or `None` to drop it.
pub trait Resolver<M>: Send + 'static {
    fn resolve(&mut self, message: &M) -> Option<Target<M>>;
}

/// [`Resolver`] backed by a closure.
pub struct ResolverFn<F>(F);

pub fn resolver_fn<M, F>(f: F) -> ResolverFn<F>
where
    F: FnMut(&M) -> Option<Target<M>> + Send + 'static,
{
    ResolverFn(f)
}

impl<M, F> Resolver<M> for ResolverFn<F>
where
    F: FnMut(&M) -> Option<Target<M>> + Send + 'static,
{
    fn resolve(&mut self, message: &M) -> Option<Target<M>> {
        (self.0)(message)
    }
}

pub struct Router<M> {
    id: RouterId,
    resolver: Mutex<Box<dyn Resolver<M>>>,
}

impl<M> fmt::Debug for Router<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<M: Send + 'static> Router<M> {
    pub fn new(resolver: impl Resolver<M>) -> Self {
        Self::with_id_generator(resolver, &UlidGenerator::new(SystemClock))
    }

    pub fn with_id_generator(resolver: impl Resolver<M>, ids: &dyn IdGenerator) -> Self {
        Self {
            id: ids.generate_router_id(),
            resolver: Mutex::new(Box::new(resolver)),
        }
    }

    pub fn id(&self) -> RouterId {
        self.id
    }

    // guard はこの関数の中で drop され、await をまたがない
    fn resolve(&self, message: &M) -> Option<Target<M>> {
        let mut resolver = self.resolver.lock().unwrap_or_else(PoisonError::into_inner);
        let target = resolver.resolve(message);
        if target.is_none() {
            debug!(router_id = %self.id, "no target resolved, message dropped");
        }
        target
    }
}

#[async_trait]
impl<M: Send + 'static> Sender<M> for Router<M> {
    /// Forward each leaf to its target. Stops at the first rejection; the
    /// error carries the rejected leaf followed by the leaves not yet
    /// forwarded. Leaves forwarded before that stay delivered.
    fn try_send(&self, message: Message<M>) -> Result<(), SendError<M>> {
        let mut leaves = message.into_leaves().into_iter();
        while let Some(leaf) = leaves.next() {
            let Some(target) = self.resolve(&leaf) else {
                continue;
            };
            if let Err(err) = target.try_send(Message::Single(leaf)) {
                let rest: Message<M> = leaves.collect();
                return Err(err.map(|rejected| rejected.concat(rest)));
            }
        }
        Ok(())
    }

    async fn send_until(&self, ctx: &Context, message: Message<M>) -> Result<(), Error> {
        for leaf in message.into_leaves() {
            if let Some(target) = self.resolve(&leaf) {
                target.send_until(ctx, Message::Single(leaf)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::task::{Address, Options, Task};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        A(u32),
        B(u32),
        C(u32),
    }

    type Inbox = Arc<StdMutex<Vec<Event>>>;

    /// Task whose handler appends every event to the returned inbox.
    fn recording_task(capacity: usize) -> (Task<impl crate::Handler<Input = Event, Output = ()>>, Inbox) {
        let inbox: Inbox = Arc::default();
        let task = Task::new(
            handler_fn({
                let inbox = Arc::clone(&inbox);
                move |_: Address<Event, ()>, event: Event| {
                    let inbox = Arc::clone(&inbox);
                    async move {
                        inbox.lock().unwrap().push(event);
                        Message::empty()
                    }
                }
            }),
            Options::new(capacity),
        );
        (task, inbox)
    }

    async fn drain<H: crate::Handler>(task: &Task<H>, expected: u64) {
        let ctx = Context::background();
        let run = {
            let task = task.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { task.run(&ctx).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.stats().handled < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not drain in time");
        ctx.cancel();
        run.await.unwrap();
    }

    fn by_variant(x: Target<Event>, y: Target<Event>) -> Router<Event> {
        Router::new(resolver_fn(move |event: &Event| match event {
            Event::A(_) => Some(Arc::clone(&x)),
            Event::B(_) => Some(Arc::clone(&y)),
            Event::C(_) => None,
        }))
    }

    #[tokio::test]
    async fn forwards_each_variant_to_its_target_unchanged() {
        let (x, x_inbox) = recording_task(8);
        let (y, y_inbox) = recording_task(8);
        let router = by_variant(Arc::new(x.address()), Arc::new(y.address()));

        assert!(router.send(Message::Single(Event::A(1))));
        assert!(router.send(Message::Single(Event::B(2))));
        assert!(router.send(Message::Single(Event::A(3))));

        drain(&x, 2).await;
        drain(&y, 1).await;
        assert_eq!(*x_inbox.lock().unwrap(), vec![Event::A(1), Event::A(3)]);
        assert_eq!(*y_inbox.lock().unwrap(), vec![Event::B(2)]);
    }

    #[tokio::test]
    async fn unresolved_message_is_dropped_without_error() {
        let (x, _) = recording_task(8);
        let (y, _) = recording_task(8);
        let router = by_variant(Arc::new(x.address()), Arc::new(y.address()));

        assert!(router.send(Message::Single(Event::C(9))));
        router
            .send_until(&Context::background(), Message::Single(Event::C(10)))
            .await
            .unwrap();
        assert_eq!(x.stats().accepted + y.stats().accepted, 0);
    }

    #[tokio::test]
    async fn full_target_is_reported_to_the_caller() {
        let (x, _) = recording_task(1);
        let (y, _) = recording_task(8);
        let router = by_variant(Arc::new(x.address()), Arc::new(y.address()));

        assert!(router.send(Message::Single(Event::A(1))));
        assert!(!router.send(Message::Single(Event::A(2))));
        assert_eq!(x.stats().rejected, 1);
    }

    #[tokio::test]
    async fn batch_is_split_per_leaf() {
        let (x, x_inbox) = recording_task(8);
        let (y, y_inbox) = recording_task(8);
        let router = by_variant(Arc::new(x.address()), Arc::new(y.address()));

        let batch = Message::batch([
            Message::Single(Event::A(1)),
            Message::batch([Message::Single(Event::B(2)), Message::Single(Event::C(3))]),
            Message::Single(Event::A(4)),
        ]);
        assert!(router.send(batch));

        drain(&x, 2).await;
        drain(&y, 1).await;
        assert_eq!(*x_inbox.lock().unwrap(), vec![Event::A(1), Event::A(4)]);
        assert_eq!(*y_inbox.lock().unwrap(), vec![Event::B(2)]);
    }

    #[tokio::test]
    async fn rejection_hands_back_the_unforwarded_rest() {
        let (x, _) = recording_task(1);
        let (y, _) = recording_task(8);
        let router = by_variant(Arc::new(x.address()), Arc::new(y.address()));

        let batch = Message::batch([
            Message::Single(Event::A(1)),
            Message::Single(Event::A(2)),
            Message::Single(Event::B(3)),
        ]);
        let err = router.try_send(batch).unwrap_err();
        assert!(err.is_full());
        assert_eq!(
            err.into_inner().into_leaves(),
            vec![Event::A(2), Event::B(3)]
        );
        assert_eq!(x.stats().accepted, 1);
        assert_eq!(y.stats().accepted, 0);
    }

    /// Round-robin over its targets; the routing state lives in the resolver.
    struct RoundRobin {
        targets: Vec<Target<Event>>,
        next: usize,
    }

    impl Resolver<Event> for RoundRobin {
        fn resolve(&mut self, _: &Event) -> Option<Target<Event>> {
            let target = self.targets.get(self.next % self.targets.len()).cloned();
            self.next += 1;
            target
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stateful_resolver_is_serialized() {
        let tasks: Vec<_> = (0..4).map(|_| recording_task(64)).collect();
        let router = Arc::new(Router::new(RoundRobin {
            targets: tasks
                .iter()
                .map(|(task, _)| Arc::new(task.address()) as Target<Event>)
                .collect(),
            next: 0,
        }));

        let senders: Vec<_> = (0..8)
            .map(|i| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    for n in 0..8 {
                        assert!(router.send(Message::Single(Event::A(i * 8 + n))));
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        for (task, _) in &tasks {
            assert_eq!(task.stats().accepted, 16);
        }
    }
}
