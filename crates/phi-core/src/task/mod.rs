//! Task - mailbox と Handler を束ねたアクター
//!
//! # 構成
//! - **Options**: mailbox の容量と consumer loop の数
//! - **Address**: mailbox の送信側（clone して配る）
//! - **Reply**: send_with_reply の応答スロット
//! - **WorkerLoop**: mailbox を読み Handler を呼ぶループ
//!
//! # ライフサイクル
//! 1. `Task::new` で mailbox を固定容量で確保
//! 2. `run` を await した時点から消費開始
//! 3. `run` に渡した Context がキャンセルされると終了（自発的な終了はない）

mod address;
mod options;
mod reply;
mod worker_loop;

pub use self::address::Address;
pub use self::options::Options;
pub use self::reply::Reply;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, info, info_span, warn};

use self::worker_loop::{Mailbox, worker_loop};
use crate::clock::SystemClock;
use crate::context::Context;
use crate::error::{Error, SendError};
use crate::handler::Handler;
use crate::ids::{IdGenerator, TaskId, UlidGenerator};
use crate::message::Message;
use crate::parallel;
use crate::sender::Sender;
use crate::stats::{Counters, TaskStats};

/// A bounded mailbox, one handler, and one or more consumer loops.
///
/// Cloning a `Task` yields another handle to the same mailbox and handler.
pub struct Task<H: Handler> {
    handler: Arc<H>,
    address: Address<H::Input, H::Output>,
    mailbox: Mailbox<H::Input, H::Output>,
    options: Options,
}

impl<H: Handler> Clone for Task<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            address: self.address.clone(),
            mailbox: Arc::clone(&self.mailbox),
            options: self.options,
        }
    }
}

impl<H: Handler> Task<H> {
    pub fn new(handler: H, options: Options) -> Self {
        Self::with_id_generator(handler, options, &UlidGenerator::new(SystemClock))
    }

    pub fn with_id_generator(handler: H, options: Options, ids: &dyn IdGenerator) -> Self {
        let id = ids.generate_task_id();
        if options.capacity == 0 {
            warn!(task_id = %id, "mailbox capacity 0 raised to 1");
        }
        let (tx, rx) = mpsc::channel(options.mailbox_capacity());
        Self {
            handler: Arc::new(handler),
            address: Address::new(id, tx, Arc::new(Counters::default())),
            mailbox: Arc::new(Mutex::new(rx)),
            options,
        }
    }

    pub fn id(&self) -> TaskId {
        self.address.id()
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn address(&self) -> Address<H::Input, H::Output> {
        self.address.clone()
    }

    pub fn stats(&self) -> TaskStats {
        self.address.counters.snapshot(self.address.queued())
    }

    /// See [`Address::send_with_reply`].
    pub fn send_with_reply(
        &self,
        message: Message<H::Input>,
    ) -> Result<Reply<H::Output>, SendError<H::Input>> {
        self.address.send_with_reply(message)
    }

    /// Consume the mailbox until `ctx` is cancelled.
    ///
    /// With `scale < 2` a single loop handles messages in arrival order.
    /// Otherwise `scale` loops are spawned through
    /// [`parallel::run_workers`] and compete for messages; the handler is
    /// shared and no ordering holds between loops. A panic in the handler
    /// (e.g. an unexpected message variant) is re-raised from here.
    pub async fn run(&self, ctx: &Context) {
        let span = info_span!("task", task_id = %self.id());
        async {
            let workers = self.options.workers();
            info!(
                workers,
                capacity = self.options.mailbox_capacity(),
                "task started"
            );
            if workers < 2 {
                worker_loop(
                    0,
                    Arc::clone(&self.handler),
                    self.address.clone(),
                    Arc::clone(&self.mailbox),
                    ctx.clone(),
                )
                .await;
            } else {
                let task = self.clone();
                let ctx = ctx.clone();
                parallel::run_workers(workers, workers, move |index| {
                    worker_loop(
                        index,
                        Arc::clone(&task.handler),
                        task.address.clone(),
                        Arc::clone(&task.mailbox),
                        ctx.clone(),
                    )
                })
                .await;
            }
            info!("task stopped");
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<H: Handler> Sender<H::Input> for Task<H> {
    fn try_send(&self, message: Message<H::Input>) -> Result<(), SendError<H::Input>> {
        self.address.try_send(message)
    }

    async fn send_until(&self, ctx: &Context, message: Message<H::Input>) -> Result<(), Error> {
        self.address.send_until(ctx, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Cancelled;
    use crate::handler::handler_fn;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records every message it sees, in order.
    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<u32>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<u32> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        type Input = u32;
        type Output = u32;

        async fn handle(&self, _: &Address<u32, u32>, message: u32) -> Message<u32> {
            self.seen.lock().unwrap().push(message);
            Message::Single(message * 10)
        }
    }

    fn spawn_run<H: Handler>(task: &Task<H>, ctx: &Context) -> tokio::task::JoinHandle<()> {
        let task = task.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { task.run(&ctx).await })
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn handles_messages_in_fifo_order_at_unity_scale() {
        let ctx = Context::background();
        let task = Task::new(Recorder::default(), Options::new(64));
        let run = spawn_run(&task, &ctx);

        for n in 0..50 {
            assert!(task.send(Message::Single(n)));
        }
        eventually(|| task.stats().handled == 50).await;
        assert_eq!(task.handler().seen(), (0..50).collect::<Vec<_>>());

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn batches_are_flattened_before_dispatch() {
        let ctx = Context::background();
        let task = Task::new(Recorder::default(), Options::new(4));
        let run = spawn_run(&task, &ctx);

        let batch = Message::batch([
            Message::Single(1),
            Message::batch([Message::Single(2), Message::batch([Message::Single(3)])]),
            Message::Single(4),
        ]);
        assert!(task.send(batch));
        eventually(|| task.stats().handled == 4).await;
        assert_eq!(task.handler().seen(), vec![1, 2, 3, 4]);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn full_mailbox_rejects_without_blocking() {
        let ctx = Context::background();
        let task = Task::new(Recorder::default(), Options::new(2));

        assert!(task.send(Message::Single(1)));
        assert!(task.send(Message::Single(2)));

        let started = Instant::now();
        let rejected = task.try_send(Message::Single(3));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(matches!(&rejected, Err(err) if err.is_full()));
        assert_eq!(rejected.unwrap_err().into_inner(), Message::Single(3));

        let stats = task.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.queued, 2);

        // 元の 2 件だけが処理される
        let run = spawn_run(&task, &ctx);
        eventually(|| task.stats().handled == 2).await;
        assert_eq!(task.handler().seen(), vec![1, 2]);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn zero_capacity_still_accepts_one_message() {
        let task = Task::new(Recorder::default(), Options::new(0));
        assert!(task.send(Message::Single(1)));
        assert!(!task.send(Message::Single(2)));
    }

    #[tokio::test]
    async fn send_with_reply_writes_flattened_batch_once() {
        let ctx = Context::background();
        let task = Task::new(
            handler_fn(|_: Address<u32, u32>, n: u32| async move {
                Message::batch([Message::Single(n), Message::batch([Message::Single(n + 1)])])
            }),
            Options::new(4),
        );
        let run = spawn_run(&task, &ctx);

        let reply = task
            .send_with_reply(Message::batch([Message::Single(1), Message::Single(5)]))
            .unwrap();
        let response = reply.wait(&ctx).await.unwrap();
        assert_eq!(response.into_leaves(), vec![1, 2, 5, 6]);
        assert_eq!(task.stats().replies, 1);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn reply_recv_waits_without_a_context() {
        let ctx = Context::background();
        let task = Task::new(Recorder::default(), Options::new(2));
        let run = spawn_run(&task, &ctx);

        let reply = task.send_with_reply(Message::Single(4)).unwrap();
        assert_eq!(reply.recv().await.unwrap().into_leaves(), vec![40]);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn reply_recv_reports_a_stopped_task() {
        let task = Task::new(Recorder::default(), Options::new(1));
        let reply = task.send_with_reply(Message::Single(1)).unwrap();
        // mailbox ごと捨てると Envelope も drop される
        drop(task);
        assert!(matches!(reply.recv().await, Err(Error::NoResponse)));
    }

    #[test]
    fn options_are_kept_as_given() {
        let options = Options::new(0).with_scale(3);
        let task = Task::new(Recorder::default(), options);
        assert_eq!(task.options(), options);
        assert!(task.options().is_scaled());
    }

    #[tokio::test]
    async fn dropped_reply_does_not_stall_the_task() {
        let ctx = Context::background();
        let task = Task::new(Recorder::default(), Options::new(4));
        let run = spawn_run(&task, &ctx);

        drop(task.send_with_reply(Message::Single(1)).unwrap());
        assert!(task.send(Message::Single(2)));
        eventually(|| task.stats().handled == 2).await;
        assert_eq!(task.stats().replies, 0);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn reply_wait_honours_cancellation() {
        let task = Task::new(Recorder::default(), Options::new(1));
        let reply = task.send_with_reply(Message::Single(1)).unwrap();

        // 誰も run していないので応答は来ない
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = reply.wait(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(Cancelled::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn handler_can_send_to_itself() {
        let ctx = Context::background();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let task = Task::new(
            handler_fn({
                let seen = Arc::clone(&seen);
                move |address: Address<u32, ()>, n: u32| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().unwrap().push(n);
                        if n > 0 {
                            assert!(address.send(Message::Single(n - 1)));
                        }
                        Message::empty()
                    }
                }
            }),
            Options::new(4),
        );
        let run = spawn_run(&task, &ctx);

        assert!(task.send(Message::Single(3)));
        eventually(|| task.stats().handled == 4).await;
        assert_eq!(*seen.lock().unwrap(), vec![3, 2, 1, 0]);

        ctx.cancel();
        run.await.unwrap();
    }

    /// Counts calls and the highest number of concurrent calls.
    #[derive(Default)]
    struct Concurrency {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Concurrency {
        type Input = ();
        type Output = ();

        async fn handle(&self, _: &Address<(), ()>, _: ()) -> Message<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Message::empty()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scaled_task_shares_one_handler_across_workers() {
        let ctx = Context::background();
        let task = Task::new(Concurrency::default(), Options::new(32).with_scale(8));
        let run = spawn_run(&task, &ctx);

        for _ in 0..32 {
            assert!(task.send(Message::Single(())));
        }
        eventually(|| task.handler().calls.load(Ordering::SeqCst) == 32).await;
        assert!(task.handler().max_in_flight.load(Ordering::SeqCst) > 1);
        assert!(task.handler().max_in_flight.load(Ordering::SeqCst) <= 8);

        ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn run_returns_once_cancelled() {
        for scale in [1, 4] {
            let ctx = Context::background();
            let task = Task::new(Recorder::default(), Options::new(1).with_scale(scale));
            let run = spawn_run(&task, &ctx);

            ctx.cancel();
            tokio::time::timeout(Duration::from_secs(1), run)
                .await
                .expect("run should stop after cancellation")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn send_until_waits_for_space_or_cancellation() {
        let task = Task::new(Recorder::default(), Options::new(1));
        assert!(task.send(Message::Single(1)));

        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = task.send_until(&ctx, Message::Single(2)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(Cancelled::DeadlineExceeded)));

        // run を始めれば空きができて送信できる
        let run_ctx = Context::background();
        let run = spawn_run(&task, &run_ctx);
        task.send_until(&Context::background(), Message::Single(3))
            .await
            .unwrap();
        eventually(|| task.stats().handled == 2).await;
        assert_eq!(task.handler().seen(), vec![1, 3]);

        run_ctx.cancel();
        run.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[should_panic(expected = "unexpected message")]
    async fn handler_panic_surfaces_from_scaled_run() {
        let ctx = Context::background();
        let task = Task::new(
            handler_fn(|_: Address<u32, ()>, n: u32| async move {
                if n == 13 {
                    panic!("unexpected message {n}");
                }
                Message::empty()
            }),
            Options::new(4).with_scale(2),
        );
        assert!(task.send(Message::Single(13)));
        task.run(&ctx).await;
    }
}
