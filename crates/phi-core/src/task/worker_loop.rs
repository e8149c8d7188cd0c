//! WorkerLoop - mailbox を読み Handler を呼ぶ consumer loop
//!
//! # フロー
//! 1. Context のキャンセルと mailbox の受信を select で競合させる
//! 2. 受け取ったメッセージを flatten
//! 3. leaf ごとに Handler::handle を順番に呼ぶ
//! 4. send_with_reply で送られていれば、応答をまとめて 1 回だけ書き込む

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, debug, debug_span, trace};

use super::address::{Address, Envelope};
use crate::context::Context;
use crate::handler::Handler;
use crate::message::Message;

/// Receiving half of a mailbox, shared by competing consumer loops.
pub(crate) type Mailbox<I, O> = Arc<Mutex<mpsc::Receiver<Envelope<I, O>>>>;

pub(crate) async fn worker_loop<H: Handler>(
    index: usize,
    handler: Arc<H>,
    address: Address<H::Input, H::Output>,
    mailbox: Mailbox<H::Input, H::Output>,
    ctx: Context,
) {
    let span = debug_span!("worker", task_id = %address.id(), index);
    async move {
        debug!("consumer loop started");
        loop {
            let envelope = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                envelope = next_envelope(&mailbox) => envelope,
            };
            // Task 自身が Address を持っているので、通常ここで None にはならない
            let Some(envelope) = envelope else {
                break;
            };
            deliver(handler.as_ref(), &address, envelope).await;
        }
        debug!("consumer loop stopped");
    }
    .instrument(span)
    .await
}

// lock は recv の間だけ保持し、Handler 実行中は他の loop が受信できる
async fn next_envelope<I, O>(
    mailbox: &Mutex<mpsc::Receiver<Envelope<I, O>>>,
) -> Option<Envelope<I, O>> {
    mailbox.lock().await.recv().await
}

async fn deliver<H: Handler>(
    handler: &H,
    address: &Address<H::Input, H::Output>,
    envelope: Envelope<H::Input, H::Output>,
) {
    let Envelope { message, reply } = envelope;
    let mut responses = Vec::new();
    for leaf in message.into_leaves() {
        let response = handler.handle(address, leaf).await;
        address.counters.record_handled();
        trace!("message handled");
        if reply.is_some() {
            responses.push(response);
        }
    }

    if let Some(reply) = reply {
        // 送信側が Reply を捨てていたら応答は破棄される
        if reply.send(Message::Batch(responses).flatten()).is_ok() {
            address.counters.record_reply();
        }
    }
}
