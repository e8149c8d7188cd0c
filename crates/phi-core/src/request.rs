//! Request - 同期的な request/response
//!
//! `Request<Q, R>` は要求 `Q` と、応答 `R` を 1 回だけ書き込めるスロットを持つ。
//!
//! # 契約
//! - `Responder::respond(self, ..)` は self を消費するので、2 回目の respond は書けない
//! - respond はブロックしない（容量 1 のスロット）
//! - `Pending::wait` は respond か Context のキャンセルのどちらか早い方で返る
//! - 応答の型はジェネリクスで決まるので、受け取り先の型の不一致はコンパイルエラーになる

use std::fmt;

use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::Error;
use crate::message::Message;
use crate::sender::Sender;

/// A request `Q` carrying a single-use slot for its response `R`.
///
/// Embed it in a task's message enum and implement
/// `From<Request<Q, R>>` for that enum to use [`send_and_wait`].
pub struct Request<Q, R> {
    request: Q,
    responder: Responder<R>,
}

impl<Q, R> Request<Q, R> {
    /// Build a request and the handle the sender waits on.
    pub fn new(request: Q) -> (Self, Pending<R>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                responder: Responder { tx },
            },
            Pending { rx },
        )
    }

    pub fn request(&self) -> &Q {
        &self.request
    }

    pub fn into_parts(self) -> (Q, Responder<R>) {
        (self.request, self.responder)
    }

    /// Respond without looking at the request.
    pub fn respond(self, response: R) {
        self.responder.respond(response);
    }
}

impl<Q: fmt::Debug, R> fmt::Debug for Request<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Write side of the response slot. Consumed by [`Responder::respond`].
pub struct Responder<R> {
    tx: oneshot::Sender<R>,
}

impl<R> Responder<R> {
    /// Deliver the response. Never blocks; if the waiter has gone away the
    /// response is dropped.
    pub fn respond(self, response: R) {
        let _ = self.tx.send(response);
    }

    /// Whether the waiting side has given up.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

/// Read side of the response slot.
pub struct Pending<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> Pending<R> {
    /// Wait until the request is answered or `ctx` is cancelled. A response
    /// that arrives after cancellation is dropped.
    pub async fn wait(self, ctx: &Context) -> Result<R, Error> {
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ctx.error()),
            received = self.rx => received.map_err(|_| Error::NoResponse),
        }
    }
}

/// Send `request` to `sender`, waiting for mailbox space, then wait for the
/// response. Both steps give up when `ctx` is cancelled.
pub async fn send_and_wait<M, Q, R, S>(sender: &S, ctx: &Context, request: Q) -> Result<R, Error>
where
    S: Sender<M> + ?Sized,
    M: From<Request<Q, R>> + Send + 'static,
{
    let (request, pending) = Request::new(request);
    sender.send_until(ctx, Message::Single(M::from(request))).await?;
    pending.wait(ctx).await
}
