use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::Error;
use crate::message::Message;

/// Single-use slot receiving the flattened response batch of one
/// [`Address::send_with_reply`](super::Address::send_with_reply) call.
pub struct Reply<O> {
    rx: oneshot::Receiver<Message<O>>,
}

impl<O> Reply<O> {
    pub(crate) fn new(rx: oneshot::Receiver<Message<O>>) -> Self {
        Self { rx }
    }

    /// Wait for the response until the context is cancelled. A response
    /// arriving after cancellation is dropped.
    pub async fn wait(self, ctx: &Context) -> Result<Message<O>, Error> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ctx.error()),
            received = self.rx => received.map_err(|_| Error::NoResponse),
        }
    }

    /// Wait for the response with no cancellation. Resolves with
    /// [`Error::NoResponse`] if the task stops before handling the message.
    pub async fn recv(self) -> Result<Message<O>, Error> {
        self.rx.await.map_err(|_| Error::NoResponse)
    }
}
