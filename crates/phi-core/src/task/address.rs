use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::reply::Reply;
use crate::context::Context;
use crate::error::{Error, SendError};
use crate::ids::TaskId;
use crate::message::Message;
use crate::sender::Sender;
use crate::stats::Counters;

/// One mailbox slot: the message and, for `send_with_reply`, the slot the
/// flattened response batch is written to.
pub(crate) struct Envelope<I, O> {
    pub(crate) message: Message<I>,
    pub(crate) reply: Option<oneshot::Sender<Message<O>>>,
}

/// Sending half of a task's mailbox.
///
/// Cheap to clone. Handlers receive their own task's address, and other
/// tasks hold addresses to talk to it.
pub struct Address<I, O> {
    id: TaskId,
    tx: mpsc::Sender<Envelope<I, O>>,
    pub(crate) counters: Arc<Counters>,
}

impl<I, O> Clone for Address<I, O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<I, O> fmt::Debug for Address<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address").field("id", &self.id).finish()
    }
}

impl<I, O> Address<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new(id: TaskId, tx: mpsc::Sender<Envelope<I, O>>, counters: Arc<Counters>) -> Self {
        Self { id, tx, counters }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Messages currently waiting in the mailbox.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Non-blocking send that also asks for the handler's response.
    ///
    /// Once every leaf of `message` has been handled, the responses are
    /// concatenated, flattened and written to the returned [`Reply`] exactly
    /// once. Dropping the `Reply` discards the response.
    pub fn send_with_reply(&self, message: Message<I>) -> Result<Reply<O>, SendError<I>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.try_enqueue(Envelope {
            message,
            reply: Some(reply_tx),
        })?;
        Ok(Reply::new(reply_rx))
    }

    /// Blocking variant of [`Address::send_with_reply`]: waits for mailbox
    /// space until the context is cancelled.
    pub async fn send_with_reply_until(
        &self,
        ctx: &Context,
        message: Message<I>,
    ) -> Result<Reply<O>, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue_until(
            ctx,
            Envelope {
                message,
                reply: Some(reply_tx),
            },
        )
        .await?;
        Ok(Reply::new(reply_rx))
    }

    fn try_enqueue(&self, envelope: Envelope<I, O>) -> Result<(), SendError<I>> {
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.counters.record_accepted();
                Ok(())
            }
            Err(TrySendError::Full(envelope)) => {
                self.counters.record_rejected();
                debug!(task_id = %self.id, "mailbox full, message rejected");
                Err(SendError::Full(envelope.message))
            }
            Err(TrySendError::Closed(envelope)) => Err(SendError::Closed(envelope.message)),
        }
    }

    async fn enqueue_until(&self, ctx: &Context, envelope: Envelope<I, O>) -> Result<(), Error> {
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ctx.error()),
            sent = self.tx.send(envelope) => match sent {
                Ok(()) => {
                    self.counters.record_accepted();
                    Ok(())
                }
                Err(_) => Err(Error::Closed),
            },
        }
    }
}

#[async_trait]
impl<I, O> Sender<I> for Address<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn try_send(&self, message: Message<I>) -> Result<(), SendError<I>> {
        self.try_enqueue(Envelope {
            message,
            reply: None,
        })
    }

    async fn send_until(&self, ctx: &Context, message: Message<I>) -> Result<(), Error> {
        self.enqueue_until(
            ctx,
            Envelope {
                message,
                reply: None,
            },
        )
        .await
    }
}
