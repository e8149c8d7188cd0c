use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, SendError};
use crate::message::Message;
use crate::retry::RetryPolicy;

/// Anything that accepts messages: a task's [`Address`](crate::Address), a
/// [`Task`](crate::Task) or a [`Router`](crate::Router).
#[async_trait]
pub trait Sender<M>: Send + Sync
where
    M: Send + 'static,
{
    /// Non-blocking enqueue. A full mailbox hands the message back in
    /// [`SendError::Full`]; this is the backpressure signal.
    fn try_send(&self, message: Message<M>) -> Result<(), SendError<M>>;

    /// Non-blocking enqueue; `false` when the message was not accepted.
    fn send(&self, message: Message<M>) -> bool {
        self.try_send(message).is_ok()
    }

    /// Wait for mailbox space until the context is cancelled.
    async fn send_until(&self, ctx: &Context, message: Message<M>) -> Result<(), Error>;

    /// Retry a rejected send according to `policy`, sleeping between
    /// attempts. Gives up early when the context is cancelled.
    async fn send_with_retry(
        &self,
        ctx: &Context,
        message: Message<M>,
        policy: &RetryPolicy,
    ) -> Result<(), Error> {
        let mut message = message;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let rejected = match self.try_send(message) {
                Ok(()) => return Ok(()),
                Err(SendError::Closed(_)) => return Err(Error::Closed),
                Err(SendError::Full(rejected)) => rejected,
            };
            if !policy.allows_retry(attempts) {
                return Err(Error::RetriesExhausted { attempts });
            }
            let delay = policy.next_delay(attempts);
            debug!(attempts, ?delay, "mailbox full, retrying");
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ctx.error()),
                _ = tokio::time::sleep(delay) => {}
            }
            message = rejected;
        }
    }
}
