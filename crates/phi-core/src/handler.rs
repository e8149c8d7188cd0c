//! Handler - メッセージを処理するビジネスロジック
//!
//! # 共有と可変状態
//! 1 つの Task には Handler インスタンスが 1 つだけ存在し、`Options::scale >= 2`
//! のときは複数の consumer loop から同時に呼ばれる。そのため:
//! - `handle` は `&self` を受け取る
//! - `Handler: Send + Sync` を要求する
//!
//! 状態を変更したい Handler は Mutex / atomic を自分で持つ。データ競合は
//! コンパイル時に排除されるが、scale >= 2 のときメッセージ間の順序は保証されない。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::message::Message;
use crate::task::Address;

/// Business logic of a task.
///
/// `handle` is called once per flattened leaf message, with the task's own
/// [`Address`] so the handler can send to itself. The returned message is
/// the response for that leaf; it is delivered to the sender only when the
/// message was sent with [`Address::send_with_reply`], and discarded
/// otherwise. Return [`Message::empty`] when there is nothing to say.
///
/// # Example
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     type Input = String;
///     type Output = String;
///
///     async fn handle(&self, _: &Address<String, String>, message: String) -> Message<String> {
///         Message::Single(message)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn handle(
        &self,
        address: &Address<Self::Input, Self::Output>,
        message: Self::Input,
    ) -> Message<Self::Output>;
}

/// Adapts an async closure into a [`Handler`]. Mostly useful in tests.
pub struct HandlerFn<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

pub fn handler_fn<F, Fut, I, O>(f: F) -> HandlerFn<F, I, O>
where
    F: Fn(Address<I, O>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Message<O>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Handler for HandlerFn<F, I, O>
where
    F: Fn(Address<I, O>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Message<O>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn handle(&self, address: &Address<I, O>, message: I) -> Message<O> {
        (self.f)(address.clone(), message).await
    }
}
