//! phi-core
//!
//! Minimal actor runtime: bounded mailboxes, handlers, routing and
//! parallel fan-out on top of tokio.
//!
//! # モジュール構成
//! - **message**: `Message<T>`（Single / Batch）と flatten
//! - **task**: Task（mailbox + Handler + consumer loop）, Address, Options, Reply
//! - **handler**: Handler trait
//! - **sender**: Sender trait（Task / Address / Router 共通の送信口）
//! - **request**: 同期的な request/response（Request, Responder, send_and_wait）
//! - **router**: Router / Resolver
//! - **parallel**: run_all, run_workers, begin
//! - **context**: キャンセル（明示 / deadline / 親からの伝播）
//! - **retry**: 送信リトライのバックオフ
//! - **stats**: Task ごとのカウンタ
//! - **ids / clock**: ULID ベースの ID と時刻の抽象

pub mod clock;
pub mod context;
pub mod error;
pub mod handler;
pub mod ids;
pub mod message;
pub mod parallel;
pub mod request;
pub mod retry;
pub mod router;
pub mod sender;
pub mod stats;
pub mod task;

pub use context::Context;
pub use error::{Cancelled, Error, SendError};
pub use handler::{Handler, HandlerFn, handler_fn};
pub use ids::{RouterId, TaskId};
pub use message::Message;
pub use request::{Pending, Request, Responder, send_and_wait};
pub use retry::RetryPolicy;
pub use router::{Resolver, ResolverFn, Router, Target, resolver_fn};
pub use sender::Sender;
pub use stats::TaskStats;
pub use task::{Address, Options, Reply, Task};

/// `Result` with this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
