//! Message - タスク間で受け渡すメッセージ
//!
//! `Message<T>` は 1 件のペイロード（`Single`）か、メッセージの並び（`Batch`）。
//! runtime が区別するのは Batch だけで、`T` の中身は一切見ない。
//!
//! # flatten
//! - Batch の中の Batch を再帰的に展開し、深さ優先・左から右の順で連結する
//! - 結果が Batch なら、その要素に Batch は含まれない
//! - 冪等: `m.flatten().flatten() == m.flatten()`

/// A single payload or an ordered batch of messages.
///
/// Handlers answer one event with zero, one or many downstream events by
/// returning `Message::empty()`, `Message::Single(..)` or a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message<T> {
    Single(T),
    Batch(Vec<Message<T>>),
}

impl<T> Message<T> {
    pub fn single(payload: T) -> Self {
        Message::Single(payload)
    }

    /// An empty batch: "nothing to deliver".
    pub fn empty() -> Self {
        Message::Batch(Vec::new())
    }

    pub fn batch(messages: impl IntoIterator<Item = Message<T>>) -> Self {
        Message::Batch(messages.into_iter().collect())
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Message::Batch(_))
    }

    /// Normalize arbitrarily nested batches into one flat batch, keeping
    /// depth-first, left-to-right order. A `Single` is returned unchanged.
    pub fn flatten(self) -> Self {
        match self {
            Message::Batch(messages) => {
                let mut leaves = Vec::with_capacity(messages.len());
                for message in messages {
                    collect_leaves(message, &mut leaves);
                }
                Message::Batch(leaves.into_iter().map(Message::Single).collect())
            }
            single => single,
        }
    }

    /// Flatten and unwrap every leaf payload.
    pub fn into_leaves(self) -> Vec<T> {
        let mut leaves = Vec::new();
        collect_leaves(self, &mut leaves);
        leaves
    }

    /// Number of payloads after flattening.
    pub fn leaf_count(&self) -> usize {
        match self {
            Message::Single(_) => 1,
            Message::Batch(messages) => messages.iter().map(Message::leaf_count).sum(),
        }
    }

    /// `self` followed by `other`, flattened.
    pub fn concat(self, other: Message<T>) -> Self {
        Message::Batch(vec![self, other]).flatten()
    }
}

fn collect_leaves<T>(message: Message<T>, out: &mut Vec<T>) {
    match message {
        Message::Single(payload) => out.push(payload),
        Message::Batch(messages) => {
            for message in messages {
                collect_leaves(message, out);
            }
        }
    }
}

impl<T> From<T> for Message<T> {
    fn from(payload: T) -> Self {
        Message::Single(payload)
    }
}

impl<T> FromIterator<T> for Message<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Message::Batch(iter.into_iter().map(Message::Single).collect())
    }
}
