use serde::{Deserialize, Serialize};

/// Construction options of a [`Task`](super::Task).
///
/// - `capacity`: mailbox bound. 0 is raised to 1 (a tokio bounded channel
///   cannot be unbuffered).
/// - `scale`: number of consumer loops. Values below 2 run a single loop
///   with strict FIFO handling; `scale >= 2` runs `scale` loops competing
///   for the same mailbox and sharing the one handler, with no ordering
///   guarantee between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub capacity: usize,
    pub scale: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            capacity: 1,
            scale: 1,
        }
    }
}

impl Options {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_scale(mut self, scale: usize) -> Self {
        self.scale = scale;
        self
    }

    pub fn is_scaled(&self) -> bool {
        self.scale >= 2
    }

    pub(crate) fn mailbox_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    pub(crate) fn workers(&self) -> usize {
        self.scale.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, false, 1)]
    #[case::one(1, false, 1)]
    #[case::two(2, true, 2)]
    #[case::hundred(100, true, 100)]
    fn scale_selects_worker_count(#[case] scale: usize, #[case] scaled: bool, #[case] workers: usize) {
        let options = Options::new(4).with_scale(scale);
        assert_eq!(options.is_scaled(), scaled);
        assert_eq!(options.workers(), workers);
    }

    #[test]
    fn zero_capacity_is_raised() {
        assert_eq!(Options::new(0).mailbox_capacity(), 1);
        assert_eq!(Options::new(8).mailbox_capacity(), 8);
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: Options = serde_json::from_str(r#"{ "scale": 4 }"#).unwrap();
        assert_eq!(options, Options { capacity: 1, scale: 4 });
    }
}
