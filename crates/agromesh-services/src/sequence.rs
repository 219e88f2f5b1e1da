//! Per-node origination sequence counter.
//!
//! 8-bit, wrapping. Advanced exactly once per packet this node successfully
//! originates. Not restored across restarts.

use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct SequenceCounter {
    value: Arc<Mutex<u8>>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(value: u8) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
        }
    }

    /// The value the next originated packet will be fingerprinted with.
    pub async fn current(&self) -> u8 {
        *self.value.lock().await
    }

    /// Increment, wrapping at 255. Returns the new value.
    pub async fn advance(&self) -> u8 {
        let mut v = self.value.lock().await;
        *v = v.wrapping_add(1);
        *v
    }
}
