//! Radio driver seam and the shared half-duplex radio handle.
//!
//! There is exactly one radio per node. Every transmit and every receive
//! poll goes through `SharedRadio`, which serializes them on one mutex held
//! only for the duration of the driver call. The relay's retransmits, the
//! sensor's replies and the poller's requests therefore never interleave on
//! the air.

use std::sync::Arc;

use agromesh_core::wire::MAX_PACKET_LEN;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("radio busy")]
    Busy,
    #[error("frame of {0} bytes exceeds radio payload limit")]
    FrameTooLarge(usize),
    #[error("radio driver failure: {0}")]
    Driver(String),
}

/// A physical (or emulated) radio. Fire-and-forget, no delivery guarantee.
///
/// All methods are non-blocking. Drivers signal the notifier returned by
/// `rx_signal` whenever a frame becomes available so receivers do not poll.
pub trait Radio: Send {
    /// Is at least one received frame waiting?
    fn available(&mut self) -> bool;

    /// Put one frame on the air.
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Copy the next waiting frame into `buf`, returning its length.
    /// Frames longer than `buf` are truncated to it.
    fn recv(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Notifier signalled on frame arrival.
    fn rx_signal(&self) -> Arc<Notify>;
}

/// The node's single radio, shared by every task that transmits or receives.
#[derive(Clone)]
pub struct SharedRadio {
    driver: Arc<Mutex<Box<dyn Radio>>>,
    rx: Arc<Notify>,
}

impl SharedRadio {
    pub fn new(driver: Box<dyn Radio>) -> Self {
        let rx = driver.rx_signal();
        Self {
            driver: Arc::new(Mutex::new(driver)),
            rx,
        }
    }

    /// Transmit one frame under the radio mutex.
    pub async fn send(&self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_PACKET_LEN {
            return Err(RadioError::FrameTooLarge(frame.len()));
        }
        self.driver.lock().await.send(frame)
    }

    /// Take a waiting frame if there is one.
    pub async fn try_recv(&self, buf: &mut [u8]) -> Option<usize> {
        let mut driver = self.driver.lock().await;
        if driver.available() {
            driver.recv(buf)
        } else {
            None
        }
    }

    /// Wait for the next frame. The mutex is not held while waiting.
    pub async fn recv(&self, buf: &mut [u8]) -> usize {
        loop {
            let notified = self.rx.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(n) = self.try_recv(buf).await {
                return n;
            }
            notified.await;
        }
    }
}
