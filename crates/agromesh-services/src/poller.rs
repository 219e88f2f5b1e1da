//! Controller polling cycle.
//!
//! Nodes are polled one at a time. A node that never answers holds the cycle
//! for the full response timeout before the next node is contacted.

use std::sync::Arc;
use std::time::Duration;

use agromesh_core::fingerprint;
use agromesh_core::{Fingerprint, NodeAddress, Packet, Request};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::node_status::NodeStatusTable;
use crate::notify::{Notifier, NotifyReason};
use crate::radio::{RadioError, SharedRadio};
use crate::relay::OriginHandle;
use crate::response_queue::{ResponseEntry, ResponseQueue};
use crate::sequence::SequenceCounter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("request to {node} not sent: {source}")]
    Send {
        node: NodeAddress,
        #[source]
        source: RadioError,
    },
}

/// Result of polling one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Answered(ResponseEntry),
    TimedOut,
    SendFailed(RadioError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub answered: Vec<NodeAddress>,
    pub timed_out: Vec<NodeAddress>,
    pub send_failed: Vec<NodeAddress>,
}

impl PollReport {
    pub fn polled(&self) -> usize {
        self.answered.len() + self.timed_out.len() + self.send_failed.len()
    }
}

pub struct ControllerPoller {
    address: NodeAddress,
    radio: SharedRadio,
    sequence: SequenceCounter,
    queue: ResponseQueue,
    notifier: Arc<dyn Notifier>,
    known: watch::Receiver<Vec<NodeAddress>>,
    ttl: u8,
    timeout: Duration,
    origin: Option<OriginHandle>,
    status: Option<NodeStatusTable>,
}

impl ControllerPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: NodeAddress,
        radio: SharedRadio,
        sequence: SequenceCounter,
        queue: ResponseQueue,
        notifier: Arc<dyn Notifier>,
        known: watch::Receiver<Vec<NodeAddress>>,
        ttl: u8,
        timeout: Duration,
    ) -> Self {
        Self {
            address,
            radio,
            sequence,
            queue,
            notifier,
            known,
            ttl,
            timeout,
            origin: None,
            status: None,
        }
    }

    /// Register every sent request with the relay's duplicate filter.
    pub fn with_origin(mut self, origin: OriginHandle) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Record poll and reply counts in a status table.
    pub fn with_status(mut self, status: NodeStatusTable) -> Self {
        self.status = Some(status);
        self
    }

    /// Build, fingerprint and transmit one request. The sequence only
    /// advances when the radio accepted the frame.
    pub async fn send_request(&self, node: &NodeAddress, num_nodes: u8) -> Result<Fingerprint, PollError> {
        let seq = self.sequence.current().await;
        let fp = fingerprint::generate(&self.address, seq);
        let request = Packet::from(Request {
            dest: *node,
            src: self.address,
            num_nodes,
            ttl: self.ttl,
            fingerprint: fp,
        });

        self.radio
            .send(&request.to_vec())
            .await
            .map_err(|source| PollError::Send { node: *node, source })?;
        self.sequence.advance().await;

        if let Some(origin) = &self.origin {
            origin.originated(fp);
        }
        tracing::debug!(node = %node, seq, ttl = self.ttl, fingerprint = %fp.short(), "request sent");
        Ok(fp)
    }

    /// Poll one node and wait up to the response timeout for its answer.
    pub async fn poll_node(&self, node: &NodeAddress, num_nodes: u8) -> PollOutcome {
        if let Err(PollError::Send { source, .. }) = self.send_request(node, num_nodes).await {
            tracing::warn!(node = %node, error = %source, "poll request not sent");
            self.notifier.notify(node, NotifyReason::SendFailed);
            return PollOutcome::SendFailed(source);
        }
        if let Some(status) = &self.status {
            status.record_poll(node);
        }

        let deadline = Instant::now() + self.timeout;
        match self.queue.wait_for(&self.address, node, deadline).await {
            Some(entry) => {
                tracing::info!(node = %node, data = hex::encode(entry.data), "poll answered");
                if let Some(status) = &self.status {
                    status.record_reply(&entry);
                }
                PollOutcome::Answered(entry)
            }
            None => {
                tracing::warn!(node = %node, timeout_secs = self.timeout.as_secs(), "poll timed out");
                self.notifier.notify(node, NotifyReason::NoResponse);
                PollOutcome::TimedOut
            }
        }
    }

    /// Poll every known node once, in list order.
    pub async fn poll_cycle(&self) -> PollReport {
        let nodes = self.known.borrow().clone();
        let num_nodes = u8::try_from(nodes.len()).unwrap_or(u8::MAX);
        let mut report = PollReport::default();

        for node in nodes.iter().filter(|n| **n != self.address) {
            match self.poll_node(node, num_nodes).await {
                PollOutcome::Answered(_) => report.answered.push(*node),
                PollOutcome::TimedOut => report.timed_out.push(*node),
                PollOutcome::SendFailed(_) => report.send_failed.push(*node),
            }
        }

        tracing::info!(
            polled = report.polled(),
            answered = report.answered.len(),
            timed_out = report.timed_out.len(),
            send_failed = report.send_failed.len(),
            "poll cycle complete"
        );
        report
    }

    /// Run a poll cycle every `interval` until shutdown. A cycle in progress
    /// finishes its current wait before shutdown is observed.
    pub async fn run(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(address = %self.address, interval_secs = interval.as_secs(), "poller starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("poller shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll_cycle().await;
                }
            }
        }
    }
}
