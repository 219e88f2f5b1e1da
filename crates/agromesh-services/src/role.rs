//! Role-specific handling of packets addressed to this node.
//!
//! The role is fixed at startup. A controller collects success responses
//! into the `ResponseQueue` and reports error responses; a sensor answers
//! requests with a local reading, or an `ErrorResponse` if the read fails.

use std::sync::Arc;

use agromesh_core::fingerprint;
use agromesh_core::{ErrorResponse, Fingerprint, NodeAddress, Packet, PacketKind, SuccessResponse};

use crate::notify::{Notifier, NotifyReason};
use crate::radio::{RadioError, SharedRadio};
use crate::response_queue::ResponseQueue;
use crate::sensor::SensorDriver;
use crate::sequence::SequenceCounter;

/// What the dispatcher did with a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Controller queued a success response.
    Queued { src: NodeAddress, id: u64 },
    /// Controller reported an error response.
    ErrorReported { src: NodeAddress, err_code: u8 },
    /// Sensor originated a reply of this kind.
    Replied {
        to: NodeAddress,
        kind: PacketKind,
        fingerprint: Fingerprint,
    },
    /// Packet kind has no meaning for this role.
    Ignored(PacketKind),
}

/// A sensor reply was built but could not be transmitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reply to {to} failed: {source}")]
pub struct ReplyError {
    pub to: NodeAddress,
    /// Fingerprint of the reply that did not go out.
    pub fingerprint: Fingerprint,
    #[source]
    pub source: RadioError,
}

pub enum RoleDispatcher {
    Controller {
        queue: ResponseQueue,
        notifier: Arc<dyn Notifier>,
    },
    Sensor {
        sensor: Box<dyn SensorDriver>,
        sequence: SequenceCounter,
        radio: SharedRadio,
    },
}

impl RoleDispatcher {
    pub fn controller(queue: ResponseQueue, notifier: Arc<dyn Notifier>) -> Self {
        RoleDispatcher::Controller { queue, notifier }
    }

    pub fn sensor(sensor: Box<dyn SensorDriver>, sequence: SequenceCounter, radio: SharedRadio) -> Self {
        RoleDispatcher::Sensor {
            sensor,
            sequence,
            radio,
        }
    }

    /// Handle a packet whose `dest` is `own`.
    pub async fn dispatch(&mut self, own: &NodeAddress, packet: Packet) -> Result<Dispatched, ReplyError> {
        match self {
            RoleDispatcher::Controller { queue, notifier } => match packet {
                Packet::SuccessResponse(p) => {
                    let id = queue.push(p.dest, p.src, p.data).await;
                    tracing::info!(src = %p.src, id, data = hex::encode(p.data), "response queued");
                    Ok(Dispatched::Queued { src: p.src, id })
                }
                Packet::ErrorResponse(p) => {
                    notifier.notify(&p.src, NotifyReason::ErrorResponse(p.err_code));
                    Ok(Dispatched::ErrorReported {
                        src: p.src,
                        err_code: p.err_code,
                    })
                }
                Packet::Request(p) => {
                    tracing::debug!(src = %p.src, "controller ignoring request addressed to it");
                    Ok(Dispatched::Ignored(PacketKind::Request))
                }
            },

            RoleDispatcher::Sensor {
                sensor,
                sequence,
                radio,
            } => {
                let request = match packet {
                    Packet::Request(r) => r,
                    other => {
                        tracing::debug!(src = %other.src(), kind = ?other.kind(), "sensor ignoring response");
                        return Ok(Dispatched::Ignored(other.kind()));
                    }
                };

                let seq = sequence.current().await;
                let fp = fingerprint::generate(own, seq);
                // The reply restarts its flood from the budget the request arrived with.
                let reply: Packet = match sensor.read() {
                    Ok(data) => SuccessResponse {
                        dest: request.src,
                        src: *own,
                        data,
                        ttl: request.ttl,
                        fingerprint: fp,
                    }
                    .into(),
                    Err(e) => {
                        tracing::warn!(error = %e, to = %request.src, "sensor read failed, replying with error");
                        ErrorResponse {
                            dest: request.src,
                            src: *own,
                            err_code: e.code(),
                            ttl: request.ttl,
                            fingerprint: fp,
                        }
                        .into()
                    }
                };
                let kind = reply.kind();
                radio.send(&reply.to_vec()).await.map_err(|source| ReplyError {
                    to: request.src,
                    fingerprint: fp,
                    source,
                })?;
                sequence.advance().await;
                tracing::info!(to = %request.src, ?kind, seq, fingerprint = %fp.short(), "reply sent");
                Ok(Dispatched::Replied {
                    to: request.src,
                    kind,
                    fingerprint: fp,
                })
            }
        }
    }
}
