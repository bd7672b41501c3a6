//! Delivery queue towards the consumer
//!
//! Status events are pushed in the order they happen; the consumer blocks or
//! polls on the receiving end.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use crate::protocol::Opcode;

/// Status event delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum StatusEvent {
    /// Data and control connections are up
    #[serde(rename = "conn-ok")]
    Connected,
    /// The client has been disconnected
    #[serde(rename = "disconn-ok")]
    Disconnected,
    /// The firmware acknowledged a command with a success status
    #[serde(rename = "config-ok")]
    ConfigApplied { command_id: u64, opcode: Opcode },
}

impl StatusEvent {
    /// Tag the consumer matches on
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connected => "conn-ok",
            Self::Disconnected => "disconn-ok",
            Self::ConfigApplied { .. } => "config-ok",
        }
    }
}

pub type EventSender = Sender<StatusEvent>;
pub type EventReceiver = Receiver<StatusEvent>;

/// Create an unbounded delivery queue
pub fn delivery_queue() -> (EventSender, EventReceiver) {
    unbounded()
}

/// Push an event; a consumer that went away is not an error
pub(crate) fn emit(tx: &EventSender, event: StatusEvent) {
    tracing::debug!("Status event: {}", event.tag());
    if tx.send(event).is_err() {
        tracing::trace!("Delivery queue has no consumer");
    }
}
