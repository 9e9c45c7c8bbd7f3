//! State-change notifications for UI consumers

use std::sync::Arc;

use tokio::sync::broadcast;

use super::VoiceConfig;

/// Capacity of the event channel; slow subscribers see `Lagged`
pub const EVENT_CAPACITY: usize = 64;

/// A change on one of the controller's state axes
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Capture session entered or left `Listening`
    Listening(bool),
    /// Synthesis left or returned to idle
    Speaking(bool),
    /// A new configuration snapshot was committed
    ConfigChanged(Arc<VoiceConfig>),
}

/// Combined status flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStatus {
    pub listening: bool,
    pub speaking: bool,
}

/// Publish an event, ignoring the no-subscriber case
pub(crate) fn emit(events: &broadcast::Sender<VoiceEvent>, event: VoiceEvent) {
    tracing::trace!(?event, "voice event");
    let _ = events.send(event);
}
