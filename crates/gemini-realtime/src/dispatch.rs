//! Routes classified inbound frames onto the event bus.

use crate::{
    error::ProtocolError,
    events::{Event, EventBus},
    protocol::{InboundFrame, ModelContent, ModelTurn, Part, ServerContent},
};
use base64::Engine;
use tracing::{debug, warn};

/// Decodes one binary frame and publishes the events it carries.
///
/// Frames that do not parse or do not match a known shape are logged and dropped.
pub(crate) fn dispatch_frame(bytes: &[u8], bus: &EventBus) {
    match InboundFrame::decode(bytes) {
        Ok(frame) => dispatch(frame, bus),
        Err(ProtocolError::Unmatched) => {
            debug!(frame = %String::from_utf8_lossy(bytes), "Unmatched inbound frame");
        }
        Err(e) => {
            warn!(error = %e, frame = %String::from_utf8_lossy(bytes), "Dropping inbound frame");
        }
    }
}

pub(crate) fn dispatch(frame: InboundFrame, bus: &EventBus) {
    match frame {
        InboundFrame::ToolCall(call) => bus.emit(Event::ToolCall(call)),
        InboundFrame::ToolCallCancellation(cancellation) => {
            bus.emit(Event::ToolCallCancellation(cancellation))
        }
        InboundFrame::ServerContent(content) => dispatch_server_content(content, bus),
    }
}

fn dispatch_server_content(content: ServerContent, bus: &EventBus) {
    // Interruption discards the rest of the frame.
    if content.interrupted {
        bus.emit(Event::Interrupted);
        return;
    }
    if content.turn_complete {
        bus.emit(Event::TurnComplete);
    }
    let Some(parts) = content.model_turn.and_then(|turn| turn.parts) else {
        return;
    };

    let (audio, other): (Vec<Part>, Vec<Part>) = parts.into_iter().partition(Part::is_audio);
    for blob in audio.into_iter().filter_map(|part| part.inline_data) {
        match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
            Ok(pcm) => bus.emit(Event::Audio(pcm)),
            Err(e) => warn!(error = %e, mime_type = %blob.mime_type, "Skipping undecodable audio part"),
        }
    }
    if !other.is_empty() {
        bus.emit(Event::Content(ModelContent {
            model_turn: ModelTurn { parts: Some(other) },
        }));
    }
}
