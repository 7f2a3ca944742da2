//! Wire types for the live protocol.
//!
//! Outbound messages are externally tagged envelopes (`{"realtimeInput": ...}`),
//! inbound frames are classified into exactly one [`InboundFrame`] variant.

use crate::error::{ClientError, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AUDIO_PCM_MIME: &str = "audio/pcm";
pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

// --- Outbound ---

/// One message written by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Value),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Base64 payload tagged with a MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: String,
    pub parts: TextPart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub response: FunctionResult,
    pub id: String,
}

/// Either the output of a tool or the error it failed with, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionResult {
    Output(Value),
    Error(String),
}

/// A caller-supplied tool result, validated by [`ClientMessage::tool_response`].
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub id: String,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn output(id: impl Into<String>, output: Value) -> Self {
        Self {
            id: id.into(),
            output: Some(output),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: None,
            error: Some(error.into()),
        }
    }
}

impl ClientMessage {
    pub fn setup(config: &Value) -> Self {
        Self::Setup(config.clone())
    }

    /// Wraps base64 PCM audio. Returns `None` for empty input.
    pub fn audio(base64_audio: &str) -> Option<Self> {
        Self::media(AUDIO_PCM_MIME, base64_audio)
    }

    /// Wraps a base64 JPEG frame. Returns `None` for empty input.
    pub fn image(base64_image: &str) -> Option<Self> {
        Self::media(IMAGE_JPEG_MIME, base64_image)
    }

    fn media(mime_type: &str, data: &str) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        Some(Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            }],
        }))
    }

    /// A user text turn; `end_of_turn = false` leaves the turn open.
    pub fn text(text: &str, end_of_turn: bool) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: TextPart {
                    text: text.to_string(),
                },
            }],
            turn_complete: end_of_turn,
        })
    }

    /// Builds a tool response, preferring `error` over `output` when both are set.
    pub fn tool_response(result: ToolResult) -> Result<Self, ClientError> {
        if result.id.is_empty() {
            return Err(ClientError::InvalidArgument("tool response requires an id"));
        }
        let response = match (result.error, result.output) {
            (Some(error), _) => FunctionResult::Error(error),
            (None, Some(output)) => FunctionResult::Output(output),
            (None, None) => {
                return Err(ClientError::InvalidArgument(
                    "tool response requires an output or an error",
                ));
            }
        };
        Ok(Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                response,
                id: result.id,
            }],
        }))
    }
}

// --- Inbound ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Part>>,
}

/// One fragment of a model turn. Fields other than `inlineData` are kept as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Part {
    pub fn text(&self) -> Option<&str> {
        self.rest.get("text").and_then(Value::as_str)
    }

    pub fn is_audio(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|blob| blob.mime_type.starts_with(AUDIO_PCM_MIME))
    }
}

/// Payload of a `content` event: the non-audio parts of a model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContent {
    pub model_turn: ModelTurn,
}

impl ModelContent {
    pub fn parts(&self) -> &[Part] {
        self.model_turn.parts.as_deref().unwrap_or_default()
    }
}

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    ServerContent(ServerContent),
}

impl InboundFrame {
    /// Parses a binary frame and classifies it.
    ///
    /// Keys are checked in precedence order `toolCall`, `toolCallCancellation`,
    /// `serverContent`. A present key whose value does not have the expected
    /// shape yields [`ProtocolError::Unmatched`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::classify(value)
    }

    fn classify(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::Unmatched);
        };
        if let Some(call) = object.remove("toolCall") {
            return serde_json::from_value(call)
                .map(Self::ToolCall)
                .map_err(|_| ProtocolError::Unmatched);
        }
        if let Some(cancellation) = object.remove("toolCallCancellation") {
            return serde_json::from_value(cancellation)
                .map(Self::ToolCallCancellation)
                .map_err(|_| ProtocolError::Unmatched);
        }
        if let Some(content) = object.remove("serverContent") {
            return serde_json::from_value(content)
                .map(Self::ServerContent)
                .map_err(|_| ProtocolError::Unmatched);
        }
        Err(ProtocolError::Unmatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audio_envelope_shape() {
        let message = ClientMessage::audio("AAAA").unwrap();
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "realtimeInput": { "mediaChunks": [{ "mimeType": "audio/pcm", "data": "AAAA" }] } })
        );
    }

    #[test]
    fn test_empty_media_is_none() {
        assert!(ClientMessage::audio("").is_none());
        assert!(ClientMessage::image("").is_none());
    }

    #[test]
    fn test_image_envelope_uses_jpeg_mime() {
        let message = ClientMessage::image("/9j/").unwrap();
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["mimeType"], "image/jpeg");
    }

    #[test]
    fn test_text_envelope_shape() {
        let message = ClientMessage::text("hello", true);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": { "text": "hello" } }],
                    "turnComplete": true
                }
            })
        );
        let open = serde_json::to_value(ClientMessage::text("hi", false)).unwrap();
        assert_eq!(open["clientContent"]["turnComplete"], false);
    }

    #[test]
    fn test_setup_envelope_wraps_config() {
        let value = serde_json::to_value(ClientMessage::setup(&json!({ "model": "m" }))).unwrap();
        assert_eq!(value, json!({ "setup": { "model": "m" } }));
    }

    #[test]
    fn test_tool_response_requires_id() {
        let err = ClientMessage::tool_response(ToolResult::output("", json!(1))).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[test]
    fn test_tool_response_requires_output_or_error() {
        let result = ToolResult {
            id: "x".to_string(),
            ..Default::default()
        };
        let err = ClientMessage::tool_response(result).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[test]
    fn test_tool_response_error_omits_output() {
        let result = ToolResult {
            id: "x".to_string(),
            output: Some(json!({ "ignored": true })),
            error: Some("e".to_string()),
        };
        let value = serde_json::to_value(ClientMessage::tool_response(result).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "toolResponse": { "functionResponses": [{ "response": { "error": "e" }, "id": "x" }] } })
        );
    }

    #[test]
    fn test_tool_response_output() {
        let message = ClientMessage::tool_response(ToolResult::output("call-1", json!({ "ok": 1 })));
        let value = serde_json::to_value(message.unwrap()).unwrap();
        assert_eq!(
            value["toolResponse"]["functionResponses"][0]["response"],
            json!({ "output": { "ok": 1 } })
        );
    }

    #[test]
    fn test_decode_tool_call() {
        let frame = br#"{"toolCall":{"functionCalls":[{"id":"1","name":"lookup","args":{"q":"x"}}]}}"#;
        let InboundFrame::ToolCall(call) = InboundFrame::decode(frame).unwrap() else {
            panic!("expected tool call");
        };
        assert_eq!(call.function_calls[0].name, "lookup");
        assert_eq!(call.function_calls[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn test_decode_prefers_tool_call_over_server_content() {
        let frame = br#"{"serverContent":{"turnComplete":true},"toolCall":{"functionCalls":[]}}"#;
        assert!(matches!(
            InboundFrame::decode(frame).unwrap(),
            InboundFrame::ToolCall(_)
        ));
    }

    #[test]
    fn test_decode_cancellation() {
        let frame = br#"{"toolCallCancellation":{"ids":["a","b"]}}"#;
        assert_eq!(
            InboundFrame::decode(frame).unwrap(),
            InboundFrame::ToolCallCancellation(ToolCallCancellation {
                ids: vec!["a".to_string(), "b".to_string()]
            })
        );
    }

    #[test]
    fn test_decode_unknown_shapes_are_unmatched() {
        assert!(matches!(
            InboundFrame::decode(br#"{"setupComplete":{}}"#),
            Err(ProtocolError::Unmatched)
        ));
        assert!(matches!(
            InboundFrame::decode(b"[1,2,3]"),
            Err(ProtocolError::Unmatched)
        ));
        assert!(matches!(
            InboundFrame::decode(br#"{"serverContent":"nonsense"}"#),
            Err(ProtocolError::Unmatched)
        ));
        assert!(matches!(
            InboundFrame::decode(b"not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_part_keeps_unknown_fields() {
        let part: Part = serde_json::from_value(json!({ "text": "hi", "thought": true })).unwrap();
        assert_eq!(part.text(), Some("hi"));
        assert!(!part.is_audio());
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({ "text": "hi", "thought": true })
        );
    }
}
