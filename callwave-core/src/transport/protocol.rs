//! JSON wire format of the bidirectional native-audio conversational API.
//!
//! ## Outbound
//!
//! | Message | Shape |
//! |---------|-------|
//! | setup | `{"setup": {model, generationConfig, systemInstruction, …Transcription}}` |
//! | audio frame | `{"realtimeInput": {"mediaChunks": [{mimeType, data}]}}` |
//! | text turn | `{"clientContent": {"turns": [...], "turnComplete": true}}` |
//!
//! ## Inbound
//!
//! `setupComplete` acknowledges the handshake. `serverContent` carries any
//! mix of `modelTurn.parts[].inlineData` (audio), `outputTranscription` /
//! `inputTranscription` (text), `interrupted` and `turnComplete`. A top-level
//! `error` object ends the call.

use serde::{Deserialize, Serialize};

use super::{InboundEvent, OutboundMessage, Speaker};
use crate::{buffering::frame::EncodedChunk, error::Result};

/// Handshake parameters.
#[derive(Debug, Clone)]
pub struct SetupParams<'a> {
    pub model: &'a str,
    pub voice: &'a str,
    pub system_instruction: Option<&'a str>,
}

/// Build the opening `setup` message.
pub fn setup_message(params: &SetupParams<'_>) -> String {
    let model = if params.model.starts_with("models/") {
        params.model.to_string()
    } else {
        format!("models/{}", params.model)
    };

    let mut setup = serde_json::json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": params.voice }
                    }
                }
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    });

    if let Some(instruction) = params.system_instruction.filter(|s| !s.trim().is_empty()) {
        setup["setup"]["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": instruction }]
        });
    }

    setup.to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    RealtimeInput(RealtimeInput<'a>),
    ClientContent(ClientContent<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk<'a> {
    mime_type: String,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: [Turn<'a>; 1],
    turn_complete: bool,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

/// Serialize an outbound message. Audio is labelled with the capture rate.
pub fn encode_outbound(message: &OutboundMessage, input_sample_rate: u32) -> Result<String> {
    let msg = match message {
        OutboundMessage::Audio(chunk) => ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: format!("audio/pcm;rate={input_sample_rate}"),
                data: chunk.as_str(),
            }],
        }),
        OutboundMessage::Text(text) => ClientMessage::ClientContent(ClientContent {
            turns: [Turn {
                role: "user",
                parts: [TextPart { text }],
            }],
            turn_complete: true,
        }),
    };
    Ok(serde_json::to_string(&msg)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    error: Option<ServerError>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    input_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerError {
    message: Option<String>,
    code: Option<i64>,
}

/// One decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake acknowledged.
    SetupComplete,
    /// The server will disconnect soon.
    GoAway,
    /// Zero or more call events, in the order they must be applied.
    Events(Vec<InboundEvent>),
}

/// Decode one server message.
///
/// Within a message, `interrupted` is emitted first so stale speech is
/// dropped before any new audio in the same message is scheduled.
///
/// # Errors
/// `CallError::Json` when the text is not a server message.
pub fn parse_server_message(raw: &str) -> Result<ServerFrame> {
    let msg: ServerMessage = serde_json::from_str(raw)?;

    if let Some(error) = msg.error {
        let text = match (error.message, error.code) {
            (Some(message), Some(code)) => format!("{message} (code {code})"),
            (Some(message), None) => message,
            (None, Some(code)) => format!("remote error code {code}"),
            (None, None) => "remote error".to_string(),
        };
        return Ok(ServerFrame::Events(vec![InboundEvent::Error(text)]));
    }
    if msg.setup_complete.is_some() {
        return Ok(ServerFrame::SetupComplete);
    }
    if msg.go_away.is_some() {
        return Ok(ServerFrame::GoAway);
    }

    let mut events = Vec::new();
    let Some(content) = msg.server_content else {
        return Ok(ServerFrame::Events(events));
    };

    if content.interrupted {
        events.push(InboundEvent::Interrupted);
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                if inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/") {
                    events.push(InboundEvent::Audio(EncodedChunk::new(inline.data)));
                }
            }
            if let Some(text) = part.text.filter(|t| !part.thought && !t.trim().is_empty()) {
                events.push(InboundEvent::Text {
                    speaker: Speaker::Agent,
                    text,
                });
            }
        }
    }

    // Leading spaces are word separators; only skip pure whitespace.
    for (transcription, speaker) in [
        (content.output_transcription, Speaker::Agent),
        (content.input_transcription, Speaker::User),
    ] {
        if let Some(text) = transcription.and_then(|t| t.text) {
            if !text.chars().all(char::is_whitespace) {
                events.push(InboundEvent::Text { speaker, text });
            }
        }
    }

    if content.turn_complete {
        events.push(InboundEvent::TurnComplete);
    }

    Ok(ServerFrame::Events(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_prefixes_model_and_includes_instruction() {
        let raw = setup_message(&SetupParams {
            model: "native-audio",
            voice: "Aoede",
            system_instruction: Some("Be brief."),
        });
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["setup"]["model"], "models/native-audio");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Aoede"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn blank_instruction_is_omitted() {
        let raw = setup_message(&SetupParams {
            model: "models/x",
            voice: "Puck",
            system_instruction: Some("  "),
        });
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["setup"]["model"], "models/x");
        assert!(json["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn audio_frame_serializes_as_realtime_input() {
        let raw = encode_outbound(&OutboundMessage::Audio(EncodedChunk::new("AAAA")), 16_000).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn text_serializes_as_complete_user_turn() {
        let raw = encode_outbound(&OutboundMessage::Text("hello".into()), 16_000).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(json["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["clientContent"]["turnComplete"], true);
    }

    #[test]
    fn parses_setup_complete() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            ServerFrame::SetupComplete
        );
    }

    #[test]
    fn parses_audio_and_transcription_in_order() {
        let raw = r#"{"serverContent":{
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]},
            "outputTranscription":{"text":" Hola"},
            "turnComplete":true}}"#;
        let ServerFrame::Events(events) = parse_server_message(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(
            events,
            vec![
                InboundEvent::Audio(EncodedChunk::new("AAAA")),
                InboundEvent::Text {
                    speaker: Speaker::Agent,
                    text: " Hola".into()
                },
                InboundEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn interrupted_comes_before_audio() {
        let raw = r#"{"serverContent":{"interrupted":true,
            "modelTurn":{"parts":[{"inlineData":{"data":"AAAA"}}]}}}"#;
        let ServerFrame::Events(events) = parse_server_message(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(events[0], InboundEvent::Interrupted);
        assert!(matches!(events[1], InboundEvent::Audio(_)));
    }

    #[test]
    fn input_transcription_is_attributed_to_user() {
        let raw = r#"{"serverContent":{"inputTranscription":{"text":"what time is it"}}}"#;
        let ServerFrame::Events(events) = parse_server_message(raw).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(
            events,
            vec![InboundEvent::Text {
                speaker: Speaker::User,
                text: "what time is it".into()
            }]
        );
    }

    #[test]
    fn thoughts_and_whitespace_are_skipped() {
        let raw = r#"{"serverContent":{
            "modelTurn":{"parts":[{"text":"planning","thought":true}]},
            "outputTranscription":{"text":"\n"}}}"#;
        assert_eq!(
            parse_server_message(raw).unwrap(),
            ServerFrame::Events(vec![])
        );
    }

    #[test]
    fn error_object_becomes_error_event() {
        let raw = r#"{"error":{"message":"quota exceeded","code":429}}"#;
        assert_eq!(
            parse_server_message(raw).unwrap(),
            ServerFrame::Events(vec![InboundEvent::Error("quota exceeded (code 429)".into())])
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_server_message("not json").is_err());
    }
}
