//! Wire messages for the live bidirectional session.
//!
//! Outbound payloads are built with `serde_json::json!`; inbound messages
//! are probed as `Value` because the server omits absent fields rather than
//! sending nulls.

use serde_json::json;

use crate::audio::codec::EncodedFrame;
use crate::bridge::SellerLanguage;

/// One event extracted from a server message. A single message can carry
/// several (e.g. a transcription delta and an audio chunk together).
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Transcription delta of what the traveler said.
    InputDelta(String),
    /// Transcription delta of the translated speech.
    OutputDelta(String),
    /// Base64 PCM audio chunk of translated speech.
    Audio(String),
    TurnComplete,
    ServerError(String),
}

/// Session setup: native-audio model, both transcription directions, and a
/// system instruction pinning the model to pure translation.
pub fn build_setup(model: &str, language: SellerLanguage) -> String {
    let instruction = format!(
        "You are a live interpreter between a traveler speaking English and a \
         merchant speaking {lang}. When you hear English, say it in {lang}. \
         When you hear {lang}, say it in English. Translate faithfully, keep \
         numbers and prices exact, and never add commentary, answer questions \
         yourself, or start a conversation on your own.",
        lang = language.display_name()
    );

    json!({
        "setup": {
            "model": format!("models/{}", model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "thinkingConfig": {
                    "thinkingBudget": 0
                }
            },
            "systemInstruction": {
                "parts": [{ "text": instruction }]
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
    .to_string()
}

/// Wrap one encoded microphone frame as a realtime media chunk.
pub fn build_audio_chunk(frame: &EncodedFrame) -> String {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "data": frame.data,
                "mimeType": frame.mime_type
            }]
        }
    })
    .to_string()
}

/// Extract every event carried by one server message.
pub fn parse_server_message(msg: &str) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    let json: serde_json::Value = match serde_json::from_str(msg) {
        Ok(v) => v,
        Err(_) => return events,
    };

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string());
        events.push(ServerEvent::ServerError(message));
        return events;
    }

    if json.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    let server_content = match json.get("serverContent") {
        Some(c) => c,
        None => return events,
    };

    // Don't trim deltas - leading spaces are word separators. Skip only
    // purely-whitespace fragments like "\n".
    if let Some(text) = server_content
        .get("inputTranscription")
        .and_then(|t| t.get("text"))
        .and_then(|t| t.as_str())
    {
        if !text.chars().all(char::is_whitespace) {
            events.push(ServerEvent::InputDelta(text.to_string()));
        }
    }

    if let Some(text) = server_content
        .get("outputTranscription")
        .and_then(|t| t.get("text"))
        .and_then(|t| t.as_str())
    {
        if !text.chars().all(char::is_whitespace) {
            events.push(ServerEvent::OutputDelta(text.to_string()));
        }
    }

    if let Some(parts) = server_content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(data) = part
                .get("inlineData")
                .and_then(|d| d.get("data"))
                .and_then(|d| d.as_str())
            {
                events.push(ServerEvent::Audio(data.to_string()));
            }
        }
    }

    let turn_complete = server_content
        .get("turnComplete")
        .and_then(|t| t.as_bool())
        .unwrap_or(false);
    let generation_complete = server_content
        .get("generationComplete")
        .and_then(|g| g.as_bool())
        .unwrap_or(false);
    if turn_complete || generation_complete {
        events.push(ServerEvent::TurnComplete);
    }

    events
}
