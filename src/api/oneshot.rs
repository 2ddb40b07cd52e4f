//! One-shot phrase translation over the REST endpoint.
//!
//! Used for quick text lookups outside the live bridge (e.g. translating a
//! price the traveler typed). Goes through the retry executor so quota and
//! backend faults are handled the same way everywhere.

use serde_json::json;

use super::client::UREQ_AGENT;
use super::retry::{execute_with_retry, RetryPolicy};
use crate::bridge::SellerLanguage;
use crate::config::Config;
use crate::error::{classify_backend_message, BridgeError, Result};

/// Translate a short phrase into the seller's language.
pub fn translate_phrase(config: &Config, text: &str, language: SellerLanguage) -> Result<String> {
    execute_with_retry(
        &config.gemini_api_key,
        &config.oneshot_model,
        Some(&config.oneshot_fallback),
        RetryPolicy::default(),
        |model| request_translation(&config.gemini_api_key, model, text, language),
    )
}

fn request_translation(
    api_key: &str,
    model: &str,
    text: &str,
    language: SellerLanguage,
) -> Result<String> {
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
        model, api_key
    );

    let payload = json!({
        "contents": [{
            "role": "user",
            "parts": [{
                "text": format!(
                    "Translate to {}. Reply with the translation only, no commentary.\n{}",
                    language.display_name(),
                    text
                )
            }]
        }]
    });

    let resp = UREQ_AGENT
        .post(&url)
        .send_json(payload)
        .map_err(|e| classify_backend_message(model, &e.to_string()))?;

    let body: serde_json::Value = resp.into_body().read_json().map_err(|e| {
        BridgeError::Protocol {
            message: e.to_string(),
        }
    })?;

    extract_text(&body).ok_or_else(|| BridgeError::Protocol {
        message: "no candidates in response".to_string(),
    })
}

/// Pull the concatenated text parts out of the first candidate.
fn extract_text(body: &serde_json::Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text.trim().to_string())
    }
}
