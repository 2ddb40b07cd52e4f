//! Real-time speech translation bridge between a traveler and a merchant.
//!
//! One live session captures the microphone, streams it to the backend over
//! a bidirectional socket, plays translated speech back gaplessly, and keeps
//! a two-sided transcript. A separate one-shot path translates typed phrases
//! over REST with quota-aware retry and model fallback.

pub mod api;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
