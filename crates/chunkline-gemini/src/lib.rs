//! # chunkline-gemini - Gemini adapter for translation jobs
//!
//! Implements [`chunkline_protocol::TranslationProvider`] over the
//! `generateContent` REST endpoint: prompt assembly, structured-output
//! schema, error classification and tolerant response parsing.

mod client;
pub mod parse;
pub mod prompt;

pub use client::{
    DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, GeminiConfig, GeminiProvider,
    classify_http_failure,
};
pub use parse::{parse_segments, repair_truncated_json, strip_fences};
