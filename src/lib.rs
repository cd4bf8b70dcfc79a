//! Workout Buddi: a fitness chat relay in front of a local Ollama model.
//!
//! Each chat turn is persisted, relayed to the model (buffered or streamed)
//! and scanned for inline workout and food markers, which become structured
//! log records.

pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod llm;
pub mod logger;
pub mod store;
