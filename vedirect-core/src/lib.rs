//! Core library for the VE.Direct to MQTT bridge
//!
//! This crate provides the pieces behind the `vedirect-mqtt` binary: a framing
//! codec for the VE.Direct text protocol, input source selection (serial
//! device or replayed capture file), MQTT publishing, JSON file output, and
//! the relay loop tying them together.

pub mod bridge;
pub mod codec;
pub mod mqtt;
pub mod record;
pub mod sink;
pub mod source;
pub mod version;

// Re-export commonly used types
pub use anyhow::Result;
pub use bridge::{Bridge, BridgeOptions, BridgeStats};
pub use codec::{Block, CodecError, Field, Frame, VeDirectCodec};
pub use mqtt::{MqttPublisher, MqttSettings, PublishOutcome};
pub use record::Record;
pub use sink::FileSink;
pub use source::{InputSource, SourceKind, open_source};
