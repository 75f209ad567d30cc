//! VE.Direct text protocol framing
//!
//! A VE.Direct device repeatedly sends blocks of `\r\n<label>\t<value>`
//! records, terminated by a `Checksum` record whose single value byte makes
//! the byte sum of the whole block zero modulo 256. HEX protocol messages
//! (`:` up to `\n`) may be interleaved anywhere outside the checksum byte and
//! are not part of the sum.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio_util::codec::Decoder;
use tracing::debug;

/// Longest label or value accepted before a block is treated as garbage.
pub const MAX_RECORD_LEN: usize = 64;

/// Most records accepted in a single block.
pub const MAX_FIELDS: usize = 64;

const CHECKSUM_LABEL: &[u8] = b"Checksum";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read VE.Direct stream: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

/// The records of one frame, in the order the device sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Block {
    fields: Vec<Field>,
}

impl Block {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Value of the last record with the given label.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|field| field.label == label)
            .map(|field| field.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Label to value map. Repeated labels keep the last value.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|field| (field.label.clone(), field.value.clone()))
            .collect()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for field in &self.fields {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{label}={value}", label = field.label, value = field.value)?;
            first = false;
        }
        Ok(())
    }
}

/// A complete block together with its residual checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub block: Block,
    /// Byte sum of the frame modulo 256; zero when the frame is intact.
    pub checksum: u8,
}

impl Frame {
    pub fn is_valid(&self) -> bool {
        self.checksum == 0
    }
}

/// Checksum byte a sender appends so that `payload` plus that byte sums to
/// zero. `payload` must include everything up to and including
/// `Checksum\t`.
pub fn checksum_for(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    0u8.wrapping_sub(sum)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    RecordBegin,
    RecordName,
    RecordValue,
    Checksum,
    Hex,
}

/// Incremental decoder turning a VE.Direct byte stream into [`Frame`]s.
#[derive(Debug)]
pub struct VeDirectCodec {
    state: State,
    resume: State,
    sum: u8,
    label: Vec<u8>,
    value: Vec<u8>,
    fields: Vec<Field>,
}

impl Default for VeDirectCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VeDirectCodec {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            resume: State::Idle,
            sum: 0,
            label: Vec::with_capacity(MAX_RECORD_LEN),
            value: Vec::with_capacity(MAX_RECORD_LEN),
            fields: Vec::new(),
        }
    }

    /// Whether bytes of an unfinished block are buffered.
    pub fn has_partial_block(&self) -> bool {
        !self.fields.is_empty() || !self.label.is_empty() || self.state != State::Idle
    }

    fn step(&mut self, byte: u8) -> Option<Frame> {
        if self.state == State::Hex {
            if byte == b'\n' {
                self.state = self.resume;
            }
            return None;
        }

        // The checksum byte may legitimately be ':'
        if byte == b':' && self.state != State::Checksum {
            self.resume = self.state;
            self.state = State::Hex;
            return None;
        }

        self.sum = self.sum.wrapping_add(byte);

        match self.state {
            State::Idle => {
                if byte == b'\n' {
                    self.state = State::RecordBegin;
                }
            }
            State::RecordBegin => {
                self.label.clear();
                self.label.push(byte);
                self.state = State::RecordName;
            }
            State::RecordName => match byte {
                b'\t' => {
                    if self.label == CHECKSUM_LABEL {
                        self.state = State::Checksum;
                    } else {
                        self.value.clear();
                        self.state = State::RecordValue;
                    }
                }
                _ => {
                    self.label.push(byte);
                    if self.label.len() > MAX_RECORD_LEN {
                        self.resync("label too long");
                    }
                }
            },
            State::RecordValue => match byte {
                b'\n' => {
                    self.fields.push(Field {
                        label: String::from_utf8_lossy(&self.label).into_owned(),
                        value: String::from_utf8_lossy(&self.value).into_owned(),
                    });
                    self.label.clear();
                    self.value.clear();
                    if self.fields.len() > MAX_FIELDS {
                        self.resync("too many records");
                    } else {
                        self.state = State::RecordBegin;
                    }
                }
                b'\r' => {}
                _ => {
                    self.value.push(byte);
                    if self.value.len() > MAX_RECORD_LEN {
                        self.resync("value too long");
                    }
                }
            },
            State::Checksum => {
                let frame = Frame {
                    block: Block::new(std::mem::take(&mut self.fields)),
                    checksum: self.sum,
                };
                self.label.clear();
                self.sum = 0;
                self.state = State::Idle;
                return Some(frame);
            }
            State::Hex => unreachable!("hex bytes are consumed above"),
        }

        None
    }

    fn resync(&mut self, reason: &str) {
        debug!(
            "Discarding malformed VE.Direct block ({reason}, {count} records)",
            count = self.fields.len()
        );
        self.reset();
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.resume = State::Idle;
        self.sum = 0;
        self.label.clear();
        self.value.clear();
        self.fields.clear();
    }
}

impl Decoder for VeDirectCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let mut consumed = 0;
        let mut frame = None;

        for &byte in src.iter() {
            consumed += 1;
            if let Some(complete) = self.step(byte) {
                frame = Some(complete);
                break;
            }
        }

        src.advance(consumed);
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if self.has_partial_block() {
            debug!(
                "Input ended inside a VE.Direct block, dropping {count} records",
                count = self.fields.len()
            );
            self.reset();
        }
        Ok(None)
    }
}
