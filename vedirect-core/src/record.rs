use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::codec::Block;

pub const TIMESTAMP_KEY: &str = "timestamp";

/// The JSON document published for one valid block.
///
/// All values are strings, including the Unix timestamp, so consumers see
/// exactly what the device sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn from_block(block: &Block, timestamp: i64) -> Self {
        let mut fields = block.to_map();
        fields.insert(TIMESTAMP_KEY.to_string(), timestamp.to_string());
        Self { fields }
    }

    /// Stamp a block with the current wall-clock time.
    pub fn now(block: &Block) -> Self {
        Self::from_block(block, chrono::Utc::now().timestamp())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize record")
    }
}
