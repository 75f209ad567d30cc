use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::codec::{Frame, VeDirectCodec};
use crate::mqtt::{MqttPublisher, PublishOutcome};
use crate::record::Record;
use crate::sink::FileSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    /// Log every JSON payload at info level instead of debug
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub blocks: u64,
    pub bad_blocks: u64,
    pub published: u64,
    /// Payloads discarded because the MQTT queue was full
    pub dropped: u64,
    pub written: u64,
}

/// Relays decoded blocks from a VE.Direct source to MQTT and/or a file.
pub struct Bridge {
    options: BridgeOptions,
    publisher: Option<MqttPublisher>,
    sink: Option<FileSink>,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            options,
            publisher: None,
            sink: None,
            stats: BridgeStats::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: MqttPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_file_sink(mut self, sink: FileSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Decode `reader` until it ends. Publish and write failures abort the
    /// run; corrupt blocks are logged and skipped.
    pub async fn run<R>(&mut self, reader: R) -> Result<BridgeStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, VeDirectCodec::new());

        while let Some(frame) = frames.next().await {
            self.handle_frame(frame?).await?;
        }

        info!(
            "Input ended after {blocks} blocks ({bad} bad)",
            blocks = self.stats.blocks,
            bad = self.stats.bad_blocks
        );
        Ok(self.stats)
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if !frame.is_valid() {
            self.stats.bad_blocks += 1;
            warn!(
                "Bad block, skipping: {block} (checksum residual {residual:#04x})",
                block = frame.block,
                residual = frame.checksum
            );
            return Ok(());
        }

        self.stats.blocks += 1;
        let payload = Record::now(&frame.block).to_json()?;

        if self.options.verbose {
            info!("{payload}");
        } else {
            debug!("{payload}");
        }

        if let Some(publisher) = &self.publisher {
            match publisher.publish(&payload)? {
                PublishOutcome::Queued => self.stats.published += 1,
                PublishOutcome::Dropped => self.stats.dropped += 1,
            }
        }

        if let Some(sink) = &mut self.sink {
            sink.write_record(&payload).await?;
            self.stats.written += 1;
        }

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(publisher) = &mut self.publisher {
            publisher.disconnect().await?;
        }
        Ok(())
    }
}
