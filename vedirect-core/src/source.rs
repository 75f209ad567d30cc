use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::info;

/// Line speed used by every VE.Direct device.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

pub type SourceReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Serial,
    File,
}

/// An opened VE.Direct byte source.
pub struct InputSource {
    kind: SourceKind,
    path: PathBuf,
    reader: SourceReader,
}

impl InputSource {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_reader(self) -> SourceReader {
        self.reader
    }
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSource")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Open `path` as a capture file when it is a regular file, otherwise as a
/// serial device.
pub async fn open_source(path: impl AsRef<Path>, baud_rate: u32) -> Result<InputSource> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat input {}", path.display()))?;

    if metadata.is_file() {
        info!("Replaying VE.Direct capture from {}", path.display());
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open capture file {}", path.display()))?;
        return Ok(InputSource {
            kind: SourceKind::File,
            path: path.to_path_buf(),
            reader: Box::pin(file),
        });
    }

    info!(
        "Opening serial device {} at {baud_rate} baud",
        path.display()
    );
    let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .with_context(|| format!("Failed to open serial device {}", path.display()))?;

    Ok(InputSource {
        kind: SourceKind::Serial,
        path: path.to_path_buf(),
        reader: Box::pin(port),
    })
}
