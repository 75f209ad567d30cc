use anyhow::Result;
use tracing::info;
use vedirect_core::{Bridge, BridgeOptions, FileSink, MqttPublisher, open_source};

use crate::cli::Cli;
use crate::utils::print_warning;

/// Connect the configured outputs, open the input and relay until the input
/// ends or Ctrl+C is pressed.
pub async fn run(cli: Cli) -> Result<()> {
    let mut bridge = Bridge::new(BridgeOptions {
        verbose: cli.verbose,
    });

    let mqtt = cli.mqtt_settings();
    if mqtt.is_none() && cli.out_file.is_none() {
        print_warning("No --mqtt-topic or --out-file given; decoded blocks will only be logged");
    }

    if let Some(settings) = mqtt {
        let publisher = MqttPublisher::connect(settings).await?;
        info!("Publishing to topic {}", publisher.topic());
        bridge = bridge.with_publisher(publisher);
    }

    if let Some(path) = &cli.out_file {
        bridge = bridge.with_file_sink(FileSink::open(path).await?);
    }

    let source = open_source(&cli.dev, cli.baud).await?;
    info!(
        "Reading VE.Direct data from {kind} {path}",
        kind = source.kind(),
        path = source.path().display()
    );

    // Ctrl+C drops the relay mid-block: the block being handled may already
    // be published but not yet written to the file or counted.
    let outcome = tokio::select! {
        result = bridge.run(source.into_reader()) => result.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    bridge.shutdown().await?;
    info!(
        "Relay stopped: {stats}",
        stats = serde_json::to_string(&bridge.stats())?
    );

    outcome
}
