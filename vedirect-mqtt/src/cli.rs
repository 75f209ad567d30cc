use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use vedirect_core::mqtt::{DEFAULT_SERVER, MqttSettings, default_client_id};
use vedirect_core::source::DEFAULT_BAUD_RATE;

#[derive(Parser, Debug)]
#[command(name = "vedirect-mqtt")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Full path to serial device node, or a capture file to replay
    #[arg(long, env = "VEDIRECT_DEV", default_value = "/dev/ttyUSB0")]
    pub dev: PathBuf,

    /// Serial line speed
    #[arg(long, env = "VEDIRECT_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// MQTT server address (tcp://, mqtt://, ssl://, tls:// or mqtts://)
    #[arg(long, alias = "mqtt.server", env = "VEDIRECT_MQTT_SERVER", default_value = DEFAULT_SERVER)]
    pub mqtt_server: String,

    /// The MQTT topic to publish messages to (MQTT is disabled without one)
    #[arg(long, alias = "mqtt.topic", env = "VEDIRECT_MQTT_TOPIC")]
    pub mqtt_topic: Option<String>,

    /// MQTT client identifier
    #[arg(long, env = "VEDIRECT_MQTT_CLIENT_ID")]
    pub mqtt_client_id: Option<String>,

    #[arg(long, env = "VEDIRECT_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "VEDIRECT_MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT TLS private key
    #[arg(long, alias = "mqtt.tls_key", env = "VEDIRECT_MQTT_TLS_KEY")]
    pub mqtt_tls_key: Option<PathBuf>,

    /// MQTT TLS client certificate
    #[arg(long, alias = "mqtt.tls_cert", env = "VEDIRECT_MQTT_TLS_CERT")]
    pub mqtt_tls_cert: Option<PathBuf>,

    /// MQTT TLS root CA
    #[arg(long, alias = "mqtt.tls_rootca", env = "VEDIRECT_MQTT_TLS_ROOTCA")]
    pub mqtt_tls_rootca: Option<PathBuf>,

    /// QoS level for published messages
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub mqtt_qos: u8,

    /// Publish with the retain flag set
    #[arg(long)]
    pub mqtt_retain: bool,

    /// Delay between MQTT reconnect attempts (e.g. 1s, 500ms)
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub mqtt_reconnect_interval: Duration,

    /// How long to wait for the broker to accept the connection
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub mqtt_connect_timeout: Duration,

    /// File to append JSON data to, one document per line
    #[arg(long, env = "VEDIRECT_OUT_FILE")]
    pub out_file: Option<PathBuf>,

    /// Log every published JSON payload
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Print version
    #[arg(short = 'v', long)]
    pub version: bool,
}

impl Cli {
    /// MQTT settings, or `None` when no topic is configured.
    pub fn mqtt_settings(&self) -> Option<MqttSettings> {
        let topic = self.mqtt_topic.as_deref().filter(|topic| !topic.is_empty())?;

        Some(MqttSettings {
            server: self.mqtt_server.clone(),
            topic: topic.to_string(),
            client_id: self
                .mqtt_client_id
                .clone()
                .unwrap_or_else(default_client_id),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            tls_ca: self.mqtt_tls_rootca.clone(),
            tls_cert: self.mqtt_tls_cert.clone(),
            tls_key: self.mqtt_tls_key.clone(),
            qos: self.mqtt_qos,
            retain: self.mqtt_retain,
            reconnect_interval: self.mqtt_reconnect_interval,
            connect_timeout: self.mqtt_connect_timeout,
            ..MqttSettings::default()
        })
    }
}
