use anyhow::{Context, Result, bail, ensure};
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::{Host, Url};

pub const DEFAULT_SERVER: &str = "tcp://localhost:1883";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker URL, e.g. `tcp://localhost:1883` or `ssl://broker:8883`
    pub server: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub qos: u8,
    pub retain: bool,
    pub keep_alive: Duration,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            topic: String::new(),
            client_id: default_client_id(),
            username: None,
            password: None,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            qos: 1,
            retain: false,
            keep_alive: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl MqttSettings {
    /// TLS is used for TLS URL schemes, or whenever a client certificate is
    /// configured.
    pub fn wants_tls(&self, address: &BrokerAddress) -> bool {
        address.tls || (self.tls_cert.is_some() && self.tls_key.is_some())
    }
}

pub fn default_client_id() -> String {
    format!(
        "vedirect-mqtt-{suffix}",
        suffix = hex::encode(rand::random::<[u8; 4]>())
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a broker address. A bare `host:port` is treated as `tcp://`.
pub fn parse_server(server: &str) -> Result<BrokerAddress> {
    let with_scheme = if server.contains("://") {
        server.to_string()
    } else {
        format!("tcp://{server}")
    };
    let url = Url::parse(&with_scheme)
        .with_context(|| format!("Invalid MQTT server address: {server}"))?;

    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        other => bail!("Unsupported MQTT server scheme: {other}"),
    };

    // IPv6 literals lose their brackets so the resolver accepts them
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => bail!("MQTT server address has no host: {server}"),
    };
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    Ok(BrokerAddress { host, port, tls })
}

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        _ => bail!("Invalid MQTT QoS level {level} (expected 0, 1 or 2)"),
    }
}

/// Translate settings into client options, loading any TLS material from
/// disk.
pub fn build_options(settings: &MqttSettings) -> Result<MqttOptions> {
    ensure!(!settings.topic.is_empty(), "MQTT topic must not be empty");
    ensure!(
        !settings.client_id.is_empty() && !settings.client_id.starts_with(' '),
        "MQTT client id must not be empty or start with a space"
    );
    ensure!(
        settings.tls_cert.is_some() == settings.tls_key.is_some(),
        "MQTT TLS client certificate and key must be given together"
    );

    let address = parse_server(&settings.server)?;
    let mut options = MqttOptions::new(&settings.client_id, &address.host, address.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);

    match (&settings.username, &settings.password) {
        (Some(username), password) => {
            options.set_credentials(username, password.clone().unwrap_or_default());
        }
        (None, Some(_)) => bail!("MQTT password given without a username"),
        (None, None) => {}
    }

    if settings.wants_tls(&address) {
        let client_auth = match (&settings.tls_cert, &settings.tls_key) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("Failed to read MQTT client certificate {}", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("Failed to read MQTT client key {}", key_path.display())
                })?;
                Some((cert, key))
            }
            _ => None,
        };

        let tls = match &settings.tls_ca {
            Some(ca_path) => {
                let ca = std::fs::read(ca_path).with_context(|| {
                    format!("Failed to read MQTT root CA {}", ca_path.display())
                })?;
                TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth,
                }
            }
            None => TlsConfiguration::Rustls(Arc::new(platform_tls_config(client_auth)?)),
        };
        options.set_transport(Transport::tls_with_config(tls));
    }

    Ok(options)
}

/// TLS client configuration trusting the platform's root certificates, used
/// when no root CA file is configured.
fn platform_tls_config(client_auth: Option<(Vec<u8>, Vec<u8>)>) -> Result<ClientConfig> {
    let certs = rustls_native_certs::load_native_certs()
        .context("Failed to load platform root certificates")?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!("Loaded {added} platform root certificates ({ignored} ignored)");
    ensure!(
        added > 0,
        "No usable platform root certificates found; pass --mqtt-tls-rootca"
    );

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = match client_auth {
        Some((cert, key)) => {
            let chain = rustls_pemfile::certs(&mut cert.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to parse MQTT client certificate")?;
            let key = rustls_pemfile::private_key(&mut key.as_slice())
                .context("Failed to parse MQTT client key")?
                .context("MQTT client key file holds no private key")?;
            builder
                .with_client_auth_cert(chain, key)
                .context("Invalid MQTT client certificate or key")?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

/// Result of handing a payload to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// The request queue was full (broker unreachable); the payload was
    /// discarded.
    Dropped,
}

/// A connected MQTT client publishing every payload to one topic.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    retain: bool,
    server: String,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Connect and wait for the broker's CONNACK before returning.
    pub async fn connect(settings: MqttSettings) -> Result<Self> {
        let qos = qos_from_level(settings.qos)?;
        let options = build_options(&settings)?;

        info!("Connecting to MQTT broker {}...", settings.server);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .with_context(|| {
                format!(
                    "Timed out connecting to {server} after {timeout}",
                    server = settings.server,
                    timeout = humantime::format_duration(settings.connect_timeout)
                )
            })?
            .with_context(|| format!("Failed to connect to {}", settings.server))?;

        info!("Connected to {}", settings.server);

        let handle = tokio::spawn(drive_event_loop(event_loop, settings.reconnect_interval));

        Ok(Self {
            client,
            topic: settings.topic,
            qos,
            retain: settings.retain,
            server: settings.server,
            event_loop: Some(handle),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue `payload` without waiting. While the broker is unreachable the
    /// event loop stops draining the queue; once it is full, payloads are
    /// dropped so the relay keeps reading the source.
    pub fn publish(&self, payload: &str) -> Result<PublishOutcome> {
        match self.client.try_publish(
            &self.topic,
            self.qos,
            self.retain,
            payload.as_bytes().to_vec(),
        ) {
            Ok(()) => {
                debug!("Published message to topic: {}", self.topic);
                Ok(PublishOutcome::Queued)
            }
            Err(ClientError::TryRequest(_)) => {
                warn!(
                    "MQTT request queue full, dropping message for topic {}",
                    self.topic
                );
                Ok(PublishOutcome::Dropped)
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to publish to topic {}", self.topic))
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(mut handle) = self.event_loop.take() else {
            return Ok(());
        };

        // A full queue means the broker is gone; the abort below covers it
        if let Err(e) = self.client.try_disconnect() {
            warn!("Error disconnecting from MQTT broker: {e}");
        }

        if tokio::time::timeout(Duration::from_secs(2), &mut handle)
            .await
            .is_err()
        {
            handle.abort();
        }

        info!("Disconnected from {}", self.server);
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        match event_loop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!("CONNACK received: {:?}", ack.code);
                return Ok(());
            }
            event => debug!("MQTT event before CONNACK: {event:?}"),
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, reconnect_interval: Duration) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent, stopping event loop");
                break;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Reconnected to MQTT broker");
            }
            Ok(notification) => {
                debug!("MQTT event: {notification:?}");
            }
            Err(e) => {
                warn!(
                    "MQTT connection error: {e}; retrying in {interval}",
                    interval = humantime::format_duration(reconnect_interval)
                );
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }
}
