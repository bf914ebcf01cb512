//! MQTT link for Bambu printers.
//!
//! Printers in LAN mode run an MQTT broker on port 8883 with a self-signed
//! certificate, user `bblp` and the access code from the printer screen.
//! The event loop runs as a tokio task, reconnects with exponential backoff
//! and asks for a full `pushall` after every connect.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use bambulink_core::{LinkError, StateEvent, SubscriptionId};

use super::commands::PrinterCommand;
use super::report::parse_report;
use super::{DeviceLink, StateEventHandler, StateEventHub};

const REQUEST_CAPACITY: usize = 64;
const MAX_INCOMING_PACKET: usize = 1024 * 1024;
const MAX_OUTGOING_PACKET: usize = 64 * 1024;

/// Connection settings for a printer
#[derive(Debug, Clone)]
pub struct MqttLinkConfig {
    /// Printer IP address or hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Printer serial number, used in topic names.
    pub serial: String,
    /// MQTT user name.
    pub username: String,
    /// LAN access code.
    pub access_code: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// First reconnect delay.
    pub reconnect_initial: Duration,
    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,
}

impl MqttLinkConfig {
    /// Create a configuration with the LAN-mode defaults
    pub fn new(
        host: impl Into<String>,
        serial: impl Into<String>,
        access_code: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 8883,
            serial: serial.into(),
            username: "bblp".to_string(),
            access_code: access_code.into(),
            keep_alive: Duration::from_secs(30),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }

    /// Topic the printer publishes reports on
    pub fn report_topic(&self) -> String {
        format!("device/{}/report", self.serial)
    }

    /// Topic the printer accepts commands on
    pub fn request_topic(&self) -> String {
        format!("device/{}/request", self.serial)
    }
}

/// Device link backed by the printer's MQTT broker
pub struct MqttDeviceLink {
    config: MqttLinkConfig,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    events: Arc<StateEventHub>,
    task: tokio::task::JoinHandle<()>,
}

impl MqttDeviceLink {
    /// Start the link on the current tokio runtime
    ///
    /// Returns immediately; the connection is established in the background
    /// and announced with [`StateEvent::LinkUp`].
    pub fn connect(config: MqttLinkConfig) -> Result<Self, LinkError> {
        let client_id = format!("bambulink_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqtt_options.set_credentials(config.username.clone(), config.access_code.clone());
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options.set_max_packet_size(MAX_INCOMING_PACKET, MAX_OUTGOING_PACKET);

        // Bambu printers use self-signed certificates
        let tls_config = TlsConfiguration::Rustls(Arc::new(insecure_tls_config()?));
        mqtt_options.set_transport(Transport::tls_with_config(tls_config));

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let sequence = Arc::new(AtomicU64::new(0));
        let events = Arc::new(StateEventHub::new());

        let driver = LinkDriver {
            config: config.clone(),
            client: client.clone(),
            connected: Arc::clone(&connected),
            sequence: Arc::clone(&sequence),
            events: Arc::clone(&events),
        };
        let task = tokio::spawn(driver.run(event_loop));

        tracing::info!(
            "MQTT link to {} ({}:{}) started",
            config.serial,
            config.host,
            config.port
        );

        Ok(Self {
            config,
            client,
            connected,
            sequence,
            events,
            task,
        })
    }

    /// Printer serial number
    pub fn serial(&self) -> &str {
        &self.config.serial
    }

    /// Stop the event loop task
    pub fn shutdown(&self) {
        self.task.abort();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.emit(StateEvent::LinkDown {
                reason: "link shut down".to_string(),
            });
        }
    }
}

impl DeviceLink for MqttDeviceLink {
    fn send_command(&self, command: &PrinterCommand) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        publish(&self.client, &self.config, &self.sequence, command)
    }

    fn subscribe(&self, handler: StateEventHandler) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttDeviceLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn publish(
    client: &AsyncClient,
    config: &MqttLinkConfig,
    sequence: &AtomicU64,
    command: &PrinterCommand,
) -> Result<(), LinkError> {
    let sequence_id = sequence.fetch_add(1, Ordering::SeqCst) + 1;
    let payload = command.to_json(sequence_id).to_string();
    tracing::debug!("MQTT publish {} #{}", command.name(), sequence_id);

    client
        .try_publish(config.request_topic(), QoS::AtMostOnce, false, payload)
        .map_err(|e| LinkError::Publish {
            reason: e.to_string(),
        })
}

/// State owned by the event loop task
struct LinkDriver {
    config: MqttLinkConfig,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    events: Arc<StateEventHub>,
}

impl LinkDriver {
    async fn run(self, mut event_loop: EventLoop) {
        let report_topic = self.config.report_topic();
        let mut delay = self.config.reconnect_initial;

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    delay = self.config.reconnect_initial;
                    self.on_connected(&report_topic);
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    if message.topic == report_topic {
                        self.on_report(&message.payload);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        self.events.emit(StateEvent::LinkDown {
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "MQTT connection to {} failed: {}, retrying in {:?}",
                        self.config.host,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.reconnect_max);
                }
            }
        }
    }

    fn on_connected(&self, report_topic: &str) {
        tracing::info!("MQTT connected to printer {}", self.config.serial);

        if let Err(e) = self.client.try_subscribe(report_topic, QoS::AtMostOnce) {
            tracing::error!("Failed to subscribe to {}: {}", report_topic, e);
        }

        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(StateEvent::LinkUp);

        if let Err(e) = publish(
            &self.client,
            &self.config,
            &self.sequence,
            &PrinterCommand::PushAll,
        ) {
            tracing::warn!("Failed to request full status: {}", e);
        }
    }

    fn on_report(&self, payload: &[u8]) {
        match parse_report(payload) {
            Ok(Some(update)) if !update.is_empty() => {
                self.events.emit(StateEvent::Update(update));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring report: {}", e),
        }
    }
}

/// TLS client configuration accepting any server certificate
///
/// Signatures are still checked so the handshake stays well-formed.
fn insecure_tls_config() -> Result<ClientConfig, LinkError> {
    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| LinkError::Tls {
            reason: e.to_string(),
        })?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();

    Ok(config)
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
