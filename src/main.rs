// MIT License - Copyright (c) 2026 Peter Wright
// MQTT front end for iPano Plus panels

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Instant, Interval, interval_at};
use tracing::{debug, error, info, warn};

use ipano_bridge::constants::{DEFAULT_NAME, DEFAULT_PORT};
use ipano_bridge::mqtt::{MqttCmdAck, MqttEvent, MqttStatus};
use ipano_bridge::{BridgeConfig, BridgeRegistry, ConnectionState, IpanoBridge, ServiceCall};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ipano2mqtt")]
#[command(about = "Bridge between iPano Plus wall panels and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    mqtt: MqttToml,
    #[serde(default)]
    bridge: BridgeToml,
    #[serde(rename = "device")]
    devices: Vec<DeviceToml>,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_status_interval")]
    status_interval_secs: u64,
}

fn default_client_id() -> String {
    "ipano-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "ipano/cmd".to_string()
}
fn default_publish_topic() -> String {
    "ipano".to_string()
}
fn default_status_interval() -> u64 {
    60
}

/// Tuning shared by every device.
#[derive(Debug, Deserialize)]
struct BridgeToml {
    #[serde(default = "default_connect_attempts")]
    connect_attempts: u32,
    #[serde(default = "default_reconnect_attempts")]
    reconnect_attempts: u32,
    #[serde(default = "default_backoff_base")]
    backoff_base_ms: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_cooldown")]
    reconnect_cooldown_ms: u64,
    #[serde(default = "default_read_timeout")]
    read_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_threshold")]
    heartbeat_threshold_ms: u64,
}

impl Default for BridgeToml {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            reconnect_attempts: default_reconnect_attempts(),
            backoff_base_ms: default_backoff_base(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_cooldown_ms: default_reconnect_cooldown(),
            read_timeout_ms: default_read_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_threshold_ms: default_heartbeat_threshold(),
        }
    }
}

fn default_connect_attempts() -> u32 {
    5
}
fn default_reconnect_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    10000
}
fn default_reconnect_cooldown() -> u64 {
    5000
}
fn default_read_timeout() -> u64 {
    30000
}
fn default_heartbeat_interval() -> u64 {
    5000
}
fn default_heartbeat_threshold() -> u64 {
    15000
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    #[serde(default = "default_device_name")]
    name: String,
    host: String,
    #[serde(default = "default_device_port")]
    port: u16,
}

fn default_device_name() -> String {
    DEFAULT_NAME.to_string()
}
fn default_device_port() -> u16 {
    DEFAULT_PORT
}

fn build_bridge_config(tuning: &BridgeToml, device: &DeviceToml) -> BridgeConfig {
    BridgeConfig::builder()
        .name(&device.name)
        .host(&device.host)
        .port(device.port)
        .connect_attempts(tuning.connect_attempts)
        .reconnect_attempts(tuning.reconnect_attempts)
        .backoff_base(Duration::from_millis(tuning.backoff_base_ms))
        .connect_timeout(Duration::from_millis(tuning.connect_timeout_ms))
        .reconnect_cooldown(Duration::from_millis(tuning.reconnect_cooldown_ms))
        .read_timeout(Duration::from_millis(tuning.read_timeout_ms))
        .heartbeat_interval(Duration::from_millis(tuning.heartbeat_interval_ms))
        .heartbeat_threshold(Duration::from_millis(tuning.heartbeat_threshold_ms))
        .build()
}

fn build_registry(config: &Config) -> Result<BridgeRegistry> {
    if config.devices.is_empty() {
        anyhow::bail!("No [[device]] entries configured");
    }
    let mut registry = BridgeRegistry::new();
    for device in &config.devices {
        let bridge = IpanoBridge::new(build_bridge_config(&config.bridge, device));
        if registry.insert(bridge).is_some() {
            anyhow::bail!("Duplicate device name: {}", device.name);
        }
    }
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

fn device_topic(publish_topic: &str, device: &str) -> String {
    format!("{publish_topic}/{device}")
}

async fn publish_status(client: &AsyncClient, publish_topic: &str, bridge: &IpanoBridge) {
    let status = MqttStatus::new(bridge.name(), &bridge.connection_status().await);
    publish_json(client, &device_topic(publish_topic, bridge.name()), &status, true).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    error: Option<String>,
) {
    publish_json(client, topic, &MqttCmdAck::new(success, src, error), false).await;
}

// ---------------------------------------------------------------------------
// Bridge event → MQTT
// ---------------------------------------------------------------------------

async fn forward_events(bridge: Arc<IpanoBridge>, client: AsyncClient, publish_topic: String) {
    let topic = device_topic(&publish_topic, bridge.name());
    let mut rx = bridge.events();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let msg = MqttEvent::from_event(bridge.name(), &event);
                debug!("{}: publishing {}", bridge.name(), msg.op());
                publish_json(&client, &topic, &msg, false).await;
            }
            Err(RecvError::Lagged(n)) => {
                warn!("{}: event receiver lagged, missed {n} events", bridge.name());
            }
            Err(RecvError::Closed) => {
                info!("{}: event channel closed", bridge.name());
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

/// A command payload: either a service call (`{"service": ..}`, optionally
/// with a `device` to target) or a bridge op (`{"op": "STATUS"}`).
enum Command {
    Service {
        device: Option<String>,
        call: ServiceCall,
    },
    Status,
    Ping,
}

fn parse_command(payload: &str) -> Result<Command> {
    let mut value: serde_json::Value =
        serde_json::from_str(payload).context("Command is not valid JSON")?;
    let object = value
        .as_object_mut()
        .context("Command must be a JSON object")?;

    if object.contains_key("service") {
        let device = match object.remove("device") {
            Some(serde_json::Value::String(name)) => Some(name),
            Some(other) => anyhow::bail!("Invalid device: {other}"),
            None => None,
        };
        let call = serde_json::from_value(value).context("Invalid service call")?;
        return Ok(Command::Service { device, call });
    }

    match object.get("op").and_then(|op| op.as_str()) {
        Some("STATUS") => Ok(Command::Status),
        Some("PING") => Ok(Command::Ping),
        Some(other) => anyhow::bail!("Unknown command: {other}"),
        None => anyhow::bail!("Command needs a service or an op"),
    }
}

async fn handle_command(
    payload: &str,
    client: &AsyncClient,
    publish_topic: &str,
    registry: &BridgeRegistry,
) {
    // Echoed back in CMD_ACK
    let src_json = serde_json::from_str::<serde_json::Value>(payload).ok();

    let command = match parse_command(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected MQTT command: {e:#}");
            publish_cmd_ack(client, publish_topic, false, src_json, Some(format!("{e:#}"))).await;
            return;
        }
    };

    match command {
        Command::Service { device: None, call } => {
            info!("Command: {} on all devices", call.name());
            let success = registry.call(&call).await;
            publish_cmd_ack(client, publish_topic, success, src_json, None).await;
        }
        Command::Service {
            device: Some(name),
            call,
        } => {
            let Some(bridge) = registry.get(&name) else {
                warn!("Command for unknown device {name}");
                let error = Some(format!("Unknown device: {name}"));
                publish_cmd_ack(client, publish_topic, false, src_json, error).await;
                return;
            };
            info!("Command: {} on {name}", call.name());
            let success = call.run_on(bridge).await;
            publish_cmd_ack(client, publish_topic, success, src_json, None).await;
        }
        Command::Status => {
            debug!("Command: STATUS");
            for bridge in registry.iter() {
                publish_status(client, publish_topic, bridge).await;
            }
            publish_cmd_ack(client, publish_topic, true, src_json, None).await;
        }
        Command::Ping => {
            info!("Command: PING");
            publish_cmd_ack(client, publish_topic, true, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=ipano_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let registry = Arc::new(build_registry(&config)?);
    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
    let publish_topic = config.mqtt.publish_topic;
    let subscribe_topic = config.mqtt.subscribe_topic;

    let mut sigterm = signal(SignalKind::terminate())?;

    // Set up MQTT
    let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

    client
        .subscribe(&subscribe_topic, QoS::AtLeastOnce)
        .await
        .context("Failed to subscribe to MQTT topic")?;
    info!("MQTT: subscribed to {subscribe_topic}");

    // Task 1: one event forwarder per device
    let mut handles = Vec::new();
    for bridge in registry.iter() {
        handles.push(tokio::spawn(forward_events(
            Arc::clone(bridge),
            client.clone(),
            publish_topic.clone(),
        )));
    }

    // Task 2: connect every device
    let registry_start = Arc::clone(&registry);
    handles.push(tokio::spawn(async move {
        let connected = registry_start.start_all().await;
        if connected < registry_start.len() {
            warn!("Some devices are unreachable; retrying on the status interval");
        }
    }));

    // Task 3: MQTT event loop (receives messages, handles commands)
    let registry_cmds = Arc::clone(&registry);
    let client_cmds = client.clone();
    let topic_cmds = publish_topic.clone();
    let sub_topic = subscribe_topic.clone();
    handles.push(tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // rumqttc does not resubscribe after a broker reconnect.
                    info!("MQTT: connected, subscribing to {sub_topic}");
                    if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                        error!("Failed to subscribe to {sub_topic}: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    if msg.topic == sub_topic {
                        let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                        info!("MQTT command received: {payload}");
                        // Effects can run for seconds; keep polling meanwhile.
                        let registry = Arc::clone(&registry_cmds);
                        let client = client_cmds.clone();
                        let topic = topic_cmds.clone();
                        tokio::spawn(async move {
                            handle_command(&payload, &client, &topic, &registry).await;
                        });
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }));

    // Task 4: status timer; also restarts devices whose retry budget ran out
    let registry_status = Arc::clone(&registry);
    let client_status = client.clone();
    let topic_status = publish_topic.clone();
    let status_interval = Duration::from_secs(config.mqtt.status_interval_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = status_ticker(status_interval);
        loop {
            ticker.tick().await;
            for bridge in registry_status.iter() {
                publish_status(&client_status, &topic_status, bridge).await;
                if bridge.state() == ConnectionState::Disconnected {
                    let bridge = Arc::clone(bridge);
                    tokio::spawn(async move { bridge.start().await });
                }
            }
        }
    }));

    info!("MQTT bridge running for {} devices. Send SIGINT/SIGTERM to stop.", registry.len());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }

    for handle in handles {
        handle.abort();
    }
    registry.stop_all().await;
    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect: {e}");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Ticker for the status task. The first tick is one period out, so the
/// restart check never races the initial `start_all`.
fn status_ticker(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [mqtt]
        url = "mqtt://broker.local:1883"

        [bridge]
        reconnect_attempts = 10

        [[device]]
        name = "Hallway"
        host = "192.168.2.120"

        [[device]]
        name = "Kitchen"
        host = "192.168.2.121"
        port = 4000
    "#;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.mqtt.client_id, "ipano-bridge");
        assert_eq!(config.mqtt.publish_topic, "ipano");
        assert_eq!(config.mqtt.status_interval_secs, 60);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].port, 3124);
        assert_eq!(config.devices[1].port, 4000);

        let bridge = build_bridge_config(&config.bridge, &config.devices[1]);
        assert_eq!(bridge.name, "Kitchen");
        assert_eq!(bridge.reconnect_attempts, 10);
        assert_eq!(bridge.connect_attempts, 5);
        assert_eq!(bridge.reconnect_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn test_bridge_section_optional() {
        let config: Config = toml::from_str(
            r#"
            [mqtt]
            url = "localhost:1883"

            [[device]]
            host = "10.0.0.2"
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.heartbeat_threshold_ms, 15000);
        assert_eq!(config.devices[0].name, "iPano Plus");
    }

    #[tokio::test]
    async fn test_duplicate_devices_rejected() {
        let config: Config = toml::from_str(
            r#"
            [mqtt]
            url = "localhost:1883"

            [[device]]
            host = "10.0.0.2"

            [[device]]
            host = "10.0.0.3"
            "#,
        )
        .unwrap();
        assert!(build_registry(&config).is_err());
    }

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(parse_mqtt_url("mqtt://broker:1883").unwrap(), ("broker".to_string(), 1883));
        assert_eq!(parse_mqtt_url("tcp://10.0.0.1:8883").unwrap(), ("10.0.0.1".to_string(), 8883));
        assert_eq!(parse_mqtt_url("localhost:1883").unwrap(), ("localhost".to_string(), 1883));
        assert!(parse_mqtt_url("mqtt://broker").is_err());
        assert!(parse_mqtt_url("mqtt://broker:port").is_err());
    }

    #[test]
    fn test_parse_command() {
        let cmd = parse_command(r#"{"service":"set_backlight","button":1,"color":"white","device":"Hallway"}"#)
            .unwrap();
        assert!(matches!(
            cmd,
            Command::Service { device: Some(ref d), call: ServiceCall::SetBacklight { button: 1, .. } } if d == "Hallway"
        ));

        assert!(matches!(
            parse_command(r#"{"service":"wake_screen"}"#).unwrap(),
            Command::Service { device: None, call: ServiceCall::WakeScreen }
        ));
        assert!(matches!(parse_command(r#"{"op":"STATUS"}"#).unwrap(), Command::Status));
        assert!(matches!(parse_command(r#"{"op":"PING"}"#).unwrap(), Command::Ping));
        assert!(parse_command(r#"{"op":"REBOOT"}"#).is_err());
        assert!(parse_command(r#"{"service":"wake_screen","device":3}"#).is_err());
        assert!(parse_command("[1]").is_err());
        assert!(parse_command("nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_ticker_skips_immediate_tick() {
        let begun = Instant::now();
        let mut ticker = status_ticker(Duration::from_secs(60));
        ticker.tick().await;
        assert!(begun.elapsed() >= Duration::from_secs(60));
        ticker.tick().await;
        assert!(begun.elapsed() >= Duration::from_secs(120));
    }
}
