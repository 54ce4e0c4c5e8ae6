// MIT License - Copyright (c) 2026 Peter Wright
//
//! # ipano-bridge
//!
//! Persistent TCP bridge to iPano Plus wall panels.
//!
//! The panel speaks newline-delimited JSON on port 3124. This library keeps
//! a long-lived connection to it (reconnecting with exponential backoff and
//! sending heartbeats), turns the inbound stream into typed button, relay,
//! backlight and proximity notifications, and offers a command API that can
//! be called from any task.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ipano_bridge::{BridgeConfig, IpanoBridge, Topic};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = IpanoBridge::new(
//!         BridgeConfig::builder()
//!             .host("192.168.2.120")
//!             .build(),
//!     );
//!
//!     let _presses = bridge.subscribe(Topic::Button, |event| {
//!         println!("Button: {:?}", event);
//!     });
//!
//!     let mut events = bridge.events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     bridge.start().await;
//!     bridge.set_all_backlights("white").await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
pub mod constants;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod mqtt;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod transport;

// Re-exports for convenience
pub use bridge::{ConnectionStatus, IpanoBridge};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use connection::ConnectionState;
pub use devices::{BacklightColor, Button, ButtonAction, ButtonTarget, DeviceState, RelaySwitch};
pub use error::{BridgeError, Result};
pub use event::{BridgeEvent, ButtonEvent, EventReceiver, Subscription, Topic};
pub use registry::BridgeRegistry;
pub use services::ServiceCall;
