//! Example: Print every notification from one panel.

use ipano_bridge::{BridgeConfig, BridgeEvent, IpanoBridge, Topic};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.2.120".to_string());
    let bridge = IpanoBridge::new(BridgeConfig::builder().name("monitor").host(host).build());

    // Callback subscriptions run on the read loop and must stay quick
    let _presses = bridge.subscribe(Topic::Button, |event| {
        if let BridgeEvent::Button(press) = event {
            println!("  {} {}", press.button, press.action.as_str());
        }
    });

    let mut events = bridge.events();
    if !bridge.start().await {
        anyhow::bail!("Could not connect to {}", bridge.config().address());
    }

    println!("Listening for panel events (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(BridgeEvent::Button(_)) => {}
                    Ok(BridgeEvent::RelayUpdate { relay, on, .. }) => {
                        println!("Relay {} is now {}", relay + 1, if on { "on" } else { "off" });
                    }
                    Ok(BridgeEvent::BacklightUpdate { backlights, .. }) => {
                        for (index, color) in backlights {
                            println!("Backlight {}: {}", index + 1, color);
                        }
                    }
                    Ok(BridgeEvent::ProximityUpdate { detected, .. }) => {
                        println!("Proximity: {}", if detected { "someone nearby" } else { "clear" });
                    }
                    Ok(BridgeEvent::Disconnected { .. }) => {
                        println!("Panel disconnected, waiting for reconnect...");
                    }
                    Ok(event) => {
                        println!("Event: {:?}", event);
                    }
                    Err(RecvError::Lagged(n)) => {
                        println!("Missed {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    let status = bridge.connection_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    bridge.stop().await;
    Ok(())
}
