//! Example: Run the backlight effects and toggle a relay.

use std::time::Duration;

use ipano_bridge::{BacklightColor, BridgeConfig, IpanoBridge, ServiceCall};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.2.120".to_string());
    let bridge = IpanoBridge::new(BridgeConfig::builder().name("effects").host(host).build());

    if !bridge.start().await {
        anyhow::bail!("Could not connect to {}", bridge.config().address());
    }

    bridge.wake_screen().await;
    bridge.set_all_backlights("off").await;

    let effects = [
        ServiceCall::PulseBacklight {
            button: 1,
            color: BacklightColor::White,
            times: 3,
            duration: 0.3,
        },
        ServiceCall::FadeBacklight {
            button: 2,
            from_color: BacklightColor::Yellow,
            to_color: BacklightColor::White,
            duration: 2.0,
        },
        ServiceCall::BreathingBacklight {
            button: 3,
            color: BacklightColor::White,
            cycles: 2,
            breath_duration: 2.0,
        },
    ];

    for effect in &effects {
        println!("Running {}...", effect.name());
        if !effect.run_on(&bridge).await {
            println!("  {} failed", effect.name());
        }
    }

    println!("Toggling relay 1...");
    bridge.control_relay(1, true).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    bridge.control_relay(1, false).await;

    bridge.set_all_backlights("white").await;
    bridge.stop().await;
    Ok(())
}
