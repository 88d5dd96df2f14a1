//! Basic example: scan, connect to the nearest peripheral and stream its values
//!
//! Run with: cargo run --example scan_and_stream [name-filter]
//!
//! Without a filter the strongest connectable peripheral is picked. Once
//! subscribed, a greeting is written to the last discovered characteristic.

use ble_central_session::{
    display_uuid, service_name, AdapterState, ConnectionState, Error, Result, SessionConfig,
    SessionManager,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_central_session=debug".parse().unwrap()),
        )
        .init();

    let filter = std::env::args().nth(1);

    println!("Starting BLE central session demo...");
    let (manager, _pump) = SessionManager::with_btleplug(SessionConfig::default()).await?;

    // Register callbacks
    let _adapter_handle = manager.on_adapter_state_changed(|state| {
        println!("Adapter state: {}", state);
    });

    let _discovered_handle = manager.on_peripheral_discovered(|peripheral| {
        println!(
            "  {} {} RSSI: {:?} dBm{}",
            peripheral.id,
            peripheral.display_name(),
            peripheral.rssi,
            if peripheral.connectable { "" } else { " (too weak)" }
        );
    });

    let _state_handle = manager.on_session_state_changed(|peripheral, state| {
        println!("Session with {}: {}", peripheral, state);
    });

    let _value_handle = manager.on_value_received(|characteristic, value| {
        println!(
            "[{}] {}",
            display_uuid(&characteristic),
            String::from_utf8_lossy(&value)
        );
    });

    let _failure_handle = manager.on_session_failed(|failure| {
        println!("Session failed: {}", failure);
    });

    // Wait for the adapter to power on
    for _ in 0..50 {
        if manager.adapter_state() == AdapterState::PoweredOn {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    manager.start_scan()?;
    println!("Scanning for 10 seconds...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let target = match &filter {
        Some(name) => manager
            .discovered_peripherals()
            .into_iter()
            .find(|p| p.connectable && p.display_name().contains(name.as_str())),
        None => manager.nearest_peripheral(),
    };

    let Some(target) = target else {
        println!("\nNo connectable peripheral found.");
        manager.shutdown()?;
        return Ok(());
    };

    println!("\nConnecting to {} ({})", target.display_name(), target.id);
    manager.connect(&target.id)?;

    // Wait for discovery to finish
    for _ in 0..100 {
        if manager.connection_state() == ConnectionState::Subscribed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(session) = manager.session() {
        println!("\nServices:");
        for service in &session.services {
            match service_name(&service.uuid) {
                Some(name) => println!("  {} ({})", display_uuid(&service.uuid), name),
                None => println!("  {}", display_uuid(&service.uuid)),
            }
        }
        println!("Characteristics:");
        for characteristic in &session.characteristics {
            println!(
                "  {} {:?}{}",
                display_uuid(&characteristic.uuid),
                characteristic.properties,
                if characteristic.notifying { " [notifying]" } else { "" }
            );
        }
    }

    match manager.send_message(b"Message from central") {
        Ok(()) => println!("\nSent greeting"),
        Err(Error::NotConnected) => println!("\nNot subscribed, skipping greeting"),
        Err(e) => println!("\nFailed to send greeting: {}", e),
    }

    println!("Streaming values for 30 seconds...");
    tokio::time::sleep(Duration::from_secs(30)).await;

    manager.shutdown()?;
    println!("Done.");

    Ok(())
}
