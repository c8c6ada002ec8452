//! Example: buffered process data exchange
//!
//! Run with: cargo run --example poll_io -- 192.168.100.1
//!
//! This example demonstrates:
//! - Logging setup with an env filter (`RUST_LOG=coupler_io=debug`)
//! - Receiving conditions over a channel
//! - Module discovery and coupler diagnostics
//! - Buffered reads and writes driven by the poll cycle

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use coupler_io::{ChannelHandler, Coupler, CouplerConfig, IoKind, Parameter};
use tracing_subscriber::EnvFilter;

fn main() -> coupler_io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coupler_io=info")),
        )
        .init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.100.1".to_string());

    // =========================================================================
    // Connect
    // =========================================================================

    let config = CouplerConfig::new()
        .with_poll_period(Duration::from_millis(20))
        .with_reconnect_cooldown(Duration::from_secs(2));
    let coupler = Coupler::new(config);

    let (sender, conditions) = mpsc::channel();
    coupler.set_condition_handler(ChannelHandler::new(sender));

    coupler.connect(&host, coupler_io::DEFAULT_MODBUS_PORT)?;

    // =========================================================================
    // Coupler and modules
    // =========================================================================

    println!("=== Coupler ===\n");
    println!("serial   {}", coupler.serial_number()?);
    println!("ip       {}", coupler.ip_address()?);
    println!("mac      {}", coupler.mac_address()?);
    println!("watchdog {:?}", coupler.watchdog_threshold()?);
    println!("clients  {}", coupler.read_parameter(Parameter::ModbusClients)?);

    println!("\n=== Modules ===\n");
    for module in coupler.modules().iter() {
        let kinds: Vec<String> = IoKind::ALL
            .into_iter()
            .filter(|kind| module.has(*kind))
            .map(|kind| kind.to_string())
            .collect();
        println!("{module}: {}", kinds.join(", "));
    }

    // =========================================================================
    // Buffered I/O
    // =========================================================================

    println!("\n=== Process data ===\n");
    let modules = coupler.modules();
    let output = modules.iter().find(|m| m.has(IoKind::DigitalOut));
    let input = modules.iter().find(|m| m.has(IoKind::DigitalIn));

    for step in 0..10 {
        if let Some(module) = output {
            coupler.write_digital_outputs(module.index, 0, &[step % 2 == 0])?;
        }
        thread::sleep(Duration::from_millis(200));
        if let Some(module) = input {
            let bits = coupler.read_digital_inputs(module.index, 0, 1)?;
            println!("step {step}: input 0 of {} = {}", module.name, bits[0]);
        }
        while let Ok(condition) = conditions.try_recv() {
            println!("condition: {condition}");
        }
    }

    if let Some(state) = coupler.poll_state() {
        println!("\npoll state: {state:?}");
    }

    coupler.disconnect();
    Ok(())
}
