// VESC diagnostic: READ-ONLY check of both motor controllers
//
// Sends only firmware-version and get-values requests; the wheels never move.
//
// Usage: cargo run --example vesc_diagnostic -- [left_port] [right_port]
// Example: cargo run --example vesc_diagnostic -- /dev/ttyACM0 /dev/ttyACM1

use couch_drive_runtime::config::{LEFT_MOTOR_PORT, RIGHT_MOTOR_PORT};
use couch_drive_runtime::motor::VescBus;
use couch_drive_runtime::telemetry::VehicleConfig;
use std::io::{self, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let left = args.next().unwrap_or_else(|| LEFT_MOTOR_PORT.to_string());
    let right = args.next().unwrap_or_else(|| RIGHT_MOTOR_PORT.to_string());

    println!("Couch VESC diagnostic (read-only, no movement)");
    println!();

    let vehicle = VehicleConfig::default();
    let mut healthy = true;
    for (side, port) in [("Left", left), ("Right", right)] {
        println!("=== {} motor on {} ===", side, port);
        healthy &= check(&port, &vehicle)?;
        println!();
    }

    if healthy {
        println!("Both controllers responding.");
    } else {
        println!("Troubleshooting:");
        println!("  - Check the port paths (ls /dev/ttyACM*)");
        println!("  - Verify the battery is on and the VESC LEDs are lit");
        println!("  - Check your user is in the dialout group");
    }
    Ok(())
}

fn check(port: &str, vehicle: &VehicleConfig) -> io::Result<bool> {
    print!("  Opening port... ");
    io::stdout().flush()?;
    let mut bus = match VescBus::open(port) {
        Ok(bus) => {
            println!("ok");
            bus
        }
        Err(e) => {
            println!("FAILED: {}", e);
            return Ok(false);
        }
    };

    print!("  Firmware request... ");
    io::stdout().flush()?;
    match bus.ping() {
        Ok(true) => println!("responding"),
        Ok(false) => {
            println!("no response");
            return Ok(false);
        }
        Err(e) => {
            println!("ERROR: {}", e);
            return Ok(false);
        }
    }

    match bus.get_values() {
        Ok(values) => {
            println!("  Input voltage:  {:.1} V ({:.0} %)", values.v_in, vehicle.battery_pct(values.v_in));
            println!("  FET temp:       {:.1} °C", values.temp_fet);
            println!("  Motor temp:     {:.1} °C", values.temp_motor);
            println!("  Motor current:  {:.2} A", values.avg_motor_current);
            println!("  Input current:  {:.2} A", values.avg_input_current);
            println!("  Duty cycle:     {:.3}", values.duty);
            println!(
                "  Speed:          {:.0} erpm ({:.2} mph)",
                values.rpm,
                vehicle.speed_conversion.mph(values.rpm)
            );
            Ok(true)
        }
        Err(e) => {
            println!("  Get values: ERROR - {}", e);
            Ok(false)
        }
    }
}
