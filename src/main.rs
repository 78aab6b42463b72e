use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use couch_drive_runtime::config::RuntimeConfig;

#[derive(Parser, Debug)]
#[command(name = "couch-drive", about = "Joystick drive runtime for the couch")]
struct Args {
    /// JSON config file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated motors instead of the VESC controllers
    #[arg(long)]
    sim: bool,

    /// Drive from the keyboard instead of a joystick
    #[arg(long)]
    keyboard: bool,

    #[arg(long)]
    left_port: Option<String>,

    #[arg(long)]
    right_port: Option<String>,

    /// Joystick device path
    #[arg(long)]
    joystick: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut RuntimeConfig) {
        if self.sim {
            config.motors.enabled = false;
        }
        if self.keyboard {
            config.joystick.keyboard = true;
        }
        if let Some(port) = &self.left_port {
            config.motors.left.port = port.clone();
        }
        if let Some(port) = &self.right_port {
            config.motors.right.port = port.clone();
        }
        if let Some(device) = &self.joystick {
            config.joystick.device = device.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error ({}): {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    args.apply(&mut config);

    if let Err(e) = couch_drive_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
