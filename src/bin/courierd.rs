use std::path::PathBuf;

use clap::Parser;
use courier::logging;
use courier::{Config, Server};

#[derive(Parser)]
#[command(name = "courierd")]
#[command(about = "Courier instant-messaging server")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable logging entirely
    #[arg(short = 'l', long = "no-log")]
    no_log: bool,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the trigger mode (0-3, listener/connection LT or ET)
    #[arg(long)]
    trig_mode: Option<u8>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(trig_mode) = cli.trig_mode {
        config.trig_mode = trig_mode;
    }
    if cli.no_log {
        config.log.enabled = false;
    }

    let _log_guard = if config.log.enabled {
        Some(logging::init(config.log_settings())?)
    } else {
        None
    };

    let mut server = Server::new(config)?;
    let stop = server.stop_handle();
    ctrlc::set_handler(move || stop.request_stop())?;

    server.run()
}
