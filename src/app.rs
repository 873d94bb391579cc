use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use log::{error, info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::device::btle::BtleTransport;
use crate::device::decoder::BookooDecoder;
use crate::device::transport::Transport;
use crate::device::Scale;
use crate::entities::{parse_command, render};
use crate::error::{AppRunError, ConfigError, SetupError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Bridges a Bookoo bluetooth scale: prints its state as JSON lines and reads commands \
    (tare, start, stop, reset_timer, tare_and_start, beep_level <0-5>, auto_off <1-30>, flow_smoothing <on|off>) from stdin", long_about = None)]
pub struct Args {
    /// Path to the JSON config file (defaults to the per-user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bluetooth address (or advertised name) of the scale, overrides the config file
    #[arg(long)]
    pub address: Option<String>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info }
    }
}

fn print_events_task<T: Transport>(cancel: CancellationToken, scale: Arc<Scale<T>>) -> JoinHandle<()> {
    let mut events = scale.subscribe();

    spawn(async move {
        let mut previous: Option<Value> = None;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.recv() => {
                    match event {
                        Err(RecvError::Closed) => break 'mainloop,
                        Err(RecvError::Lagged(skipped)) => warn!("Skipped {} device events", skipped),
                        Ok(_) => {},
                    }

                    let current = Value::Object(render(&scale.snapshot()));
                    if previous.as_ref() != Some(&current) {
                        println!("{}", current);
                        previous = Some(current);
                    }
                }
            }
        }
    })
}

async fn handle_line<T: Transport>(scale: &Scale<T>, line: &str) {
    let mut words = line.split_whitespace();
    let Some(key) = words.next() else {
        return;
    };

    let command = match parse_command(key, words.next()) {
        Ok(command) => command,
        Err(err) => {
            warn!("{}", err);
            return;
        },
    };

    match scale.execute(command).await {
        Ok(()) => info!("Sent {}", command),
        Err(err) => error!("Failed to {}: {}", command, err),
    }
}

async fn run_bridge(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::open_sync(args.config)?;
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Default::default()
        },
        Err(err) => return Err(err.into()),
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if config.address.is_empty() {
        error!("Set \"address\" in {} or pass --address", config_io.path().to_string_lossy());
        return Err(ConfigError::MissingAddress.into());
    }

    let transport = BtleTransport::new().await.map_err(SetupError::from)?;
    let scale = Arc::new(Scale::setup(config, transport, BookooDecoder)?);

    let cancel = CancellationToken::new();
    let printer = print_events_task(cancel.clone(), scale.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!("Failed to listen for ctrl-c: {}", err);
                }
                break;
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&*scale, &line).await,
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("Failed to read stdin: {}", err);
                    stdin_open = false;
                },
            },
        }
    }

    info!("Stopping");
    scale.shutdown().await;
    cancel.cancel();
    if let Err(err) = printer.await {
        warn!("Event printer failed: {:?}", err);
    }

    Ok(())
}

pub fn run_application(args: Args) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run_bridge(args));
    // a pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
