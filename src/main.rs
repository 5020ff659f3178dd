use loopdeck::cli::Args;
use loopdeck::config::{self, CONFIG_FILE, PlayerConfig};
use loopdeck::core::display::{DisplayDriver, DisplayPort};
use loopdeck::core::drivers::{FramebufferDisplay, NullDisplay};
use loopdeck::core::frame_source::DiskLoader;
use loopdeck::core::player::PlaybackEngine;
use loopdeck::core::playlist::JsonPlaylistStore;
use loopdeck::core::runner::EngineHandle;
use loopdeck::core::telemetry::SystemMemory;
use loopdeck::shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between status lines in the log
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// How often the main thread checks for termination
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

fn init_logging(args: &Args, path_config: &config::PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file("loopdeck.log", path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!(
            "Logging to file: {} (level: {:?})",
            log_path.display(),
            log_level
        );
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    info!("loopdeck {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let config_path = config::config_file(CONFIG_FILE, &path_config);
    let mut player_config = PlayerConfig::load(&config_path)?;
    args.apply(&mut player_config);
    let player_config = player_config.sanitized();

    if args.write_default_config {
        player_config.save(&config_path)?;
        println!("Config written to {}", config_path.display());
        return Ok(());
    }

    let data_dir = config::data_dir(&path_config);
    let index_path = player_config.index_file_in(&data_dir);
    let media_dir = player_config.media_dir_in(&data_dir);
    info!("Config path: {}", config_path.display());
    info!("Media dir:   {}", media_dir.display());

    // The one startup failure that stops the process
    let store = Arc::new(
        JsonPlaylistStore::open(&index_path)
            .with_context(|| format!("Media index unavailable: {}", index_path.display()))?,
    );
    info!("Media index: {}", store.path().display());
    let loader = Arc::new(DiskLoader::new(media_dir, player_config.frame_layout()));
    let telemetry = Arc::new(SystemMemory::new(player_config.memory_thresholds()));

    let (width, height) = (player_config.width, player_config.height);
    let driver: Box<dyn DisplayDriver> = match &player_config.framebuffer {
        Some(device) => Box::new(FramebufferDisplay::new(device, width, height)),
        None => {
            info!("No framebuffer configured, running headless");
            Box::new(NullDisplay::new())
        }
    };
    let port = DisplayPort::new(driver, player_config.recovery_policy(), width, height);

    let engine = Arc::new(PlaybackEngine::new(
        player_config.engine_settings(),
        port,
        store,
        loader,
        telemetry,
    ));
    if let Err(e) = shutdown::install() {
        warn!("Signal handlers not installed, stop with SIGKILL only: {}", e);
    }
    let mut handle = EngineHandle::spawn(engine).context("Failed to start playback thread")?;

    let mut last_status = Instant::now();
    while !handle.is_finished() {
        if shutdown::requested() {
            info!("Termination requested, stopping playback");
            break;
        }
        std::thread::sleep(SHUTDOWN_POLL);
        if last_status.elapsed() >= STATUS_LOG_INTERVAL {
            last_status = Instant::now();
            let status = handle.engine().status();
            match serde_json::to_string(&status) {
                Ok(json) => info!("Status: {}", json),
                Err(e) => debug!("Status not serializable: {}", e),
            }
        }
    }
    handle.stop();
    info!("loopdeck stopped");
    Ok(())
}
