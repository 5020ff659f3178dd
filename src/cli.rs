use clap::Parser;
use std::path::PathBuf;

use crate::core::player::LoopMode;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Output: fbdev RGB565 / headless\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Looping frame player for small attached displays
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Media root holding one `<slug>/` directory per item
    #[arg(short = 'm', long = "media-dir", value_name = "DIR")]
    pub media_dir: Option<PathBuf>,

    /// Media index JSON (catalog, loop, active)
    #[arg(short = 'i', long = "index", value_name = "FILE")]
    pub index: Option<PathBuf>,

    /// Framebuffer device to drive, e.g. /dev/fb1
    #[arg(long = "fb", value_name = "DEVICE", conflicts_with = "headless")]
    pub framebuffer: Option<PathBuf>,

    /// Target frame rate (overrides config)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f32>,

    /// Loop mode: one | all
    #[arg(long = "loop-mode", value_name = "MODE")]
    pub loop_mode: Option<LoopMode>,

    /// Run without display output
    #[arg(long = "headless")]
    pub headless: bool,

    /// Enable debug logging to file (default: loopdeck.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the effective config to the config dir and exit
    #[arg(long = "write-default-config")]
    pub write_default_config: bool,
}

impl Args {
    /// Apply CLI overrides on top of file config
    pub fn apply(&self, config: &mut crate::config::PlayerConfig) {
        if let Some(dir) = &self.media_dir {
            config.media_dir = dir.clone();
        }
        if let Some(index) = &self.index {
            config.index_file = index.clone();
        }
        if let Some(fb) = &self.framebuffer {
            config.framebuffer = Some(fb.clone());
        }
        if self.headless {
            config.framebuffer = None;
        }
        if let Some(fps) = self.fps {
            config.frame_rate = fps;
        }
        if let Some(mode) = self.loop_mode {
            config.loop_mode = mode;
        }
    }
}
