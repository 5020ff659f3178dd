//! Concrete display drivers
//!
//! - `FramebufferDisplay`: Linux fbdev (`/dev/fbN`), the usual path for
//!   SPI panels driven by fbtft or a DRM fbdev emulation layer.
//! - `NullDisplay`: accepts and drops every frame. Dry runs and CI.

use log::{debug, info, trace};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::display::DisplayDriver;
use super::error::DisplayError;

/// Discards frames. Counts them for diagnostics.
#[derive(Debug, Default)]
pub struct NullDisplay {
    initialized: bool,
    frames_written: u64,
}

impl NullDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl DisplayDriver for NullDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        self.initialized = true;
        Ok(())
    }

    fn write_frame(&mut self, _frame: &[u8]) -> Result<(), DisplayError> {
        if !self.initialized {
            return Err(DisplayError::NotInitialized);
        }
        self.frames_written += 1;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), DisplayError> {
        self.initialized = false;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Linux framebuffer device writer.
///
/// `init()` opens the device and, when sysfs exposes it, checks that the
/// virtual resolution matches the frame geometry. `minimal_init()` only opens
/// the device.
#[derive(Debug)]
pub struct FramebufferDisplay {
    device: PathBuf,
    width: usize,
    height: usize,
    file: Option<File>,
}

impl FramebufferDisplay {
    pub fn new(device: impl Into<PathBuf>, width: usize, height: usize) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            file: None,
        }
    }

    fn open_device(&self) -> Result<File, DisplayError> {
        Ok(OpenOptions::new().write(true).open(&self.device)?)
    }

    /// `/sys/class/graphics/fbN/virtual_size` for `/dev/fbN`
    fn sysfs_size_path(&self) -> Option<PathBuf> {
        let name = self.device.file_name()?.to_str()?;
        name.starts_with("fb")
            .then(|| Path::new("/sys/class/graphics").join(name).join("virtual_size"))
    }

    fn check_geometry(&self) -> Result<(), DisplayError> {
        let Some(path) = self.sysfs_size_path() else {
            return Ok(());
        };
        let Ok(raw) = std::fs::read_to_string(&path) else {
            debug!("No sysfs geometry at {}, skipping check", path.display());
            return Ok(());
        };
        let dims: Vec<usize> = raw
            .trim()
            .split(',')
            .filter_map(|v| v.trim().parse().ok())
            .collect();
        match dims.as_slice() {
            [w, h] if *w == self.width && *h >= self.height => Ok(()),
            [w, h] => Err(DisplayError::Driver(format!(
                "{} is {}x{}, frames are {}x{}",
                self.device.display(),
                w,
                h,
                self.width,
                self.height
            ))),
            _ => Ok(()),
        }
    }
}

impl DisplayDriver for FramebufferDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        self.check_geometry()?;
        self.file = Some(self.open_device()?);
        info!("Framebuffer {} opened", self.device.display());
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DisplayError> {
        let file = self.file.as_mut().ok_or(DisplayError::NotInitialized)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(frame)?;
        file.flush()?;
        trace!("Framebuffer write {} bytes", frame.len());
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), DisplayError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DisplayError> {
        // fbdev has no reset line; dropping the handle forces a fresh open
        self.file = None;
        Ok(())
    }

    fn minimal_init(&mut self) -> Result<(), DisplayError> {
        self.file = Some(self.open_device()?);
        info!("Framebuffer {} opened (minimal init)", self.device.display());
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.file.is_some()
    }

    fn name(&self) -> &str {
        "framebuffer"
    }
}
