//! Still photographs through the Raspberry Pi camera stack.
//!
//! Capture is delegated to the `rpicam-still` command line tool (or any
//! compatible replacement named in [`CameraConfig::command`]).

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture program
    pub command: String,
    /// Directory the photos are written to
    pub output_dir: PathBuf,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Rotation in degrees (the camera is mounted upside down)
    pub rotation: u16,
    /// Time for exposure and white balance to settle, in milliseconds
    pub warmup_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: "rpicam-still".to_string(),
            output_dir: PathBuf::from("/home/pi/HABSoftware/photos"),
            width: 1024,
            height: 768,
            rotation: 180,
            warmup_ms: 5000,
        }
    }
}

/// Photo capture front end.
pub struct Camera {
    config: CameraConfig,
}

impl Camera {
    /// Create a camera with the given settings.
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    /// Active settings.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Full path a photo named `file_name` is written to.
    pub fn photo_path(&self, file_name: &str) -> PathBuf {
        self.config.output_dir.join(file_name)
    }

    /// Arguments passed to the capture program.
    pub fn capture_args(&self, file_name: &str) -> Vec<String> {
        vec![
            "--nopreview".to_string(),
            "--timeout".to_string(),
            self.config.warmup_ms.to_string(),
            "--width".to_string(),
            self.config.width.to_string(),
            "--height".to_string(),
            self.config.height.to_string(),
            "--rotation".to_string(),
            self.config.rotation.to_string(),
            "--output".to_string(),
            self.photo_path(file_name).to_string_lossy().to_string(),
        ]
    }

    /// Take one photo and return where it was saved.
    pub async fn capture(&self, file_name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let args = self.capture_args(file_name);
        debug!("Running {} {}", self.config.command, args.join(" "));
        // An abandoned capture must not leave the camera busy.
        let output = Command::new(&self.config.command)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TelemetryError::camera_error(format!(
                    "Failed to run {}: {}",
                    self.config.command, e
                ))
            })?;

        if !output.status.success() {
            return Err(TelemetryError::camera_error(format!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path = self.photo_path(file_name);
        info!("Saved photo {}", path.display());
        Ok(path)
    }
}
