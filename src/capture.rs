//! Screen capture module
//! Uses `xcap` for cross-platform screenshots of the primary display.
//! The full frame is handed to the board locator; no fixed crop bounds.
//! Debug: set `DEBUG_CAPTURE=1` to also save the frame to `screenshots/debug_capture.png`.
//! Permissions note: On macOS, grant "Screen & System Audio Recording" permission to the terminal.

use anyhow::{Context, Result, bail};
use image::{DynamicImage, GenericImageView};
use log::debug;
use std::env;
use std::fs;
use std::time::Instant;
use xcap::Monitor;

/// Captures the primary monitor as a screenshot.
pub fn capture_screenshot() -> Result<DynamicImage> {
    let start = Instant::now();

    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let primary_monitor = monitors.first().cloned().context("No monitors found")?;

    let screenshot_raw = primary_monitor
        .capture_image()
        .context("Failed to capture image. On macOS, ensure the terminal has Screen Recording permission in System Settings > Privacy & Security > Screen & System Audio Recording")?;

    let screenshot = DynamicImage::ImageRgba8(screenshot_raw);
    let (w, h) = screenshot.dimensions();
    if w == 0 || h == 0 {
        bail!("Captured empty screenshot - possible permission issue or no display");
    }

    if env::var_os("DEBUG_CAPTURE").is_some() {
        fs::create_dir_all("screenshots").context("Failed to create screenshots/ debug directory")?;
        screenshot
            .save("screenshots/debug_capture.png")
            .context("Failed to save debug capture to screenshots/")?;
    }

    debug!("Captured {}x{} screenshot in {:?}", w, h, start.elapsed());
    Ok(screenshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires graphical display and screen recording permissions"]
    fn test_capture_dimensions() {
        let img = capture_screenshot().expect("capture_screenshot failed");
        let (w, h) = img.dimensions();
        assert!(w > 0 && h > 0, "captured image has invalid dimensions {}x{}", w, h);
    }
}
