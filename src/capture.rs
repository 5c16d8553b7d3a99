//! Window capture over the `xcap` crate.
//!
//! This is the layer that talks to the OS compositor; everything above it
//! sees bitmaps and titles keyed by PID.

use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use xcap::Window;

#[derive(Debug)]
pub enum CaptureError {
    WindowEnumeration(String),
    WindowNotFound { pid: u32 },
    CaptureFailed(String),
    Encode(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::WindowEnumeration(e) => {
                write!(f, "failed to enumerate windows: {e}")
            }
            CaptureError::WindowNotFound { pid } => {
                write!(f, "no window found for pid {pid}")
            }
            CaptureError::CaptureFailed(e) => write!(f, "window capture failed: {e}"),
            CaptureError::Encode(e) => write!(f, "png encoding failed: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Find the target process's main window.
///
/// "Main" here is the first non-minimized window owned by the PID, falling
/// back to any window of the PID (a minimized app still has a capturable
/// surface on most platforms).
fn find_window(pid: u32) -> Result<Window, CaptureError> {
    let windows =
        Window::all().map_err(|e| CaptureError::WindowEnumeration(e.to_string()))?;

    let mut fallback = None;
    for window in windows {
        if window.pid().map(|p| p == pid).unwrap_or(false) {
            if !window.is_minimized().unwrap_or(false) {
                return Ok(window);
            }
            fallback.get_or_insert(window);
        }
    }
    fallback.ok_or(CaptureError::WindowNotFound { pid })
}

/// Capture the target's main window as a raw RGBA bitmap.
pub fn capture_window(pid: u32) -> Result<RgbaImage, CaptureError> {
    let window = find_window(pid)?;
    window
        .capture_image()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
}

/// Current title of the target's main window, if it has one.
pub fn window_title(pid: u32) -> Option<String> {
    let window = find_window(pid).ok()?;
    window.title().ok().filter(|t| !t.is_empty())
}

/// Encode a capture as lossless PNG for upload.
pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// What the monitor loop sees of the target each tick: the observed label
/// (open-document name) and an encoded capture of the main window.
pub trait WindowObserver: Send {
    /// Current observed label; empty when no window or title is available.
    fn observed_label(&mut self, target: &crate::procs::ProcessHandle) -> String;

    /// Capture the target's main window, PNG-encoded.
    fn capture(
        &mut self,
        target: &crate::procs::ProcessHandle,
    ) -> Result<Vec<u8>, CaptureError>;
}

/// Live observer over xcap.
pub struct XcapObserver {
    label_pattern: regex::Regex,
}

impl XcapObserver {
    pub fn new(label_pattern: regex::Regex) -> Self {
        Self { label_pattern }
    }
}

impl WindowObserver for XcapObserver {
    fn observed_label(&mut self, target: &crate::procs::ProcessHandle) -> String {
        window_title(target.pid)
            .map(|title| crate::presence::document_label(&title, &self.label_pattern))
            .unwrap_or_default()
    }

    fn capture(
        &mut self,
        target: &crate::procs::ProcessHandle,
    ) -> Result<Vec<u8>, CaptureError> {
        let image = capture_window(target.pid)?;
        encode_png(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png_produces_png_magic() {
        let image = RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
        let bytes = encode_png(image).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_encode_png_roundtrips_dimensions() {
        let image = RgbaImage::from_pixel(7, 3, image::Rgba([0, 128, 255, 255]));
        let bytes = encode_png(image).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 7);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn test_capture_nonexistent_pid_errors() {
        // PID u32::MAX never owns a window; either enumeration fails in a
        // headless environment or the lookup comes back empty. Both are
        // errors, never a panic.
        assert!(capture_window(u32::MAX).is_err());
    }
}
