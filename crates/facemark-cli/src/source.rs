//! Frame sources backed by image files.

use chrono::Local;
use facemark_core::{CaptureError, Frame, FrameSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Consumes frames the capture device writes into a spool directory.
///
/// Files are taken in name order and deleted once read; files that do not
/// decode are dropped. While the directory
/// is empty the source polls; it reports end of stream only after `stop` is
/// raised.
pub struct SpoolSource {
    dir: PathBuf,
    poll: Duration,
    stop: Arc<AtomicBool>,
    sequence: u64,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>, poll: Duration, stop: Arc<AtomicBool>) -> Self {
        Self {
            dir: dir.into(),
            poll,
            stop,
            sequence: 0,
        }
    }

    fn oldest_pending(&self) -> Result<Option<PathBuf>, CaptureError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::DeviceNotFound(self.dir.display().to_string())
            } else {
                CaptureError::CaptureFailed(format!("{}: {e}", self.dir.display()))
            }
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_frame_file(p))
            .collect();
        frames.sort();
        Ok(frames.into_iter().next())
    }
}

pub(crate) fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.as_str()))
}

impl FrameSource for SpoolSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(None);
            }

            let Some(path) = self.oldest_pending()? else {
                std::thread::sleep(self.poll);
                continue;
            };

            let decoded = image::open(&path);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove consumed frame"
                );
            }
            // One bad file is a bad frame, not a failing device.
            let image = match decoded {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable frame"
                    );
                    continue;
                }
            };

            self.sequence += 1;
            tracing::debug!(seq = self.sequence, path = %path.display(), "frame read from spool");
            return Ok(Some(Frame {
                image,
                captured_at: Local::now().naive_local(),
                sequence: self.sequence,
            }));
        }
    }
}

/// Yields one frame, then end of stream.
pub struct SingleFrame(Option<Frame>);

impl SingleFrame {
    pub fn new(frame: Frame) -> Self {
        Self(Some(frame))
    }
}

impl FrameSource for SingleFrame {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        Ok(self.0.take())
    }
}

/// Read an image file as a frame stamped with the current time.
pub fn load_frame(path: &Path) -> Result<Frame, CaptureError> {
    let image = image::open(path)
        .map_err(|e| {
            CaptureError::CaptureFailed(format!("{}: {e}", path.display()))
        })?
        .to_rgb8();
    Ok(Frame {
        image,
        captured_at: Local::now().naive_local(),
        sequence: 0,
    })
}
