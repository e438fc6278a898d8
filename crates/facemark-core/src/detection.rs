//! Detection loop: frames → extraction → matching → ledger.
//!
//! Single-threaded and pull-based. Each frame is downsampled for extraction,
//! every face in it is matched and, if accepted, marked in the ledger. A
//! failure on one face or one frame never stops the loop; only a capture
//! device that keeps failing does.

use crate::extract::FaceExtractor;
use crate::frame::{self, CaptureError, Frame, FrameSource};
use crate::gallery::GalleryHandle;
use crate::labels;
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome, MarkStatus};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::types::{BoundingBox, MatchResult};
use image::{ImageFormat, Rgb, RgbImage};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;

const DEFAULT_DOWNSCALE: u32 = 4;
const DEFAULT_MAX_CAPTURE_FAILURES: usize = 5;
const ACCEPTED_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum accepted nearest-neighbour distance.
    pub threshold: f32,
    /// Integer shrink factor applied before extraction.
    pub downscale: u32,
    /// Consecutive capture failures tolerated before the loop gives up.
    pub max_capture_failures: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            downscale: DEFAULT_DOWNSCALE,
            max_capture_failures: DEFAULT_MAX_CAPTURE_FAILURES,
        }
    }
}

/// What happened to one face in a frame.
#[derive(Debug, Clone, Serialize)]
pub struct FaceOutcome {
    /// Face rectangle in full-frame coordinates.
    pub region: BoundingBox,
    pub result: MatchResult,
    /// Ledger outcome; `None` when the face was not accepted.
    pub mark: Option<MarkStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub faces: Vec<FaceOutcome>,
    /// Set when the extractor rejected the frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
}

impl FrameReport {
    pub fn accepted(&self) -> impl Iterator<Item = &FaceOutcome> {
        self.faces.iter().filter(|f| f.result.is_match())
    }
}

/// Result of a single [`DetectionLoop::step`].
pub enum Step {
    Processed {
        frame: Frame,
        report: FrameReport,
    },
    /// Capture failed but the failure budget is not yet spent.
    CaptureRetry,
    EndOfStream,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopSummary {
    pub frames: u64,
    pub faces: u64,
    pub marked: u64,
}

pub struct DetectionLoop<S, E, L> {
    pub(crate) source: S,
    pub(crate) extractor: E,
    pub(crate) ledger: L,
    pub(crate) gallery: Arc<GalleryHandle>,
    pub(crate) config: LoopConfig,
    consecutive_failures: usize,
}

impl<S, E, L> DetectionLoop<S, E, L>
where
    S: FrameSource,
    E: FaceExtractor,
    L: AttendanceLedger,
{
    pub fn new(
        source: S,
        extractor: E,
        ledger: L,
        gallery: Arc<GalleryHandle>,
        config: LoopConfig,
    ) -> Self {
        Self {
            source,
            extractor,
            ledger,
            gallery,
            config,
            consecutive_failures: 0,
        }
    }

    pub fn gallery(&self) -> &Arc<GalleryHandle> {
        &self.gallery
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Pull one frame and process it.
    pub fn step(&mut self) -> Result<Step, CaptureError> {
        match self.source.next_frame() {
            Ok(Some(frame)) => {
                self.consecutive_failures = 0;
                let report = self.process_frame(&frame);
                Ok(Step::Processed { frame, report })
            }
            Ok(None) => Ok(Step::EndOfStream),
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = self.consecutive_failures,
                    max = self.config.max_capture_failures,
                    "frame capture failed"
                );
                if self.consecutive_failures >= self.config.max_capture_failures {
                    return Err(CaptureError::Exhausted {
                        attempts: self.consecutive_failures,
                        last: e.to_string(),
                    });
                }
                Ok(Step::CaptureRetry)
            }
        }
    }

    /// Run until the source ends. Errors only on persistent capture failure.
    pub fn run(&mut self) -> Result<LoopSummary, CaptureError> {
        let mut summary = LoopSummary::default();
        loop {
            match self.step()? {
                Step::Processed { report, .. } => {
                    summary.frames += 1;
                    summary.faces += report.faces.len() as u64;
                    summary.marked += report
                        .faces
                        .iter()
                        .filter(|f| f.mark == Some(MarkStatus::Marked))
                        .count() as u64;
                }
                Step::CaptureRetry => {}
                Step::EndOfStream => {
                    tracing::info!(
                        frames = summary.frames,
                        marked = summary.marked,
                        "frame source ended"
                    );
                    return Ok(summary);
                }
            }
        }
    }

    /// Extract, match and mark every face in `frame`.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let mut report = FrameReport {
            sequence: frame.sequence,
            ..Default::default()
        };

        let small = frame::downsample(&frame.image, self.config.downscale);
        let faces = match self.extractor.detect(&small.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(
                    seq = frame.sequence,
                    error = %e,
                    "extraction failed; skipping frame"
                );
                report.extraction_error = Some(e.to_string());
                return report;
            }
        };
        tracing::debug!(seq = frame.sequence, faces = faces.len(), "frame extracted");

        let gallery = self.gallery.snapshot();
        let matcher = EuclideanMatcher;
        // Encoded lazily, once per frame; `Some(None)` records a failed encode.
        let mut snapshot: Option<Option<Vec<u8>>> = None;

        for face in faces {
            let region = small.to_full_frame(&face.region);
            let result = matcher.compare(&face.embedding, &gallery, self.config.threshold);

            let mark = match &result.identity {
                Some(identity) => {
                    let png = snapshot
                        .get_or_insert_with(|| encode_png(&frame.image))
                        .as_deref();
                    Some(self.mark(identity, png, frame))
                }
                None => None,
            };

            report.faces.push(FaceOutcome {
                region,
                result,
                mark,
            });
        }

        report
    }

    fn mark(&mut self, identity: &str, snapshot: Option<&[u8]>, frame: &Frame) -> MarkStatus {
        let Some(snapshot) = snapshot else {
            tracing::warn!(identity, "no snapshot to archive; attendance not recorded");
            return MarkStatus::StorageUnavailable;
        };
        let outcome = self.ledger.mark(identity, snapshot, frame.captured_at);
        match &outcome {
            Ok(MarkOutcome::Marked) => {
                tracing::info!(identity, at = %frame.captured_at, "attendance marked")
            }
            Ok(MarkOutcome::AlreadyMarked) => {
                tracing::debug!(identity, "attendance already marked today")
            }
            Err(e @ LedgerError::UnknownIdentity(_)) => {
                tracing::warn!(identity, error = %e, "matched identity has no employee record")
            }
            Err(e @ LedgerError::StorageUnavailable(_)) => {
                tracing::warn!(identity, error = %e, "attendance not recorded")
            }
        }
        MarkStatus::from(outcome)
    }
}

fn encode_png(image: &RgbImage) -> Option<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match image.write_to(&mut buf, ImageFormat::Png) {
        Ok(()) => Some(buf.into_inner()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode attendance snapshot");
            None
        }
    }
}

/// Copy of `frame` with accepted faces outlined and labelled with the
/// employee name.
pub fn annotate(frame: &Frame, report: &FrameReport) -> RgbImage {
    let mut image = frame.image.clone();
    for face in report.accepted() {
        frame::draw_box(&mut image, &face.region, ACCEPTED_BOX_COLOR, BOX_THICKNESS);

        let Some(identity) = face.result.identity.as_deref() else {
            continue;
        };
        let text_height = i64::from(frame::GLYPH_SIZE * LABEL_SCALE);
        let left = face.region.x.round() as i64;
        let top = face.region.y.round() as i64;
        // Above the box, or just inside it when there is no room.
        let y = if top - text_height - 2 >= 0 {
            top - text_height - 2
        } else {
            top + i64::from(BOX_THICKNESS) + 1
        };
        frame::draw_text(
            &mut image,
            left,
            y,
            labels::display_name(identity),
            ACCEPTED_BOX_COLOR,
            LABEL_SCALE,
        );
    }
    image
}
