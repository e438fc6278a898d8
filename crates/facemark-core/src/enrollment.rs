//! Enrollment: add one captured image to the gallery, then check it.

use crate::detection::{DetectionLoop, FrameReport};
use crate::extract::FaceExtractor;
use crate::frame::{CaptureError, Frame, FrameSource};
use crate::gallery::{GalleryError, MergeReport};
use crate::ledger::AttendanceLedger;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("frame source has no more frames")]
    NoFrame,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentReport {
    pub identity: String,
    pub merge: MergeReport,
    /// Whether the post-merge pass over the same frame recognised `identity`.
    pub recognized: bool,
    pub frame: FrameReport,
}

impl<S, E, L> DetectionLoop<S, E, L>
where
    S: FrameSource,
    E: FaceExtractor,
    L: AttendanceLedger,
{
    /// Merge `frame` into the gallery as `identity`, then run the frame
    /// through the normal detection pass against the merged gallery.
    ///
    /// An identity already in the gallery is not re-extracted; the check
    /// pass still runs.
    pub fn enroll(
        &mut self,
        identity: &str,
        frame: &Frame,
    ) -> Result<EnrollmentReport, GalleryError> {
        let merge = self
            .gallery
            .merge(&self.extractor, &[(identity.to_string(), &frame.image)])?;

        let report = self.process_frame(frame);
        let recognized = report
            .accepted()
            .any(|f| f.result.identity.as_deref() == Some(identity));

        if recognized {
            tracing::info!(identity, "enrollment verified");
        } else {
            tracing::warn!(
                identity,
                faces = report.faces.len(),
                "enrolled face not recognised in check pass"
            );
        }

        Ok(EnrollmentReport {
            identity: identity.to_string(),
            merge,
            recognized,
            frame: report,
        })
    }

    /// Pull the next frame from the source without running detection on it.
    pub fn capture_frame(&mut self) -> Result<Frame, EnrollError> {
        self.source.next_frame()?.ok_or(EnrollError::NoFrame)
    }

    /// Capture the next frame from the source and enroll it.
    pub fn enroll_next(&mut self, identity: &str) -> Result<EnrollmentReport, EnrollError> {
        let frame = self.capture_frame()?;
        Ok(self.enroll(identity, &frame)?)
    }
}
