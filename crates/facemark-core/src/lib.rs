//! facemark-core — identity matching and attendance pipeline.
//!
//! Holds the embedding gallery, the nearest-neighbour matcher, the detection
//! loop and enrollment. Face extraction, frame capture and durable
//! attendance storage are injected through [`FaceExtractor`],
//! [`FrameSource`] and [`AttendanceLedger`].

pub mod detection;
pub mod enrollment;
pub mod extract;
pub mod frame;
pub mod gallery;
pub mod labels;
pub mod ledger;
pub mod matcher;
pub mod types;

pub use detection::{
    annotate, DetectionLoop, FaceOutcome, FrameReport, LoopConfig, LoopSummary, Step,
};
pub use enrollment::{EnrollError, EnrollmentReport};
pub use extract::{ExtractError, FaceExtractor};
pub use frame::{CaptureError, Frame, FrameSource};
pub use gallery::{Gallery, GalleryError, GalleryHandle, GalleryStore, MergeFailure, MergeReport};
pub use labels::{display_name, label_base, next_label};
pub use ledger::{AttendanceLedger, LedgerError, MarkOutcome, MarkStatus};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use types::{BoundingBox, DetectedFace, Embedding, GalleryEntry, MatchResult};
