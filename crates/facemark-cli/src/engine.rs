use crate::images::{EnrollmentImages, ImagesError};
use facemark_core::{
    annotate, AttendanceLedger, CaptureError, DetectionLoop, EnrollError, EnrollmentReport,
    FaceExtractor, FrameSource, GalleryError, GalleryHandle, LoopSummary, MarkStatus, Step,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("enrollment failed: {0}")]
    Enroll(#[from] EnrollError),
    #[error("gallery update failed: {0}")]
    Gallery(#[from] GalleryError),
    #[error("{0}")]
    Images(#[from] ImagesError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Counters reported by the `status` console command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub frames: u64,
    pub faces: u64,
    pub marked: u64,
    pub gallery_entries: usize,
}

/// Written by the engine thread, read by any handle.
#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    faces: AtomicU64,
    marked: AtomicU64,
}

impl Counters {
    fn summary(&self) -> LoopSummary {
        LoopSummary {
            frames: self.frames.load(Ordering::Relaxed),
            faces: self.faces.load(Ordering::Relaxed),
            marked: self.marked.load(Ordering::Relaxed),
        }
    }
}

/// Messages sent from the console to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        reply: oneshot::Sender<Result<EnrollmentReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    gallery: Arc<GalleryHandle>,
}

impl EngineHandle {
    /// Enroll employee `name` from the next captured frame.
    pub async fn enroll(&self, name: String) -> Result<EnrollmentReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn status(&self) -> EngineStatus {
        let summary = self.counters.summary();
        EngineStatus {
            frames: summary.frames,
            faces: summary.faces,
            marked: summary.marked,
            gallery_entries: self.gallery.snapshot().len(),
        }
    }

    /// Ask the engine to stop after the frame in progress.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Resolves once the engine thread has exited.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Capture a frame, archive it as the next enrollment image of `name` and
/// enroll it under that image's label.
pub fn enroll_and_archive<S, E, L>(
    detection: &mut DetectionLoop<S, E, L>,
    images: &EnrollmentImages,
    name: &str,
) -> Result<EnrollmentReport, EngineError>
where
    S: FrameSource,
    E: FaceExtractor,
    L: AttendanceLedger,
{
    // Validate the name before consuming a frame.
    images.next_label(name)?;
    let frame = detection.capture_frame()?;
    let (label, _) = images.archive(name, &frame.image)?;
    Ok(detection.enroll(&label, &frame)?)
}

type EngineThread = JoinHandle<Result<LoopSummary, CaptureError>>;

/// Spawn the detection loop on a dedicated OS thread.
///
/// Enrollment requests are served between frames, so they wait for the
/// next captured frame. `stop` must be the flag the frame
/// source watches so a blocked capture can return. Accepted faces are drawn
/// onto a copy of each frame written to `annotate_dir`, if set.
pub fn spawn_engine<S, E, L>(
    mut detection: DetectionLoop<S, E, L>,
    images: EnrollmentImages,
    stop: Arc<AtomicBool>,
    annotate_dir: Option<PathBuf>,
) -> Result<(EngineHandle, EngineThread), EngineError>
where
    S: FrameSource + Send + 'static,
    E: FaceExtractor + Send + 'static,
    L: AttendanceLedger + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let thread_stop = stop.clone();
    let counters = Arc::new(Counters::default());
    let thread_counters = counters.clone();
    let gallery = detection.gallery().clone();

    let worker = std::thread::Builder::new()
        .name("facemark-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = loop {
                while let Ok(req) = rx.try_recv() {
                    match req {
                        EngineRequest::Enroll { name, reply } => {
                            tracing::info!(name = %name, "enroll requested");
                            let result = enroll_and_archive(&mut detection, &images, &name);
                            let _ = reply.send(result);
                        }
                    }
                }

                if let Err(e) = detection.gallery().refresh() {
                    tracing::warn!(error = %e, "gallery refresh failed");
                }

                if thread_stop.load(Ordering::Relaxed) {
                    break Ok(thread_counters.summary());
                }

                match detection.step() {
                    Ok(Step::Processed { frame, report }) => {
                        let marked = report
                            .faces
                            .iter()
                            .filter(|f| f.mark == Some(MarkStatus::Marked))
                            .count() as u64;
                        thread_counters.frames.fetch_add(1, Ordering::Relaxed);
                        let faces = report.faces.len() as u64;
                        thread_counters.faces.fetch_add(faces, Ordering::Relaxed);
                        thread_counters.marked.fetch_add(marked, Ordering::Relaxed);

                        if let Some(dir) = &annotate_dir {
                            if report.accepted().next().is_some() {
                                let path = dir.join(format!("frame_{:08}.png", frame.sequence));
                                if let Err(e) = annotate(&frame, &report).save(&path) {
                                    tracing::warn!(
                                        path = %path.display(),
                                        error = %e,
                                        "failed to write annotated frame"
                                    );
                                }
                            }
                        }
                    }
                    Ok(Step::CaptureRetry) => std::thread::sleep(CAPTURE_RETRY_BACKOFF),
                    Ok(Step::EndOfStream) => break Ok(thread_counters.summary()),
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "capture device failed; stopping detection loop"
                        );
                        break Err(e);
                    }
                }
            };

            tracing::info!("engine thread exiting");
            result
        })
        .map_err(EngineError::Spawn)?;

    Ok((
        EngineHandle {
            tx,
            stop,
            counters,
            gallery,
        },
        worker,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SingleFrame, SpoolSource};
    use facemark_core::{
        BoundingBox, DetectedFace, Embedding, ExtractError, Frame, GalleryStore, LoopConfig,
    };
    use facemark_store::Store;
    use image::RgbImage;

    struct NoFaces;

    impl FaceExtractor for NoFaces {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_status_then_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        std::fs::create_dir_all(&spool).unwrap();
        RgbImage::new(8, 8).save(spool.join("0001.png")).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let gallery_path = dir.path().join("g.json");
        let gallery = Arc::new(GalleryHandle::open(GalleryStore::new(gallery_path)));
        let detection = DetectionLoop::new(
            SpoolSource::new(&spool, Duration::from_millis(5), stop.clone()),
            NoFaces,
            Store::open_in_memory().unwrap(),
            gallery,
            LoopConfig::default(),
        );

        let images = EnrollmentImages::new(dir.path().join("employees"));
        let (engine, worker) = spawn_engine(detection, images, stop, None).unwrap();
        while engine.status().frames == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = engine.status();
        assert_eq!(status.frames, 1);
        assert_eq!(status.gallery_entries, 0);

        engine.shutdown();
        engine.closed().await;
        let summary = worker.join().unwrap().unwrap();
        assert_eq!(summary.frames, 1);
    }

    struct OneFace;

    impl FaceExtractor for OneFace {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
            Ok(vec![DetectedFace {
                region: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 2.0,
                    height: 2.0,
                },
                embedding: Embedding::new(vec![0.1, 0.2]),
            }])
        }
    }

    #[test]
    fn test_enroll_and_archive_labels_by_counter() {
        let dir = tempfile::tempdir().unwrap();
        let images = EnrollmentImages::new(dir.path().join("employees"));
        std::fs::create_dir_all(images.dir()).unwrap();
        RgbImage::new(2, 2).save(images.dir().join("alice_1.jpg")).unwrap();

        let snapshot = GalleryStore::new(dir.path().join("g.json"));
        let gallery = Arc::new(GalleryHandle::open(snapshot));
        let store = Store::open_in_memory().unwrap();
        store.add_employee("alice", None).unwrap();
        let frame = Frame {
            image: RgbImage::new(8, 8),
            captured_at: chrono::Local::now().naive_local(),
            sequence: 1,
        };
        let mut detection = DetectionLoop::new(
            SingleFrame::new(frame),
            OneFace,
            store,
            gallery.clone(),
            LoopConfig::default(),
        );

        let report = enroll_and_archive(&mut detection, &images, "alice").unwrap();
        assert_eq!(report.identity, "alice_2");
        assert_eq!(report.merge.added, vec!["alice_2".to_string()]);
        assert!(report.recognized);
        assert!(images.dir().join("alice_2.jpg").exists());
        assert!(gallery.snapshot().contains("alice_2"));
    }

    #[test]
    fn test_enroll_and_archive_rejects_bad_name_without_capturing() {
        let dir = tempfile::tempdir().unwrap();
        let images = EnrollmentImages::new(dir.path().join("employees"));
        let snapshot = GalleryStore::new(dir.path().join("g.json"));
        let gallery = Arc::new(GalleryHandle::open(snapshot));
        let frame = Frame {
            image: RgbImage::new(8, 8),
            captured_at: chrono::Local::now().naive_local(),
            sequence: 1,
        };
        let mut detection = DetectionLoop::new(
            SingleFrame::new(frame),
            OneFace,
            Store::open_in_memory().unwrap(),
            gallery,
            LoopConfig::default(),
        );

        let err = enroll_and_archive(&mut detection, &images, "../alice").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Images(ImagesError::InvalidName(_))
        ));
        assert!(detection.capture_frame().is_ok());
    }
}
