//! Embedding gallery: the in-memory identity list and its durable snapshot.
//!
//! The snapshot is a single JSON file holding two index-aligned lists,
//! `embeddings` and `identities`. It is always replaced whole (temp file in
//! the same directory, then rename), so readers never see a partial write.
//!
//! In memory the gallery is published through [`GalleryHandle`]: readers take
//! an `Arc<Gallery>` and keep scanning it while a merge builds the next one;
//! the merged gallery replaces the old one in a single swap.

use crate::extract::FaceExtractor;
use crate::types::{Embedding, GalleryEntry};
use arc_swap::ArcSwap;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to write gallery snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode gallery snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("gallery writer lock poisoned")]
    Poisoned,
}

/// Ordered list of known identities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    fn to_snapshot(&self) -> GallerySnapshot {
        GallerySnapshot {
            embeddings: self.entries.iter().map(|e| e.embedding.clone()).collect(),
            identities: self.entries.iter().map(|e| e.identity.clone()).collect(),
        }
    }
}

/// On-disk layout: two parallel lists.
#[derive(Debug, Serialize, Deserialize)]
struct GallerySnapshot {
    embeddings: Vec<Embedding>,
    identities: Vec<String>,
}

impl GallerySnapshot {
    fn into_gallery(self) -> Option<Gallery> {
        if self.embeddings.len() != self.identities.len() {
            return None;
        }
        let entries = self
            .identities
            .into_iter()
            .zip(self.embeddings)
            .map(|(identity, embedding)| GalleryEntry {
                identity,
                embedding,
            })
            .collect();
        Some(Gallery { entries })
    }
}

/// Durable location of the gallery snapshot.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. Missing, unreadable or corrupt snapshots yield an
    /// empty gallery; this never fails.
    pub fn load(&self) -> Gallery {
        self.read().unwrap_or_default()
    }

    /// Read the snapshot, or `None` when there is no usable one.
    fn read(&self) -> Option<Gallery> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery snapshot");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "gallery snapshot unreadable"
                );
                return None;
            }
        };

        let snapshot: GallerySnapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "gallery snapshot corrupt");
                return None;
            }
        };

        let (embeddings, identities) = (snapshot.embeddings.len(), snapshot.identities.len());
        match snapshot.into_gallery() {
            Some(gallery) => {
                tracing::info!(
                    path = %self.path.display(),
                    entries = gallery.len(),
                    "gallery loaded"
                );
                Some(gallery)
            }
            None => {
                tracing::warn!(
                    path = %self.path.display(),
                    embeddings,
                    identities,
                    "gallery snapshot lists are misaligned"
                );
                None
            }
        }
    }

    /// Modification time of the snapshot file, if it exists.
    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Replace the snapshot with `gallery` in one atomic rename.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let bytes = serde_json::to_vec(&gallery.to_snapshot())?;
        let write_err = |source: std::io::Error| GalleryError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(&bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            entries = gallery.len(),
            "gallery snapshot written"
        );
        Ok(())
    }
}

/// Why a merge candidate was not added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeFailure {
    pub identity: String,
    pub reason: String,
}

/// Outcome of [`GalleryHandle::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub skipped_known: Vec<String>,
    pub failed: Vec<MergeFailure>,
}

/// Single-writer, many-reader owner of the gallery.
///
/// Other processes may write the same snapshot file. Every merge starts from
/// what is on disk, and [`refresh`](GalleryHandle::refresh) picks up outside
/// writes between merges.
pub struct GalleryHandle {
    current: ArcSwap<Gallery>,
    writer: Mutex<Writer>,
}

struct Writer {
    store: GalleryStore,
    /// Snapshot mtime as of the last read or write through this handle.
    seen: Option<SystemTime>,
}

impl GalleryHandle {
    /// Load the snapshot from `store` and take ownership of it.
    pub fn open(store: GalleryStore) -> Self {
        let gallery = store.load();
        Self::with_gallery(store, gallery)
    }

    pub fn with_gallery(store: GalleryStore, gallery: Gallery) -> Self {
        let seen = store.modified();
        Self {
            current: ArcSwap::from_pointee(gallery),
            writer: Mutex::new(Writer { store, seen }),
        }
    }

    /// The gallery as of now. Unaffected by merges that complete later.
    pub fn snapshot(&self) -> Arc<Gallery> {
        self.current.load_full()
    }

    /// Reload the snapshot if its file changed since this handle last read or
    /// wrote it. Returns whether a different gallery was published.
    pub fn refresh(&self) -> Result<bool, GalleryError> {
        let mut writer = self.lock()?;
        let modified = writer.store.modified();
        if modified.is_none() || modified == writer.seen {
            return Ok(false);
        }
        writer.seen = modified;
        let before = self.current.load_full();
        let after = self.sync_from_disk(&writer);
        Ok(!Arc::ptr_eq(&before, &after))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Writer>, GalleryError> {
        self.writer.lock().map_err(|_| GalleryError::Poisoned)
    }

    /// Publish the on-disk gallery if it differs from the current one.
    ///
    /// A missing or unusable snapshot keeps the in-memory gallery.
    fn sync_from_disk(&self, writer: &Writer) -> Arc<Gallery> {
        let current = self.current.load_full();
        match writer.store.read() {
            Some(disk) if disk != *current => {
                tracing::info!(
                    before = current.len(),
                    after = disk.len(),
                    "gallery snapshot changed on disk; reloaded"
                );
                let disk = Arc::new(disk);
                self.current.store(disk.clone());
                disk
            }
            _ => current,
        }
    }

    /// Add embeddings for identities not yet in the gallery.
    ///
    /// The base is re-read from the snapshot file first, so entries written
    /// by another handle are kept. Known identities are skipped without
    /// calling the extractor. Images with no face, or that the extractor
    /// rejects, are reported in [`MergeReport::failed`]. When anything was
    /// added the snapshot is rewritten first and the new gallery is
    /// published only if that write succeeded.
    pub fn merge<E: FaceExtractor + ?Sized>(
        &self,
        extractor: &E,
        candidates: &[(String, &RgbImage)],
    ) -> Result<MergeReport, GalleryError> {
        let mut writer = self.lock()?;
        let base = self.sync_from_disk(&writer);

        let mut known: HashSet<&str> = base.entries.iter().map(|e| e.identity.as_str()).collect();
        let mut added_entries = Vec::new();
        let mut report = MergeReport::default();

        for (identity, image) in candidates {
            if known.contains(identity.as_str()) {
                tracing::debug!(identity = %identity, "already enrolled; skipping extraction");
                report.skipped_known.push(identity.clone());
                continue;
            }

            let embedding = match extractor.extract_embeddings(image) {
                Ok(embeddings) => embeddings.into_iter().next(),
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "extraction failed; skipping");
                    report.failed.push(MergeFailure {
                        identity: identity.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(embedding) = embedding else {
                tracing::warn!(identity = %identity, "no face found in enrollment image; skipping");
                report.failed.push(MergeFailure {
                    identity: identity.clone(),
                    reason: "no face found".into(),
                });
                continue;
            };

            known.insert(identity.as_str());
            report.added.push(identity.clone());
            added_entries.push(GalleryEntry {
                identity: identity.clone(),
                embedding,
            });
        }

        if added_entries.is_empty() {
            return Ok(report);
        }

        let mut next = Gallery::clone(&base);
        next.entries.extend(added_entries);
        writer.store.save(&next)?;
        writer.seen = writer.store.modified();
        self.current.store(Arc::new(next));

        tracing::info!(
            added = report.added.len(),
            skipped = report.skipped_known.len(),
            failed = report.failed.len(),
            "gallery merged"
        );
        Ok(report)
    }
}
