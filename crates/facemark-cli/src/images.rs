//! Enrollment image archive.
//!
//! Every enrollment frame is kept as `{name}_{n}.jpg`. The file stem is the
//! gallery label, so the directory can be re-fed into a gallery merge to
//! encode any image that is not yet enrolled.

use crate::source::is_frame_file;
use facemark_core::{next_label, Gallery};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagesError {
    #[error("invalid employee name {0:?}")]
    InvalidName(String),
    #[error("enrollment image directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write enrollment image {path}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
}

pub struct EnrollmentImages {
    dir: PathBuf,
}

impl EnrollmentImages {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(label, path)` for every image in the directory, sorted by label.
    /// A missing directory has no images.
    pub fn labelled_files(&self) -> Result<Vec<(String, PathBuf)>, ImagesError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ImagesError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files: Vec<(String, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_frame_file(p))
            .filter_map(|p| {
                let label = p.file_stem()?.to_str()?.to_string();
                Some((label, p))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Images whose label is not in `gallery` yet.
    pub fn pending(&self, gallery: &Gallery) -> Result<Vec<(String, PathBuf)>, ImagesError> {
        let mut files = self.labelled_files()?;
        files.retain(|(label, _)| !gallery.contains(label));
        Ok(files)
    }

    /// The label the next enrollment image of `name` will get.
    pub fn next_label(&self, name: &str) -> Result<String, ImagesError> {
        check_name(name)?;
        let files = self.labelled_files()?;
        let labels = files.iter().map(|(label, _)| label.as_str());
        Ok(next_label(name, labels))
    }

    /// Save `image` as the next enrollment image of `name`.
    pub fn archive(&self, name: &str, image: &RgbImage) -> Result<(String, PathBuf), ImagesError> {
        let label = self.next_label(name)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| ImagesError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("{label}.jpg"));
        image.save(&path).map_err(|source| ImagesError::Save {
            path: path.clone(),
            source,
        })?;
        tracing::info!(label = %label, path = %path.display(), "enrollment image saved");
        Ok((label, path))
    }
}

fn check_name(name: &str) -> Result<(), ImagesError> {
    if name.trim().is_empty() || name.contains(['/', '\\', '\0']) || name.starts_with('.') {
        return Err(ImagesError::InvalidName(name.to_string()));
    }
    Ok(())
}
