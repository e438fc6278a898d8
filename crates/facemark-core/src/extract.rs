//! Face extraction capability.
//!
//! The embedding model itself lives outside this crate; callers inject an
//! implementation of [`FaceExtractor`].

use crate::types::{BoundingBox, DetectedFace, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("extractor failed: {0}")]
    Failed(String),
    #[error("extractor output invalid: {0}")]
    InvalidOutput(String),
}

/// Finds faces in an image and produces one embedding per face.
pub trait FaceExtractor {
    /// Detect faces. Regions and embeddings are index-aligned by construction.
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError>;

    fn extract_embeddings(&self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        let faces = self.detect(image)?;
        Ok(faces.into_iter().map(|f| f.embedding).collect())
    }

    fn detect_face_regions(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        Ok(self.detect(image)?.into_iter().map(|f| f.region).collect())
    }
}

impl<T: FaceExtractor + ?Sized> FaceExtractor for &T {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        (**self).detect(image)
    }
}

impl<T: FaceExtractor + ?Sized> FaceExtractor for Box<T> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        (**self).detect(image)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Test extractor keyed by the top-left pixel's red channel.
    ///
    /// Each key maps to the faces reported for any image whose pixel (0, 0)
    /// has that red value. Unknown keys yield no faces.
    #[derive(Default)]
    pub struct FakeExtractor {
        faces: HashMap<u8, Vec<DetectedFace>>,
        calls: Cell<usize>,
    }

    impl FakeExtractor {
        pub fn with_face(mut self, key: u8, region: BoundingBox, embedding: Vec<f32>) -> Self {
            self.faces.entry(key).or_default().push(DetectedFace {
                region,
                embedding: Embedding::new(embedding),
            });
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.get()
        }
    }

    impl FaceExtractor for FakeExtractor {
        fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
            self.calls.set(self.calls.get() + 1);
            if image.width() == 0 || image.height() == 0 {
                return Err(ExtractError::MalformedImage("empty image".into()));
            }
            let key = image.get_pixel(0, 0)[0];
            Ok(self.faces.get(&key).cloned().unwrap_or_default())
        }
    }

    /// Solid image whose top-left red channel is `key`.
    pub fn keyed_image(key: u8, width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([key, 0, 0]))
    }

    pub fn region(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
        }
    }
}
