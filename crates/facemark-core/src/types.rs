use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle around a detected face, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Map a box from a resized image back onto the image it was resized from.
    ///
    /// `scale_x` / `scale_y` are `original / resized` per axis.
    pub fn rescaled(&self, scale_x: f32, scale_y: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * scale_x,
            y: self.y * scale_y,
            width: self.width * scale_x,
            height: self.height * scale_y,
        }
    }
}

/// Face embedding vector (typically 128-dimensional). Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance, or `None` when the dimensionalities differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }

    /// Little-endian `f32` byte encoding, used for the employee encoding column.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` on a ragged length.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

/// A known identity and its enrolled embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity: String,
    pub embedding: Embedding,
}

/// One face found by the extraction capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Accepted identity; `None` when nothing cleared the threshold.
    pub identity: Option<String>,
    /// Distance to the nearest gallery entry. `None` only when there was no candidate.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn no_candidate() -> Self {
        Self {
            identity: None,
            distance: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), Some(5.0));
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn test_le_bytes_ragged_length() {
        assert!(Embedding::from_le_bytes(&[0, 0, 128]).is_none());
        let e = Embedding::from_le_bytes(&1.5f32.to_le_bytes()).unwrap();
        assert_eq!(e.values(), &[1.5]);
    }

    #[test]
    fn test_rescaled_box() {
        let b = BoundingBox {
            x: 10.0,
            y: 5.0,
            width: 20.0,
            height: 8.0,
        };
        let full = b.rescaled(4.0, 4.0);
        assert_eq!(
            full,
            BoundingBox {
                x: 40.0,
                y: 20.0,
                width: 80.0,
                height: 32.0,
            }
        );
    }
}
