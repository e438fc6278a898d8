//! Nearest-neighbour matching of a probe embedding against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};

/// Default maximum accepted distance, in the extractor's native units.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Picks the entry with the smallest distance (ties go to the lowest index),
/// then accepts it only if that distance is `<= threshold`. Being nearest is
/// not enough: a gallery of far-away entries never forces an accept.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let Some(dist) = probe.euclidean_distance(&entry.embedding) else {
                continue;
            };
            // Strict `<` keeps the first-inserted entry on ties; NaN never wins.
            let better = match best {
                None => !dist.is_nan(),
                Some((_, best_dist)) => dist < best_dist,
            };
            if better {
                best = Some((i, dist));
            }
        }

        match best {
            Some((idx, dist)) if dist <= threshold => MatchResult {
                identity: Some(gallery.entries()[idx].identity.clone()),
                distance: Some(dist),
            },
            Some((_, dist)) => MatchResult {
                identity: None,
                distance: Some(dist),
            },
            None => MatchResult::no_candidate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GalleryEntry;

    fn gallery(entries: &[(&str, Vec<f32>)]) -> Gallery {
        Gallery::from_entries(
            entries
                .iter()
                .map(|(id, v)| GalleryEntry {
                    identity: id.to_string(),
                    embedding: Embedding::new(v.clone()),
                })
                .collect(),
        )
    }

    #[test]
    fn test_accepts_nearest_within_threshold() {
        let g = gallery(&[("alice", vec![0.0, 0.0]), ("bob", vec![1.0, 1.0])]);
        let probe = Embedding::new(vec![0.3, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &g, 0.5);
        assert_eq!(result.identity.as_deref(), Some("alice"));
        assert!((result.distance.unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_nearest_beyond_threshold() {
        let g = gallery(&[
            ("far1", vec![5.0, 0.0]),
            ("far2", vec![0.0, 6.0]),
            ("far3", vec![-7.0, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &g, 0.5);
        assert!(!result.is_match());
        assert_eq!(result.distance, Some(5.0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let g = gallery(&[("alice", vec![0.5, 0.0])]);
        let at = EuclideanMatcher.compare(&Embedding::new(vec![0.0, 0.0]), &g, 0.5);
        assert_eq!(at.identity.as_deref(), Some("alice"));

        let g = gallery(&[("alice", vec![0.5001, 0.0])]);
        let beyond = EuclideanMatcher.compare(&Embedding::new(vec![0.0, 0.0]), &g, 0.5);
        assert!(!beyond.is_match());
    }

    #[test]
    fn test_tie_goes_to_first_inserted() {
        let g = gallery(&[
            ("first", vec![1.0, 0.0]),
            ("second", vec![-1.0, 0.0]),
            ("third", vec![0.0, 1.0]),
        ]);
        let result = EuclideanMatcher.compare(&Embedding::new(vec![0.0, 0.0]), &g, 1.0);
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_duplicate_identities_resolve_to_first_index() {
        let g = gallery(&[("carol", vec![0.2, 0.0]), ("carol", vec![0.1, 0.0])]);
        let result = EuclideanMatcher.compare(&Embedding::new(vec![0.0, 0.0]), &g, 0.5);
        assert_eq!(result.identity.as_deref(), Some("carol"));
        assert!((result.distance.unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let g = gallery(&[("a", vec![0.1, 0.2]), ("b", vec![0.3, 0.1])]);
        let probe = Embedding::new(vec![0.2, 0.2]);
        let first = EuclideanMatcher.compare(&probe, &g, 0.5);
        for _ in 0..10 {
            assert_eq!(EuclideanMatcher.compare(&probe, &g, 0.5), first);
        }
    }

    #[test]
    fn test_empty_gallery() {
        let result = EuclideanMatcher.compare(&Embedding::new(vec![1.0]), &Gallery::default(), 0.5);
        assert_eq!(result, MatchResult::no_candidate());
    }

    #[test]
    fn test_mismatched_dimension_is_not_a_candidate() {
        let g = gallery(&[("short", vec![0.0]), ("ok", vec![0.0, 0.4])]);
        let result = EuclideanMatcher.compare(&Embedding::new(vec![0.0, 0.0]), &g, 0.5);
        assert_eq!(result.identity.as_deref(), Some("ok"));
    }
}
