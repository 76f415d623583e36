//! Nearest-centroid identification.

use crate::gallery::Gallery;
use crate::types::{Embedding, Identification, Identity};

/// Default maximum Euclidean distance for a known-identity match.
pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Strategy for identifying a query embedding against the gallery.
pub trait Matcher {
    fn identify(&self, query: &Embedding, gallery: &Gallery) -> Identification;
}

/// Euclidean nearest-centroid matcher.
///
/// Scans every identity in gallery order. Ties on the minimum distance go to
/// the identity encountered first. The nearest label is reported only when
/// its distance is strictly below `threshold`; otherwise the face is unknown
/// but the nearest distance is still reported.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn identify(&self, query: &Embedding, gallery: &Gallery) -> Identification {
        let mut best_dist = f32::INFINITY;
        let mut best: Option<&Identity> = None;

        for identity in gallery.iter() {
            let dist = query.euclidean_distance(&identity.centroid);
            if dist < best_dist {
                best_dist = dist;
                best = Some(identity);
            }
        }

        match best {
            Some(identity) if best_dist < self.threshold => Identification {
                label: Some(identity.label.clone()),
                distance: best_dist,
            },
            _ => Identification::unknown(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(label: &str, values: Vec<f32>) -> Identity {
        Identity {
            label: label.into(),
            centroid: Embedding::new(values),
        }
    }

    fn gallery(entries: Vec<Identity>) -> Gallery {
        Gallery::from_identities(entries).unwrap()
    }

    #[test]
    fn test_empty_gallery_is_unknown_at_infinity() {
        let result = EuclideanMatcher::default().identify(&Embedding::new(vec![0.1, 0.2]), &Gallery::default());
        assert_eq!(result.label, None);
        assert!(result.distance.is_infinite() && result.distance > 0.0);
    }

    #[test]
    fn test_exact_centroid_matches_at_zero() {
        let g = gallery(vec![
            identity("alice", vec![0.5, 0.5, 0.0]),
            identity("bob", vec![0.0, 0.5, 0.5]),
        ]);
        let result = EuclideanMatcher::default().identify(&Embedding::new(vec![0.0, 0.5, 0.5]), &g);
        assert_eq!(result.label.as_deref(), Some("bob"));
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_scans_whole_gallery() {
        let g = gallery(vec![
            identity("decoy1", vec![0.0, 1.0, 0.0]),
            identity("decoy2", vec![0.0, 0.0, 1.0]),
            identity("match", vec![1.0, 0.0, 0.0]),
        ]);
        let result = EuclideanMatcher::default().identify(&Embedding::new(vec![0.9, 0.0, 0.0]), &g);
        assert_eq!(result.label.as_deref(), Some("match"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_beyond_threshold_reports_distance_without_label() {
        let g = gallery(vec![identity("alice", vec![0.0, 0.0])]);
        let result = EuclideanMatcher::default().identify(&Embedding::new(vec![1.5, 0.0]), &g);
        assert_eq!(result.display_label(), "Unknown");
        assert!((result.distance - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_strict() {
        let g = gallery(vec![identity("alice", vec![0.0])]);
        let result = EuclideanMatcher::new(0.5).identify(&Embedding::new(vec![0.5]), &g);
        assert!(!result.is_known());
        assert_eq!(result.distance, 0.5);
    }

    #[test]
    fn test_tie_goes_to_first_in_gallery_order() {
        let g = gallery(vec![
            identity("zed", vec![1.0, 0.0]),
            identity("amy", vec![-1.0, 0.0]),
        ]);
        let matcher = EuclideanMatcher::new(2.0);
        let result = matcher.identify(&Embedding::new(vec![0.0, 0.0]), &g);
        assert_eq!(result.label.as_deref(), Some("zed"));
        assert_eq!(result.distance, 1.0);
    }

    #[test]
    fn test_nearest_wins_even_if_earlier_entry_is_under_threshold() {
        // Both under threshold: the closer one must win, not the first seen.
        let g = gallery(vec![
            identity("far", vec![0.6]),
            identity("near", vec![0.1]),
        ]);
        let result = EuclideanMatcher::default().identify(&Embedding::new(vec![0.0]), &g);
        assert_eq!(result.label.as_deref(), Some("near"));
    }
}
