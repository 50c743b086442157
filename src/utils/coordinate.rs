use serde::{Deserialize, Serialize};

/// Number of anatomical keypoints the detector reports per hand.
/// Index 0 is always the wrist.
pub const HAND_LANDMARK_COUNT: usize = 21;

/// Length of the flattened feature vector (21 points, 2 axes each).
pub const FEATURE_DIMENSION: usize = HAND_LANDMARK_COUNT * 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate2D {
    pub x: f32,
    pub y: f32,
}

/// One detected hand: the fixed ordered set of 21 landmarks in normalized
/// image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    pub points: [Coordinate2D; HAND_LANDMARK_COUNT],
}

/// Translation- and scale-invariant encoding of one hand, flattened in
/// landmark-index-major, axis-minor order (x0, y0, ..., x20, y20).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLandmarks(pub [f32; FEATURE_DIMENSION]);

impl NormalizedLandmarks {
    pub fn values(&self) -> &[f32; FEATURE_DIMENSION] {
        &self.0
    }
}

/// normalize_landmarks converts a raw landmark set into the invariant
/// feature vector consumed by the classifier.
///
/// Every point is taken relative to the wrist, then divided by the maximum
/// absolute component so the vector encodes the shape of the hand rather
/// than its position or size. Returns `None` when all landmarks coincide
/// with the wrist (detector artifact or degenerate pose); the caller must
/// treat that as "no usable hand", not as an error.
///
/// The same routine runs during dataset preparation and live serving, so
/// identical input always yields bit-identical output.
///
/// # Arguments
/// * `hand` - &HandLandmarks
///
/// # Returns
/// * `Option<NormalizedLandmarks>`
pub fn normalize_landmarks(hand: &HandLandmarks) -> Option<NormalizedLandmarks> {
    let wrist = hand.points[0];

    let mut flat = [0.0f32; FEATURE_DIMENSION];
    for (i, point) in hand.points.iter().enumerate() {
        flat[2 * i] = point.x - wrist.x;
        flat[2 * i + 1] = point.y - wrist.y;
    }

    let max_val = flat.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_val == 0.0 {
        return None;
    }

    for v in flat.iter_mut() {
        *v /= max_val;
    }

    Some(NormalizedLandmarks(flat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hand() -> HandLandmarks {
        let mut points = [Coordinate2D { x: 0.0, y: 0.0 }; HAND_LANDMARK_COUNT];
        for (i, point) in points.iter_mut().enumerate() {
            point.x = 0.3 + 0.01 * i as f32;
            point.y = 0.5 - 0.015 * i as f32;
        }
        HandLandmarks { points }
    }

    #[test]
    fn test_max_component_is_one() {
        let normalized = normalize_landmarks(&sample_hand()).unwrap();
        let max_val = normalized
            .values()
            .iter()
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        assert!((max_val - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrist_maps_to_origin() {
        let normalized = normalize_landmarks(&sample_hand()).unwrap();
        assert_eq!(normalized.values()[0], 0.0);
        assert_eq!(normalized.values()[1], 0.0);
    }

    #[test]
    fn test_deterministic() {
        let hand = sample_hand();
        let first = normalize_landmarks(&hand).unwrap();
        let second = normalize_landmarks(&hand).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_degenerate_hand_is_rejected() {
        let points = [Coordinate2D { x: 0.42, y: 0.42 }; HAND_LANDMARK_COUNT];
        assert!(normalize_landmarks(&HandLandmarks { points }).is_none());
    }

    #[test]
    fn test_translation_and_scale_invariance() {
        let base = sample_hand();
        let canonical = normalize_landmarks(&base).unwrap();

        let mut transformed = base.clone();
        for point in transformed.points.iter_mut() {
            point.x = point.x * 10.0 + 100.0;
            point.y = point.y * 10.0 + 100.0;
        }
        let normalized = normalize_landmarks(&transformed).unwrap();

        for (a, b) in canonical.values().iter().zip(normalized.values()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }
}
