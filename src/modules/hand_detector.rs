use std::time::Duration;

use anyhow::Error;
use opencv::core::{Mat, MatTraitConst, Vec3b};

use crate::config::config::HandDetectionConfig;
use crate::detector_client::client::handpose::DetectLandmarksRequest;
use crate::detector_client::client::LandmarkDetectionClient;
use crate::utils::coordinate::{Coordinate2D, HandLandmarks, FEATURE_DIMENSION, HAND_LANDMARK_COUNT};
use crate::utils::utils::u8_to_f32_vec;

/// Source of hand landmarks for one frame. Implemented by the gRPC-backed
/// detector in production and by fixed stubs in tests.
#[tonic::async_trait]
pub trait LandmarkSource: Send + Sync {
    async fn detect(&self, frame: &Mat) -> Result<Vec<HandLandmarks>, Error>;
}

#[derive(Debug, Clone)]
pub struct HandDetector {
    landmark_client: LandmarkDetectionClient,
    min_detection_confidence: f32,
    max_num_hands: i32,
    static_image_mode: bool,
    timeout: i32,
}

impl HandDetector {
    pub fn new(landmark_client: LandmarkDetectionClient, config: HandDetectionConfig) -> Self {
        HandDetector {
            landmark_client,
            min_detection_confidence: config.min_detection_confidence,
            max_num_hands: config.max_num_hands,
            static_image_mode: config.static_image_mode,
            timeout: config.timeout,
        }
    }

    /// preprocess flattens an RGB matrix into the contiguous row-major
    /// pixel buffer the detection service expects.
    fn preprocess(&self, img: &Mat) -> Result<(Vec<u8>, i32, i32), Error> {
        let rows = img.rows();
        let cols = img.cols();
        if rows <= 0 || cols <= 0 {
            return Err(Error::msg("hand_detector - input frame is empty"));
        }

        let mut buffer: Vec<u8> = Vec::with_capacity((rows * cols * 3) as usize);
        for y in 0..rows {
            for x in 0..cols {
                let pixel = img.at_2d::<Vec3b>(y, x)?;
                buffer.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]);
            }
        }
        Ok((buffer, cols, rows))
    }

    /// postprocess parses the raw little-endian landmark buffers returned by
    /// the service, one buffer of 42 float32 values per detected hand.
    fn postprocess(
        &self,
        raw_landmark_contents: Vec<Vec<u8>>,
    ) -> Result<Vec<HandLandmarks>, Error> {
        let mut hands: Vec<HandLandmarks> = Vec::with_capacity(raw_landmark_contents.len());

        for raw in &raw_landmark_contents {
            let values = u8_to_f32_vec(raw);
            if values.len() != FEATURE_DIMENSION {
                return Err(Error::msg(format!(
                    "hand_detector - expected {} landmark values per hand, got {}",
                    FEATURE_DIMENSION,
                    values.len()
                )));
            }

            let mut points = [Coordinate2D { x: 0.0, y: 0.0 }; HAND_LANDMARK_COUNT];
            for (i, chunk) in values.chunks_exact(2).enumerate() {
                points[i] = Coordinate2D {
                    x: chunk[0],
                    y: chunk[1],
                };
            }
            hands.push(HandLandmarks { points });
        }

        Ok(hands)
    }
}

#[tonic::async_trait]
impl LandmarkSource for HandDetector {
    async fn detect(&self, frame: &Mat) -> Result<Vec<HandLandmarks>, Error> {
        let (image_data, width, height) = self.preprocess(frame)?;

        let mut request = tonic::Request::new(DetectLandmarksRequest {
            image_data,
            width,
            height,
            min_detection_confidence: self.min_detection_confidence,
            max_num_hands: self.max_num_hands,
            static_image_mode: self.static_image_mode,
        });
        request.set_timeout(Duration::from_secs(self.timeout as u64));

        let response = self.landmark_client.detect_landmarks(request).await?;
        self.postprocess(response.raw_landmark_contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_hand_buffer() -> Vec<u8> {
        let mut raw = Vec::with_capacity(FEATURE_DIMENSION * 4);
        for i in 0..FEATURE_DIMENSION {
            raw.extend_from_slice(&(i as f32 * 0.01).to_le_bytes());
        }
        raw
    }

    // postprocess does not touch the wire, so a lazy client with a dangling
    // address is enough to construct the module under test.
    fn test_detector() -> HandDetector {
        let client = LandmarkDetectionClient::connect_lazy("http://127.0.0.1:1".to_string()).unwrap();
        HandDetector::new(client, HandDetectionConfig::new_offline())
    }

    #[test]
    fn test_postprocess_parses_hands() {
        let detector = test_detector();
        let hands = detector.postprocess(vec![raw_hand_buffer()]).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].points[0], Coordinate2D { x: 0.0, y: 0.01 });
        assert!((hands[0].points[20].x - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_rejects_short_buffer() {
        let detector = test_detector();
        assert!(detector.postprocess(vec![vec![0u8; 8]]).is_err());
    }
}
