use std::fmt;

use anyhow::Error;
use opencv::core::{flip, Mat};
use tracing::error;

use crate::config::config::DecisionConfig;
use crate::modules::hand_detector::LandmarkSource;
use crate::modules::sign_classifier::Scorer;
use crate::utils::coordinate::{normalize_landmarks, HandLandmarks};

/// Outcome of classifying one frame. A closed set: the client always
/// receives one of these as plain text, never a raw error.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionResult {
    /// A gesture recognized above the confidence threshold.
    Label(String),
    /// No usable hand in the frame.
    ShowHand,
    /// A hand was found but no class cleared the threshold.
    Uncertain,
    /// The model artifacts were not loaded at startup.
    ModelNotLoaded,
    /// The loaded model failed while scoring.
    ModelError,
    /// Any other per-frame failure.
    Error,
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionResult::Label(label) => f.write_str(label),
            PredictionResult::ShowHand => f.write_str("Show Hand"),
            PredictionResult::Uncertain => f.write_str("Uncertain"),
            PredictionResult::ModelNotLoaded => f.write_str("Model Not Loaded"),
            PredictionResult::ModelError => f.write_str("Model Error"),
            PredictionResult::Error => f.write_str("Error"),
        }
    }
}

/// Per-frame inference pipeline: detector, classifier and decision policy
/// composed behind a single entry point. Built once at startup and shared
/// read-only across connections.
pub struct SignPipeline {
    detector: Box<dyn LandmarkSource>,
    classifier: Option<Box<dyn Scorer>>,
    confidence_threshold: f32,
}

impl SignPipeline {
    /// new initializes the pipeline.
    ///
    /// # Arguments
    /// * `detector` - landmark source for incoming frames
    /// * `classifier` - `None` when the artifact pair failed to load at
    ///   startup; every frame then resolves to `ModelNotLoaded`
    /// * `config` - decision policy parameters
    ///
    /// # Returns
    /// * `SignPipeline`
    pub fn new(
        detector: Box<dyn LandmarkSource>,
        classifier: Option<Box<dyn Scorer>>,
        config: DecisionConfig,
    ) -> Self {
        SignPipeline {
            detector,
            classifier,
            confidence_threshold: config.confidence_threshold,
        }
    }

    /// predict_frame classifies one decoded frame. This is the per-frame
    /// exception boundary: any failure below it is logged and folded into
    /// `PredictionResult::Error`, never propagated to the stream.
    pub async fn predict_frame(&self, frame: &Mat) -> PredictionResult {
        match self.classify(frame).await {
            Ok(prediction) => prediction,
            Err(e) => {
                error!("pipeline - frame classification failed: {:#}", e);
                PredictionResult::Error
            }
        }
    }

    async fn classify(&self, frame: &Mat) -> Result<PredictionResult, Error> {
        // Mirror to selfie view so live frames match the training corpus.
        let mut mirrored = Mat::default();
        flip(frame, &mut mirrored, 1)?;

        let hands = self.detector.detect(&mirrored).await?;
        Ok(self.decide(&hands))
    }

    /// decide applies the decision policy to the detected hands of one
    /// frame. At most one hand is expected under the default detector
    /// configuration; with several, the last scored hand wins.
    fn decide(&self, hands: &[HandLandmarks]) -> PredictionResult {
        if hands.is_empty() {
            return PredictionResult::ShowHand;
        }

        let mut prediction = PredictionResult::ShowHand;
        for hand in hands {
            let features = match normalize_landmarks(hand) {
                Some(features) => features,
                None => return PredictionResult::ShowHand,
            };

            let classifier = match &self.classifier {
                Some(classifier) => classifier,
                None => return PredictionResult::ModelNotLoaded,
            };

            match classifier.score(&features) {
                Ok((label, confidence)) => {
                    prediction = if confidence > self.confidence_threshold {
                        PredictionResult::Label(label)
                    } else {
                        PredictionResult::Uncertain
                    };
                }
                Err(e) => {
                    error!("pipeline - classifier scoring failed: {:#}", e);
                    return PredictionResult::ModelError;
                }
            }
        }

        prediction
    }
}
