use std::path::Path;

use anyhow::Error;
use ndarray::Array2;

use crate::model::label_mapping::LabelMapping;
use crate::model::network::MlpNetwork;
use crate::utils::coordinate::{NormalizedLandmarks, FEATURE_DIMENSION};

/// Scores a normalized landmark vector into a (label, confidence) pair.
/// Implemented by the trained classifier in production and by fixed stubs
/// in tests.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &NormalizedLandmarks) -> Result<(String, f32), Error>;
}

/// Classifier adapter: the trained network and the label mapping it was
/// fitted with, loaded together as one immutable artifact pair.
#[derive(Debug, Clone)]
pub struct SignClassifier {
    network: MlpNetwork,
    label_mapping: LabelMapping,
}

impl SignClassifier {
    /// new wraps an already-loaded artifact pair, rejecting a mismatched
    /// one: a mapping from a different training run silently relabels
    /// every prediction.
    pub fn new(network: MlpNetwork, label_mapping: LabelMapping) -> Result<Self, Error> {
        if network.input_dim() != FEATURE_DIMENSION {
            return Err(Error::msg(format!(
                "sign_classifier - model expects {} inputs, feature vectors have {}",
                network.input_dim(),
                FEATURE_DIMENSION
            )));
        }
        if network.output_dim() != label_mapping.len() {
            return Err(Error::msg(format!(
                "sign_classifier - model predicts {} classes but the label mapping holds {}",
                network.output_dim(),
                label_mapping.len()
            )));
        }
        Ok(SignClassifier {
            network,
            label_mapping,
        })
    }

    /// load reads both halves of the artifact pair from disk.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        mapping_path: Q,
    ) -> Result<Self, Error> {
        let network = MlpNetwork::load(model_path)?;
        let label_mapping = LabelMapping::load(mapping_path)?;
        SignClassifier::new(network, label_mapping)
    }

    pub fn num_classes(&self) -> usize {
        self.label_mapping.len()
    }
}

impl Scorer for SignClassifier {
    fn score(&self, features: &NormalizedLandmarks) -> Result<(String, f32), Error> {
        let input = Array2::from_shape_vec((1, FEATURE_DIMENSION), features.values().to_vec())?;
        let probs = self.network.forward(input.view());
        let row = probs.row(0);

        let mut predicted_idx = 0usize;
        let mut confidence = f32::NEG_INFINITY;
        for (idx, &p) in row.iter().enumerate() {
            if p > confidence {
                predicted_idx = idx;
                confidence = p;
            }
        }

        let label = self.label_mapping.inverse_transform(predicted_idx)?;
        Ok((label.to_string(), confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_rejects_mismatched_pair() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = MlpNetwork::new(&[FEATURE_DIMENSION, 8, 3], &mut rng).unwrap();
        let mapping = LabelMapping::fit(["a", "b"]);
        assert!(SignClassifier::new(network, mapping).is_err());
    }

    #[test]
    fn test_score_returns_argmax_label() {
        let mut rng = StdRng::seed_from_u64(6);
        let network = MlpNetwork::new(&[FEATURE_DIMENSION, 8, 2], &mut rng).unwrap();
        let mapping = LabelMapping::fit(["hello", "thanks"]);
        let classifier = SignClassifier::new(network, mapping).unwrap();

        let features = NormalizedLandmarks([0.25; FEATURE_DIMENSION]);
        let (label, confidence) = classifier.score(&features).unwrap();
        assert!(classifier
            .label_mapping
            .classes()
            .iter()
            .any(|c| c == &label));
        assert!((0.0..=1.0).contains(&confidence));
        // Argmax of a 2-class softmax can never fall below an even split.
        assert!(confidence >= 0.5);
    }
}
