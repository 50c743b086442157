use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::config::TrainingConfig;
use crate::dataset::dataset::Dataset;
use crate::model::label_mapping::LabelMapping;
use crate::model::network::{cross_entropy, MlpNetwork};
use crate::utils::coordinate::FEATURE_DIMENSION;

/// Minimum samples a label needs to survive the train/validation split.
const MIN_SAMPLES_PER_LABEL: usize = 2;

/// Result of a training run: the restored-best network, the mapping fitted
/// alongside it, and the headline metric.
pub struct TrainingOutcome {
    pub network: MlpNetwork,
    pub label_mapping: LabelMapping,
    pub validation_accuracy: f32,
    pub epochs_run: usize,
}

struct AdamState {
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

/// Adam optimizer with bias-corrected first and second moments.
struct Adam {
    states: Vec<AdamState>,
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
}

impl Adam {
    fn new(network: &MlpNetwork, learning_rate: f32) -> Self {
        let states = network
            .layers()
            .iter()
            .map(|layer| AdamState {
                m_w: Array2::zeros(layer.weights.raw_dim()),
                v_w: Array2::zeros(layer.weights.raw_dim()),
                m_b: Array1::zeros(layer.bias.raw_dim()),
                v_b: Array1::zeros(layer.bias.raw_dim()),
            })
            .collect();

        Adam {
            states,
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
        }
    }

    fn apply(&mut self, network: &mut MlpNetwork, grads: &[(Array2<f32>, Array1<f32>)]) {
        self.step += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step);
        let correction2 = 1.0 - self.beta2.powi(self.step);

        for ((layer, state), (grad_w, grad_b)) in network
            .layers_mut()
            .iter_mut()
            .zip(self.states.iter_mut())
            .zip(grads)
        {
            state.m_w = &state.m_w * self.beta1 + grad_w * (1.0 - self.beta1);
            state.v_w = &state.v_w * self.beta2 + &grad_w.mapv(|g| g * g) * (1.0 - self.beta2);
            let update_w = state.m_w.mapv(|m| m / correction1)
                / (state.v_w.mapv(|v| (v / correction2).sqrt()) + self.epsilon);
            layer.weights = &layer.weights - &(update_w * self.learning_rate);

            state.m_b = &state.m_b * self.beta1 + grad_b * (1.0 - self.beta1);
            state.v_b = &state.v_b * self.beta2 + &grad_b.mapv(|g| g * g) * (1.0 - self.beta2);
            let update_b = state.m_b.mapv(|m| m / correction1)
                / (state.v_b.mapv(|v| (v / correction2).sqrt()) + self.epsilon);
            layer.bias = &layer.bias - &(update_b * self.learning_rate);
        }
    }
}

/// train_classifier fits the feed-forward classifier on a dataset.
///
/// Labels with fewer than 2 samples are dropped (they cannot be split),
/// the rest are mapped to indices in lexicographic order. Samples are
/// shuffled with the configured seed and split 80/20 without
/// stratification, which is acceptable only while class sizes stay large
/// relative to the class count. Training early-stops once validation
/// accuracy fails to improve for `patience` epochs and the best-observed
/// weights are restored.
///
/// # Arguments
/// * `dataset` - &Dataset
/// * `config` - &TrainingConfig
///
/// # Returns
/// * `Result<TrainingOutcome, Error>`
pub fn train_classifier(dataset: &Dataset, config: &TrainingConfig) -> Result<TrainingOutcome, Error> {
    if dataset.is_empty() {
        return Err(Error::msg(
            "training - the dataset is empty; run build-dataset over a labeled corpus first",
        ));
    }

    let counts = dataset.label_counts();
    for (label, count) in &counts {
        if *count < MIN_SAMPLES_PER_LABEL {
            warn!(
                "training - removing label {:?}: {} sample(s) cannot be split",
                label, count
            );
        }
    }

    let kept: Vec<_> = dataset
        .samples()
        .iter()
        .filter(|sample| counts[sample.label.as_str()] >= MIN_SAMPLES_PER_LABEL)
        .collect();
    if kept.is_empty() {
        return Err(Error::msg(
            "training - every label has fewer than 2 samples; collect more images per label",
        ));
    }

    let label_mapping = LabelMapping::fit(kept.iter().map(|sample| sample.label.as_str()));
    if label_mapping.len() < 2 {
        return Err(Error::msg(
            "training - at least 2 labels with 2 or more samples are required; collect more data",
        ));
    }

    let n = kept.len();
    let mut features = Array2::<f32>::zeros((n, FEATURE_DIMENSION));
    let mut targets: Vec<usize> = Vec::with_capacity(n);
    for (row, sample) in kept.iter().enumerate() {
        features
            .row_mut(row)
            .assign(&ArrayView1::from(&sample.features.values()[..]));
        targets.push(label_mapping.transform(&sample.label)?);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);

    let n_val = ((n as f32) * config.validation_split).round() as usize;
    let n_val = n_val.clamp(1, n - 1);
    let (val_idx, train_idx) = indices.split_at(n_val);

    info!(
        "training - {} train / {} validation samples over {} classes: {:?}",
        train_idx.len(),
        val_idx.len(),
        label_mapping.len(),
        label_mapping.classes()
    );

    let mut dims: Vec<usize> = Vec::with_capacity(config.hidden_layers.len() + 2);
    dims.push(FEATURE_DIMENSION);
    dims.extend_from_slice(&config.hidden_layers);
    dims.push(label_mapping.len());

    let mut network = MlpNetwork::new(&dims, &mut rng)?;
    let mut optimizer = Adam::new(&network, config.learning_rate);

    let (val_x, val_y) = gather(&features, &targets, val_idx);

    let mut best = network.clone();
    let mut best_accuracy = -1.0f32;
    let mut wait = 0usize;
    let mut epochs_run = 0usize;
    let mut train_order: Vec<usize> = train_idx.to_vec();

    for epoch in 1..=config.epochs {
        epochs_run = epoch;
        train_order.shuffle(&mut rng);

        let mut epoch_loss = 0.0f32;
        let mut batches = 0usize;
        for chunk in train_order.chunks(config.batch_size.max(1)) {
            let (batch_x, batch_y) = gather(&features, &targets, chunk);
            let (probs, cache) = network.forward_train(batch_x.view(), &config.dropout, &mut rng);
            epoch_loss += cross_entropy(&probs, &batch_y);
            batches += 1;

            let grads = network.backward(&cache, &probs, &batch_y);
            optimizer.apply(&mut network, &grads);
        }

        let accuracy = evaluate_accuracy(&network, val_x.view(), &val_y);
        info!(
            "training - epoch {}: loss {:.4}, validation accuracy {:.4}",
            epoch,
            epoch_loss / batches.max(1) as f32,
            accuracy
        );

        if accuracy > best_accuracy {
            best_accuracy = accuracy;
            best = network.clone();
            wait = 0;
        } else {
            // a tie refreshes the snapshot to the latest plateau epoch
            if accuracy == best_accuracy {
                best = network.clone();
            }
            wait += 1;
            if wait >= config.patience {
                info!(
                    "training - early stopping at epoch {}, restoring best weights",
                    epoch
                );
                break;
            }
        }
    }

    info!(
        "training - finished after {} epochs, best validation accuracy {:.4}",
        epochs_run, best_accuracy
    );

    Ok(TrainingOutcome {
        network: best,
        label_mapping,
        validation_accuracy: best_accuracy,
        epochs_run,
    })
}

/// evaluate_accuracy returns the argmax accuracy of the network on a batch.
pub fn evaluate_accuracy(network: &MlpNetwork, x: ArrayView2<f32>, y: &[usize]) -> f32 {
    if y.is_empty() {
        return 0.0;
    }

    let probs = network.forward(x);
    let mut correct = 0usize;
    for (row, &target) in probs.axis_iter(Axis(0)).zip(y) {
        let mut predicted = 0usize;
        let mut best = f32::NEG_INFINITY;
        for (idx, &p) in row.iter().enumerate() {
            if p > best {
                predicted = idx;
                best = p;
            }
        }
        if predicted == target {
            correct += 1;
        }
    }
    correct as f32 / y.len() as f32
}

fn gather(features: &Array2<f32>, targets: &[usize], idx: &[usize]) -> (Array2<f32>, Vec<usize>) {
    let mut x = Array2::<f32>::zeros((idx.len(), features.ncols()));
    let mut y: Vec<usize> = Vec::with_capacity(idx.len());
    for (row, &i) in idx.iter().enumerate() {
        x.row_mut(row).assign(&features.row(i));
        y.push(targets[i]);
    }
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::dataset::LabeledSample;
    use crate::modules::sign_classifier::{Scorer, SignClassifier};
    use crate::utils::coordinate::{
        normalize_landmarks, Coordinate2D, HandLandmarks, NormalizedLandmarks, HAND_LANDMARK_COUNT,
    };

    /// Canonical "thumbs up": wrist at the origin, thumb tip reaching the
    /// top of the unit box, fingers folded. Already wrist-relative with a
    /// max-abs component of exactly 1.0.
    fn thumbs_up_canonical() -> NormalizedLandmarks {
        let mut flat = [0.0f32; FEATURE_DIMENSION];
        for i in 1..HAND_LANDMARK_COUNT {
            let t = i as f32 / (HAND_LANDMARK_COUNT - 1) as f32;
            if i <= 4 {
                // thumb rises to the top of the box
                flat[2 * i] = 0.1 * i as f32;
                flat[2 * i + 1] = -(i as f32) / 4.0;
            } else {
                // folded fingers cluster near the palm
                flat[2 * i] = 0.3 + 0.02 * i as f32;
                flat[2 * i + 1] = -0.2 - 0.3 * t;
            }
        }
        NormalizedLandmarks(flat)
    }

    /// A contrasting flat-palm shape, also canonical.
    fn flat_palm_canonical() -> NormalizedLandmarks {
        let mut flat = [0.0f32; FEATURE_DIMENSION];
        for i in 1..HAND_LANDMARK_COUNT {
            let t = i as f32 / (HAND_LANDMARK_COUNT - 1) as f32;
            flat[2 * i] = -0.8 + 1.6 * t;
            flat[2 * i + 1] = if i % 2 == 0 { -1.0 } else { -0.6 };
        }
        NormalizedLandmarks(flat)
    }

    fn dataset_from(shapes: &[(&NormalizedLandmarks, &str, usize)]) -> Dataset {
        let mut dataset = Dataset::new();
        for (features, label, copies) in shapes {
            for _ in 0..*copies {
                dataset.push(LabeledSample {
                    features: (*features).clone(),
                    label: label.to_string(),
                });
            }
        }
        dataset
    }

    fn fast_config() -> TrainingConfig {
        TrainingConfig {
            hidden_layers: vec![32, 16],
            dropout: vec![0.0, 0.0],
            learning_rate: 0.01,
            epochs: 200,
            batch_size: 16,
            patience: 50,
            validation_split: 0.2,
            seed: 7,
        }
    }

    #[test]
    fn test_small_labels_are_dropped() {
        let thumbs = thumbs_up_canonical();
        let palm = flat_palm_canonical();
        let mut rare = thumbs.clone();
        rare.0[2] = 0.9;
        let dataset = dataset_from(&[
            (&thumbs, "thumbs_up", 10),
            (&palm, "flat_palm", 10),
            (&rare, "rare", 1),
        ]);

        let outcome = train_classifier(&dataset, &fast_config()).unwrap();
        assert_eq!(outcome.label_mapping.classes(), &["flat_palm", "thumbs_up"]);
    }

    #[test]
    fn test_all_labels_too_small_is_fatal() {
        let thumbs = thumbs_up_canonical();
        let palm = flat_palm_canonical();
        let dataset = dataset_from(&[(&thumbs, "thumbs_up", 1), (&palm, "flat_palm", 1)]);
        assert!(train_classifier(&dataset, &fast_config()).is_err());
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        assert!(train_classifier(&Dataset::new(), &fast_config()).is_err());
    }

    #[test]
    fn test_end_to_end_scaled_translated_hand() {
        let thumbs = thumbs_up_canonical();
        let palm = flat_palm_canonical();
        let dataset = dataset_from(&[(&thumbs, "thumbs_up", 30), (&palm, "flat_palm", 30)]);

        let outcome = train_classifier(&dataset, &fast_config()).unwrap();
        assert!(outcome.validation_accuracy > 0.99);

        // Rebuild the thumbs-up hand scaled by 10x and translated by
        // (100, 100): normalization must recover the canonical vector.
        let mut points = [Coordinate2D { x: 0.0, y: 0.0 }; HAND_LANDMARK_COUNT];
        for (i, point) in points.iter_mut().enumerate() {
            point.x = thumbs.values()[2 * i] * 10.0 + 100.0;
            point.y = thumbs.values()[2 * i + 1] * 10.0 + 100.0;
        }
        let normalized = normalize_landmarks(&HandLandmarks { points }).unwrap();
        for (a, b) in normalized.values().iter().zip(thumbs.values()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }

        let classifier =
            SignClassifier::new(outcome.network, outcome.label_mapping).unwrap();
        let (label, confidence) = classifier.score(&normalized).unwrap();
        assert_eq!(label, "thumbs_up");
        assert!(confidence > 0.8, "confidence {}", confidence);
    }
}
