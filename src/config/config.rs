use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandDetectionConfig {
    pub min_detection_confidence: f32,
    pub max_num_hands: i32,
    pub static_image_mode: bool,
    pub timeout: i32,
}

impl HandDetectionConfig {
    /// Live video settings: the detector tracks hands between frames and
    /// accepts lower-confidence detections to keep latency down.
    pub fn new_live() -> Self {
        HandDetectionConfig {
            min_detection_confidence: 0.7,
            max_num_hands: 1,
            static_image_mode: false,
            timeout: 20,
        }
    }

    /// Offline corpus settings: every image stands alone and the detection
    /// confidence bar is raised since data quality matters more than latency.
    pub fn new_offline() -> Self {
        HandDetectionConfig {
            min_detection_confidence: 0.6,
            max_num_hands: 1,
            static_image_mode: true,
            timeout: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionConfig {
    /// A prediction is accepted only when its confidence is strictly above
    /// this value; at or below it the result is reported as uncertain.
    pub confidence_threshold: f32,
}

impl DecisionConfig {
    pub fn new() -> Self {
        DecisionConfig {
            confidence_threshold: 0.8,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub hidden_layers: Vec<usize>,
    /// Dropout rate applied after each hidden layer, same order.
    pub dropout: Vec<f32>,
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: usize,
    /// Epochs without a validation-accuracy improvement before training
    /// stops and the best-observed weights are restored.
    pub patience: usize,
    pub validation_split: f32,
    pub seed: u64,
}

impl TrainingConfig {
    pub fn new() -> Self {
        TrainingConfig {
            hidden_layers: vec![128, 256, 128],
            dropout: vec![0.2, 0.3, 0.2],
            learning_rate: 5e-4,
            epochs: 50,
            batch_size: 128,
            patience: 5,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub detector_addr: String,
    pub model_path: String,
    pub label_mapping_path: String,
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:50052".to_string(),
            detector_addr: "http://127.0.0.1:50051".to_string(),
            model_path: "sign_model.npz".to_string(),
            label_mapping_path: "label_mapping.json".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new()
    }
}
