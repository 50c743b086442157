use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Error;
use tracing::{debug, info, warn};

use crate::modules::hand_detector::LandmarkSource;
use crate::utils::coordinate::{normalize_landmarks, NormalizedLandmarks, FEATURE_DIMENSION};
use crate::utils::image::decode_frame_bytes;

/// One training example: the invariant feature vector and the class it was
/// collected under.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: NormalizedLandmarks,
    pub label: String,
}

/// Ordered collection of labeled samples plus the set of distinct labels
/// observed, kept sorted so label-index mappings stay reproducible between
/// builds.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<LabeledSample>,
    labels: BTreeSet<String>,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset {
            samples: Vec::new(),
            labels: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, sample: LabeledSample) {
        self.labels.insert(sample.label.clone());
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    /// labels returns the distinct labels in lexicographic order.
    pub fn labels(&self) -> Vec<&str> {
        self.labels.iter().map(|label| label.as_str()).collect()
    }

    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.label.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// write_csv serializes the dataset as the flat tabular artifact:
    /// 42 positionally named feature columns, a trailing label column, a
    /// header row and one row per sample.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header: Vec<String> = (0..FEATURE_DIMENSION).map(|i| i.to_string()).collect();
        header.push("label".to_string());
        writer.write_record(&header)?;

        for sample in &self.samples {
            let mut record: Vec<String> = sample
                .features
                .values()
                .iter()
                .map(|v| v.to_string())
                .collect();
            record.push(sample.label.clone());
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// read_csv parses an artifact written by `write_csv`, rejecting any
    /// row whose column count drifted from the 42 + 1 schema.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_path(path)?;

        let header_len = reader.headers()?.len();
        if header_len != FEATURE_DIMENSION + 1 {
            return Err(Error::msg(format!(
                "dataset - expected {} columns, found {}",
                FEATURE_DIMENSION + 1,
                header_len
            )));
        }

        let mut dataset = Dataset::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != FEATURE_DIMENSION + 1 {
                return Err(Error::msg(format!(
                    "dataset - row {} has {} columns, expected {}",
                    row_idx + 1,
                    record.len(),
                    FEATURE_DIMENSION + 1
                )));
            }

            let mut features = [0.0f32; FEATURE_DIMENSION];
            for (i, value) in features.iter_mut().enumerate() {
                *value = match record[i].parse::<f32>() {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        return Err(Error::msg(format!(
                            "dataset - row {} column {} is not numeric: {}",
                            row_idx + 1,
                            i,
                            e
                        )))
                    }
                };
            }

            dataset.push(LabeledSample {
                features: NormalizedLandmarks(features),
                label: record[FEATURE_DIMENSION].to_string(),
            });
        }

        Ok(dataset)
    }
}

/// Walks a labeled image corpus and turns it into a Dataset by running the
/// external detector and the landmark normalizer over every image.
pub struct DatasetBuilder<D: LandmarkSource> {
    detector: D,
}

impl<D: LandmarkSource> DatasetBuilder<D> {
    pub fn new(detector: D) -> Self {
        DatasetBuilder { detector }
    }

    /// build processes a corpus rooted at `corpus_dir`: one subdirectory
    /// per label, image files within. Labels and files are visited in
    /// lexicographic order for reproducibility. Unreadable images, detector
    /// failures and degenerate landmark sets are skipped with a log line,
    /// never aborting the batch.
    ///
    /// # Arguments
    /// * `corpus_dir` - corpus root directory
    ///
    /// # Returns
    /// * `Result<Dataset, Error>`
    pub async fn build<P: AsRef<Path>>(&self, corpus_dir: P) -> Result<Dataset, Error> {
        let corpus_dir = corpus_dir.as_ref();

        let mut label_dirs: Vec<(String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(corpus_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let label = match entry.file_name().into_string() {
                Ok(label) => label,
                Err(name) => {
                    warn!("dataset - skipping non-unicode label directory {:?}", name);
                    continue;
                }
            };
            label_dirs.push((label, entry.path()));
        }
        label_dirs.sort_by(|a, b| a.0.cmp(&b.0));

        if label_dirs.is_empty() {
            return Err(Error::msg(format!(
                "dataset - no label directories found under {}",
                corpus_dir.display()
            )));
        }

        let mut dataset = Dataset::new();
        for (label, label_dir) in label_dirs {
            info!("dataset - processing label {:?}", label);

            let mut image_paths: Vec<std::path::PathBuf> = Vec::new();
            for entry in fs::read_dir(&label_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    image_paths.push(entry.path());
                }
            }
            image_paths.sort();

            for img_path in image_paths {
                let im_bytes = match fs::read(&img_path) {
                    Ok(im_bytes) => im_bytes,
                    Err(e) => {
                        warn!("dataset - could not read {}: {}, skipping", img_path.display(), e);
                        continue;
                    }
                };

                let frame = match decode_frame_bytes(&im_bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(
                            "dataset - could not decode {}: {:#}, skipping",
                            img_path.display(),
                            e
                        );
                        continue;
                    }
                };

                let hands = match self.detector.detect(&frame).await {
                    Ok(hands) => hands,
                    Err(e) => {
                        warn!(
                            "dataset - detector failed on {}: {:#}, skipping",
                            img_path.display(),
                            e
                        );
                        continue;
                    }
                };

                if hands.is_empty() {
                    debug!("dataset - no hand detected in {}", img_path.display());
                    continue;
                }

                for hand in &hands {
                    match normalize_landmarks(hand) {
                        Some(features) => dataset.push(LabeledSample {
                            features,
                            label: label.clone(),
                        }),
                        None => {
                            warn!(
                                "dataset - degenerate landmarks in {}, skipping",
                                img_path.display()
                            );
                        }
                    }
                }
            }
        }

        info!(
            "dataset - processing complete: {} samples across {} labels",
            dataset.len(),
            dataset.labels().len()
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::coordinate::{Coordinate2D, HandLandmarks, HAND_LANDMARK_COUNT};
    use opencv::core::{Mat, Scalar, Vector};
    use opencv::imgcodecs::imencode;

    fn sample(label: &str, fill: f32) -> LabeledSample {
        let mut features = [fill; FEATURE_DIMENSION];
        features[0] = 0.0;
        features[1] = 0.0;
        features[2] = 1.0;
        LabeledSample {
            features: NormalizedLandmarks(features),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_csv_round_trip() {
        let mut dataset = Dataset::new();
        dataset.push(sample("hello", 0.25));
        dataset.push(sample("thanks", -0.5));
        dataset.push(sample("hello", 0.75));

        let path = std::env::temp_dir().join(format!("landmarks_rt_{}.csv", std::process::id()));
        dataset.write_csv(&path).unwrap();
        let restored = Dataset::read_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.samples(), dataset.samples());
        assert_eq!(restored.labels(), vec!["hello", "thanks"]);
    }

    #[test]
    fn test_read_csv_rejects_column_drift() {
        let path = std::env::temp_dir().join(format!("landmarks_bad_{}.csv", std::process::id()));
        std::fs::write(&path, "0,1,label\n0.0,1.0,hello\n").unwrap();
        let result = Dataset::read_csv(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    struct OneHand;

    #[tonic::async_trait]
    impl LandmarkSource for OneHand {
        async fn detect(&self, _frame: &Mat) -> Result<Vec<HandLandmarks>, Error> {
            let mut points = [Coordinate2D { x: 0.0, y: 0.0 }; HAND_LANDMARK_COUNT];
            for (i, point) in points.iter_mut().enumerate() {
                point.x = 0.2 + 0.01 * i as f32;
                point.y = 0.7 - 0.01 * i as f32;
            }
            Ok(vec![HandLandmarks { points }])
        }
    }

    struct DegenerateHand;

    #[tonic::async_trait]
    impl LandmarkSource for DegenerateHand {
        async fn detect(&self, _frame: &Mat) -> Result<Vec<HandLandmarks>, Error> {
            Ok(vec![HandLandmarks {
                points: [Coordinate2D { x: 0.5, y: 0.5 }; HAND_LANDMARK_COUNT],
            }])
        }
    }

    fn encoded_test_image() -> Vec<u8> {
        let img = Mat::new_rows_cols_with_default(8, 8, opencv::core::CV_8UC3, Scalar::all(127.0))
            .unwrap();
        let mut buf = Vector::<u8>::new();
        imencode(".png", &img, &mut buf, &Vector::new()).unwrap();
        buf.to_vec()
    }

    fn write_corpus(root: &Path) {
        let valid = encoded_test_image();
        for label in ["alpha", "beta"] {
            let dir = root.join(label);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("one.png"), &valid).unwrap();
            std::fs::write(dir.join("two.png"), &valid).unwrap();
        }
        // one unreadable file among the valid ones
        std::fs::write(root.join("alpha").join("corrupt.png"), b"not an image").unwrap();
    }

    #[tokio::test]
    async fn test_build_skips_corrupt_images() {
        let root = std::env::temp_dir().join(format!("corpus_skip_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        write_corpus(&root);

        let builder = DatasetBuilder::new(OneHand);
        let dataset = builder.build(&root).await.unwrap();
        std::fs::remove_dir_all(&root).ok();

        // 4 valid images, the corrupt one skipped without aborting
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.labels(), vec!["alpha", "beta"]);
        assert_eq!(dataset.label_counts()["alpha"], 2);
    }

    #[tokio::test]
    async fn test_build_skips_degenerate_hands() {
        let root = std::env::temp_dir().join(format!("corpus_degen_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        write_corpus(&root);

        let builder = DatasetBuilder::new(DegenerateHand);
        let dataset = builder.build(&root).await.unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(dataset.is_empty());
    }

    #[tokio::test]
    async fn test_build_requires_label_directories() {
        let root = std::env::temp_dir().join(format!("corpus_empty_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(&root).unwrap();

        let builder = DatasetBuilder::new(OneHand);
        let result = builder.build(&root).await;
        std::fs::remove_dir_all(&root).ok();

        assert!(result.is_err());
    }
}
