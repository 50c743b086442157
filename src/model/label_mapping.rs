use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::Error;
use serde::{Deserialize, Serialize};

const FORMAT_VERSION: u32 = 1;

/// Bidirectional mapping between label strings and class indices.
///
/// Fitted once from a dataset's label set and persisted next to the model
/// weights; the pair must always be loaded together, since a mapping from a
/// different training run silently relabels every prediction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelMapping {
    version: u32,
    classes: Vec<String>,
}

impl LabelMapping {
    /// fit builds the mapping from the observed labels, deduplicated and
    /// sorted lexicographically so the index assignment is reproducible
    /// across runs.
    pub fn fit<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: BTreeSet<&str> = labels.into_iter().collect();
        LabelMapping {
            version: FORMAT_VERSION,
            classes: unique.into_iter().map(|label| label.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// transform maps a label to its class index.
    pub fn transform(&self, label: &str) -> Result<usize, Error> {
        self.classes
            .binary_search_by(|candidate| candidate.as_str().cmp(label))
            .map_err(|_| Error::msg(format!("label_mapping - unknown label {:?}", label)))
    }

    /// inverse_transform maps a class index back to its label.
    pub fn inverse_transform(&self, index: usize) -> Result<&str, Error> {
        self.classes
            .get(index)
            .map(|label| label.as_str())
            .ok_or_else(|| {
                Error::msg(format!(
                    "label_mapping - class index {} is out of range for {} classes",
                    index,
                    self.classes.len()
                ))
            })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let mapping: LabelMapping = serde_json::from_reader(BufReader::new(file))?;
        if mapping.version != FORMAT_VERSION {
            return Err(Error::msg(format!(
                "label_mapping - unsupported mapping format version {}",
                mapping.version
            )));
        }
        if mapping.classes.is_empty() {
            return Err(Error::msg("label_mapping - mapping contains no classes"));
        }
        Ok(mapping)
    }
}
