use std::fs::File;
use std::path::Path;

use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;

/// Version tag written into the weight artifact so an incompatible file is
/// rejected at load time instead of silently misbehaving.
const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Feed-forward classifier: dense layers with ReLU activations and a
/// softmax output sized to the class count.
#[derive(Debug, Clone)]
pub struct MlpNetwork {
    layers: Vec<DenseLayer>,
}

/// Intermediate values captured during a training forward pass, consumed
/// by `backward`.
pub struct ForwardCache {
    /// Input to each layer; index 0 is the batch itself.
    activations: Vec<Array2<f32>>,
    /// Pre-ReLU values of each hidden layer.
    pre_activations: Vec<Array2<f32>>,
    /// Inverted-dropout masks of each hidden layer.
    masks: Vec<Array2<f32>>,
}

impl MlpNetwork {
    /// new builds a network with the given layer widths, first entry being
    /// the input dimension and last the class count. Weights use scaled
    /// normal initialization, biases start at zero.
    pub fn new(layer_dims: &[usize], rng: &mut StdRng) -> Result<Self, Error> {
        if layer_dims.len() < 2 {
            return Err(Error::msg(
                "network - at least an input and an output dimension are required",
            ));
        }

        let mut layers: Vec<DenseLayer> = Vec::with_capacity(layer_dims.len() - 1);
        for dims in layer_dims.windows(2) {
            let std_dev = (2.0 / dims[0] as f32).sqrt();
            let weights = Array2::random_using((dims[0], dims[1]), Normal::new(0.0, std_dev)?, rng);
            let bias = Array1::zeros(dims[1]);
            layers.push(DenseLayer { weights, bias });
        }

        Ok(MlpNetwork { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].weights.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].weights.ncols()
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    /// forward runs the inference pass and returns one probability
    /// distribution per input row. Dropout is not applied.
    pub fn forward(&self, input: ArrayView2<f32>) -> Array2<f32> {
        let last = self.layers.len() - 1;
        let mut activation = input.to_owned();

        for (idx, layer) in self.layers.iter().enumerate() {
            let mut z = activation.dot(&layer.weights) + &layer.bias;
            if idx < last {
                z.mapv_inplace(|v| v.max(0.0));
                activation = z;
            } else {
                activation = softmax(z);
            }
        }

        activation
    }

    /// forward_train runs the pass with inverted dropout after each hidden
    /// layer and captures everything `backward` needs.
    pub fn forward_train(
        &self,
        input: ArrayView2<f32>,
        dropout: &[f32],
        rng: &mut StdRng,
    ) -> (Array2<f32>, ForwardCache) {
        let last = self.layers.len() - 1;
        let mut activations: Vec<Array2<f32>> = Vec::with_capacity(self.layers.len());
        let mut pre_activations: Vec<Array2<f32>> = Vec::with_capacity(last);
        let mut masks: Vec<Array2<f32>> = Vec::with_capacity(last);

        activations.push(input.to_owned());
        let mut probs = Array2::zeros((0, 0));

        for (idx, layer) in self.layers.iter().enumerate() {
            let z = activations[idx].dot(&layer.weights) + &layer.bias;
            if idx == last {
                probs = softmax(z);
                break;
            }

            pre_activations.push(z.clone());
            let mut a = z;
            a.mapv_inplace(|v| v.max(0.0));

            let rate = dropout.get(idx).copied().unwrap_or(0.0);
            let mask = if rate > 0.0 {
                let keep = 1.0 - rate;
                Array2::from_shape_fn(a.raw_dim(), |_| {
                    if rng.gen::<f32>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                })
            } else {
                Array2::ones(a.raw_dim())
            };

            a = a * &mask;
            masks.push(mask);
            activations.push(a);
        }

        (
            probs,
            ForwardCache {
                activations,
                pre_activations,
                masks,
            },
        )
    }

    /// backward computes per-layer weight and bias gradients of the mean
    /// cross-entropy loss for the batch captured in `cache`.
    pub fn backward(
        &self,
        cache: &ForwardCache,
        probs: &Array2<f32>,
        targets: &[usize],
    ) -> Vec<(Array2<f32>, Array1<f32>)> {
        let batch = targets.len() as f32;

        // Softmax + cross-entropy collapse to (p - onehot) / batch.
        let mut delta = probs.clone();
        for (row, &target) in targets.iter().enumerate() {
            delta[[row, target]] -= 1.0;
        }
        delta.mapv_inplace(|v| v / batch);

        let mut grads: Vec<(Array2<f32>, Array1<f32>)> = Vec::with_capacity(self.layers.len());
        for idx in (0..self.layers.len()).rev() {
            let grad_w = cache.activations[idx].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));

            if idx > 0 {
                let mut upstream = delta.dot(&self.layers[idx].weights.t());
                upstream = upstream * &cache.masks[idx - 1];
                upstream.zip_mut_with(&cache.pre_activations[idx - 1], |g, &z| {
                    if z <= 0.0 {
                        *g = 0.0;
                    }
                });
                delta = upstream;
            }

            grads.push((grad_w, grad_b));
        }

        grads.reverse();
        grads
    }

    /// save persists the weights as a versioned npz artifact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut npz = NpzWriter::new(File::create(path)?);

        let meta = Array1::from(vec![FORMAT_VERSION, self.layers.len() as u64]);
        npz.add_array("meta", &meta)?;
        for (idx, layer) in self.layers.iter().enumerate() {
            npz.add_array(format!("w{}", idx).as_str(), &layer.weights)?;
            npz.add_array(format!("b{}", idx).as_str(), &layer.bias)?;
        }
        npz.finish()?;

        Ok(())
    }

    /// load reads a weight artifact written by `save`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut npz = NpzReader::new(File::open(path)?)?;

        let meta: Array1<u64> = npz.by_name("meta.npy")?;
        if meta.len() != 2 {
            return Err(Error::msg("network - model artifact metadata is malformed"));
        }
        if meta[0] != FORMAT_VERSION {
            return Err(Error::msg(format!(
                "network - unsupported model format version {}",
                meta[0]
            )));
        }

        let num_layers = meta[1] as usize;
        let mut layers: Vec<DenseLayer> = Vec::with_capacity(num_layers);
        for idx in 0..num_layers {
            let weights: Array2<f32> = npz.by_name(&format!("w{}.npy", idx))?;
            let bias: Array1<f32> = npz.by_name(&format!("b{}.npy", idx))?;
            if weights.ncols() != bias.len() {
                return Err(Error::msg(format!(
                    "network - layer {} weight and bias shapes disagree",
                    idx
                )));
            }
            layers.push(DenseLayer { weights, bias });
        }

        if layers.is_empty() {
            return Err(Error::msg("network - model artifact contains no layers"));
        }

        Ok(MlpNetwork { layers })
    }
}

/// softmax applies a numerically stable row-wise softmax.
pub fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// cross_entropy returns the mean negative log-likelihood of the target
/// classes under the predicted distributions.
pub fn cross_entropy(probs: &Array2<f32>, targets: &[usize]) -> f32 {
    let mut loss = 0.0f32;
    for (row, &target) in probs.rows().into_iter().zip(targets) {
        loss -= (row[target] + 1e-12).ln();
    }
    loss / targets.len() as f32
}
