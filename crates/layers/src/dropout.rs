//! Dropout with deterministic, seedable mask generation.
//!
//! Masks are sampled from a small LCG so tests can fix a seed and reproduce
//! the exact activations. Surviving activations are scaled by
//! `1 / keep_prob` (inverted dropout), so evaluation needs no rescaling.
//! Dropout only fires while the owning module is in training mode; with a
//! probability of `None` or `0.0` the forward pass is fully deterministic.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use candle_core::{Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Sampling state for a dropout module.
#[derive(Debug)]
enum DropoutMode {
    /// Dropout disabled; the forward pass is the identity.
    Disabled,
    /// Dropout active with the given probability and RNG state.
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl Clone for DropoutMode {
    fn clone(&self) -> Self {
        match self {
            DropoutMode::Disabled => DropoutMode::Disabled,
            DropoutMode::Enabled { probability, rng } => {
                let state = match rng.lock() {
                    Ok(guard) => guard.clone(),
                    Err(_poisoned) => Lcg64::new(0),
                };
                DropoutMode::Enabled {
                    probability: *probability,
                    rng: Mutex::new(state),
                }
            }
        }
    }
}

/// Stochastic zeroing of activations at a configured rate.
#[derive(Debug)]
pub struct Dropout {
    mode: DropoutMode,
    training: AtomicBool,
}

impl Clone for Dropout {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode.clone(),
            training: AtomicBool::new(self.training.load(Ordering::Relaxed)),
        }
    }
}

impl Dropout {
    /// Builds a dropout module; `None` or `0.0` disables it entirely.
    ///
    /// Probabilities outside `[0, 1)` are a configuration error.
    pub fn new(probability: Option<f32>, seed: u64) -> Result<Self> {
        let mode = match probability {
            None => DropoutMode::Disabled,
            Some(p) if p == 0.0 => DropoutMode::Disabled,
            Some(p) if (0.0..1.0).contains(&p) => DropoutMode::Enabled {
                probability: p,
                rng: Mutex::new(Lcg64::new(seed)),
            },
            Some(p) => {
                return Err(Error::Msg(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )))
            }
        };
        Ok(Self {
            mode,
            training: AtomicBool::new(true),
        })
    }

    /// Enables or disables dropout based on training mode.
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// Applies dropout to a `(batch, seq, hidden)` tensor.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if !self.training.load(Ordering::Relaxed) {
            return Ok(hidden.clone());
        }
        match &self.mode {
            DropoutMode::Disabled => Ok(hidden.clone()),
            DropoutMode::Enabled { probability, rng } => {
                let dims = hidden.dims();
                if dims.len() != 3 {
                    return Err(Error::Msg(format!(
                        "dropout expects (batch, seq, hidden) tensor, got {dims:?}"
                    )));
                }
                checks::expect_batch_seq_hidden("dropout.input", hidden, dims[2])?;

                let keep_prob = 1.0 - probability;
                let total = hidden.elem_count();
                let mut rng = rng
                    .lock()
                    .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
                let mut mask_data = Vec::with_capacity(total);
                for _ in 0..total {
                    let sample = rng.next_f32();
                    mask_data.push(if sample < keep_prob { 1.0f32 } else { 0.0f32 });
                }

                let mask = Tensor::from_vec(mask_data, dims.to_vec(), hidden.device())?
                    .to_dtype(policy.compute())?;
                let compute = policy.cast_for_matmul(hidden)?;
                let dropped = compute
                    .broadcast_mul(&mask)?
                    .affine(f64::from(1.0 / keep_prob), 0.0)?;
                policy.cast_to_storage(&dropped)
            }
        }
    }
}

/// 64-bit linear congruential generator for deterministic masks.
#[derive(Debug, Clone)]
struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Parameters from Numerical Recipes.
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}
