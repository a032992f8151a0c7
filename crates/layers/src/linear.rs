//! Affine projection layers.
//!
//! Inputs are shaped `(batch, seq, in_dim)` (or `(rows, in_dim)` for
//! flattened callers) and outputs replace the last axis with `out_dim`.
//! Weights and activations are promoted to [`PrecisionPolicy::compute`] for
//! the matmul and cast back to the storage dtype afterwards. Parameters live
//! in [`Var`]s so an external optimizer can update them between forward
//! passes.

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for a dense projection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with a bias term.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Creates a configuration without a bias term.
    pub fn without_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: false,
        }
    }
}

/// Weight initialisation policies for transformer projections.
#[derive(Debug, Clone, Copy)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight)
        } else {
            weight.to_dtype(dtype)
        }
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Option<Var>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
            bias: bias.as_ref().map(Var::from_tensor).transpose()?,
        })
    }

    /// Builds a linear layer with freshly initialised weights.
    pub fn with_init(
        config: LinearConfig,
        init: LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration used to validate inputs.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = vec![(format!("{scope}.weight"), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    /// Applies the projection, promoting to the compute dtype when needed.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight = policy.cast_for_matmul(self.weight.as_tensor())?;
        let weight_t = weight.t()?;

        let mut output = match input.dims() {
            [batch, seq, _] => {
                let flat = input.reshape((batch * seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((*batch, *seq, self.config.output_dim))?
            }
            [_, _] => input.matmul(&weight_t)?,
            _ => unreachable!("validated above"),
        };

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias.as_tensor())?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in(
            "linear.weight",
            weight,
            &[DType::F16, DType::BF16, DType::F32],
        )?;
        checks::expect_contiguous("linear.weight", weight)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in(
                    "linear.bias",
                    tensor,
                    &[DType::F16, DType::BF16, DType::F32],
                )
            }
            (false, Some(_)) => Err(Error::Msg(
                "linear.bias supplied but config disables bias".into(),
            )),
            (true, None) => Err(Error::Msg(
                "linear.bias expected by config but none supplied".into(),
            )),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [batch, seq, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)?;
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg(
                        "linear.input: batch and seq dimensions must be non-zero".into(),
                    ));
                }
                Ok(())
            }
            [_, in_dim] if *in_dim == self.config.input_dim => Ok(()),
            dims => Err(Error::Msg(format!(
                "linear.input: expected [batch, seq, {0}] or [rows, {0}], got {dims:?}",
                self.config.input_dim
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_forward(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let [batch, seq, hidden] = input.dims3().map(|(b, s, h)| [b, s, h])?;
        let flat = input.reshape((batch * seq, hidden))?;
        let mut out = flat.matmul(&weight.t()?)?;
        if let Some(bias) = bias {
            out = out.broadcast_add(bias)?;
        }
        out.reshape((batch, seq, weight.dims()[0]))
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 4);
        let weight = Tensor::randn(0f32, 0.05, (4, 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, (4,), &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                Some(bias.to_dtype(dtype)?),
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, 4]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_forward(&input.to_dtype(DType::F32)?, &weight, Some(&bias))?;
            let diff = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(diff <= tol, "max diff {diff} for {dtype:?}");
        }
        Ok(())
    }

    #[test]
    fn input_feature_mismatch_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(8, 4),
            LinearInit::XavierUniform,
            &device,
            DType::F32,
        )?;
        let input = Tensor::zeros((1, 3, 6), DType::F32, &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(linear.forward(&input, &policy).is_err());
        Ok(())
    }

    #[test]
    fn bias_free_layer_skips_bias_addition() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::without_bias(3, 2);
        let weight = Tensor::from_vec(vec![1f32, 0.0, 0.0, 0.0, 1.0, 0.0], (2, 3), &device)?;
        let linear = Linear::new(config, weight, None)?;
        let input = Tensor::from_vec(vec![1f32, 2.0, 3.0], (1, 1, 3), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let out = linear.forward(&input, &policy)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(out, vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn xavier_normal_std_is_reasonable() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(128, 64),
            LinearInit::XavierNormal,
            &device,
            DType::F32,
        )?;
        let values = linear.weight().flatten_all()?.to_vec1::<f32>()?;
        let mean = values.iter().copied().map(f64::from).sum::<f64>() / values.len() as f64;
        let var = values
            .iter()
            .map(|v| {
                let d = f64::from(*v) - mean;
                d * d
            })
            .sum::<f64>()
            / values.len() as f64;
        let expected = (2.0f64 / (128.0 + 64.0)).sqrt();
        assert!(mean.abs() < 5e-3);
        assert!((var.sqrt() - expected).abs() < expected * 0.25);
        Ok(())
    }
}
