//! Precision policy threaded through every forward pass.
//!
//! Parameters may be stored in `f16`/`bf16` while matmuls and reductions run
//! in `f32`. [`PrecisionPolicy`] centralises the casts so each layer applies
//! the same promotion rules before compute-heavy work and casts back to the
//! storage dtype on the way out.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors are cast during the phases of a layer forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Builds a policy from the parameter storage dtype. Half-precision
    /// storage promotes compute and reductions to `f32`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self {
            storage,
            compute,
            reduction: DType::F32,
        }
    }

    /// Dtype used to store parameters and layer outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and activation evaluation.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Dtype used for statistics such as layer-norm mean and variance.
    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Indicates whether any promotion happens at all.
    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute || self.compute != self.reduction
    }

    /// Casts a tensor to the compute dtype ahead of a matmul.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }
}

fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn half_precision_parameters_promote_compute() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        assert_eq!(policy.storage(), DType::F16);
        assert_eq!(policy.compute(), DType::F32);
        assert_eq!(policy.reduction(), DType::F32);
        assert!(policy.is_mixed_precision());
    }

    #[test]
    fn f32_parameters_need_no_promotion() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert!(!policy.is_mixed_precision());
    }

    #[test]
    fn casts_round_trip_through_storage() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let base = Tensor::from_vec(vec![0.5f32, -1.25, 2.0], (3,), &device)?;
        let stored = base.to_dtype(policy.storage())?;

        let promoted = policy.cast_for_matmul(&stored)?;
        assert_eq!(promoted.dtype(), DType::F32);

        let back = policy.cast_to_storage(&promoted)?;
        assert_eq!(back.dtype(), DType::BF16);
        Ok(())
    }
}
