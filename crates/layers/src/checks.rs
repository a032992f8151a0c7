//! Shape and dtype assertion helpers shared across layer components.
//!
//! Each helper takes a short site name so failures read like
//! `"residual.branch: expected shape [2, 4, 8], got [2, 4, 16]"`. They return
//! `candle_core::Result<()>` so call sites propagate contract violations with
//! `?` instead of panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Ensures a tensor has the expected rank.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.dims().len();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected rank {rank}, got rank {actual} ({:?})",
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(name: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{name}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Requires two operands to share a dtype.
pub fn expect_same_dtype(
    left_name: &str,
    left: &Tensor,
    right_name: &str,
    right: &Tensor,
) -> Result<()> {
    if left.dtype() == right.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{left_name} and {right_name} must share a dtype, got {:?} and {:?}",
            left.dtype(),
            right.dtype()
        )))
    }
}

/// Requires contiguous memory so reshapes stay views.
pub fn expect_contiguous(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{name}: tensor must be contiguous")))
    }
}
