use anyhow::Result;
use attention::masks::MASK_FILL;
use candle_core::{Device, Tensor};
use model::{Transformer, TransformerConfig};

fn small_config() -> TransformerConfig {
    let mut config = TransformerConfig::new(10, 10, 0, 0);
    config.embed_dim = 16;
    config.n_layers = 2;
    config.n_heads = 2;
    config.max_positions = 16;
    config
}

fn ids(device: &Device, rows: &[&[u32]]) -> Result<Tensor> {
    let seq_len = rows[0].len();
    let flat: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Tensor::from_vec(flat, (rows.len(), seq_len), device)?)
}

#[test]
fn forward_produces_per_position_logits() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;
    transformer.set_training(false);

    let source = ids(&device, &[&[2, 4, 5, 1, 3, 7, 2, 1, 3]])?;
    // Shifted target: feed everything but the final token.
    let target = ids(&device, &[&[0, 3, 5, 4, 1, 3, 2, 5]])?;

    let logits = transformer.forward(&source, &target)?;
    assert_eq!(logits.dims(), &[1, 8, 10]);

    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn forward_is_deterministic_in_eval_mode() -> Result<()> {
    let device = Device::Cpu;
    let mut config = small_config();
    config.dropout_p = Some(0.3);
    let transformer = Transformer::new(config)?;
    transformer.set_training(false);

    let source = ids(&device, &[&[2, 4, 5, 1, 3]])?;
    let target = ids(&device, &[&[0, 3, 5, 4]])?;

    let first = transformer.forward(&source, &target)?;
    let second = transformer.forward(&source, &target)?;
    assert_eq!(
        first.flatten_all()?.to_vec1::<f32>()?,
        second.flatten_all()?.to_vec1::<f32>()?
    );
    Ok(())
}

#[test]
fn future_target_tokens_cannot_influence_earlier_logits() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;
    transformer.set_training(false);

    let source = ids(&device, &[&[2, 4, 5, 1, 3, 7]])?;
    let target = ids(&device, &[&[0, 3, 5, 4, 1, 3, 2, 5]])?;
    let perturbed = ids(&device, &[&[0, 3, 5, 4, 1, 9, 2, 5]])?;

    let base = transformer.forward(&source, &target)?;
    let changed = transformer.forward(&source, &perturbed)?;

    let base_rows = base.reshape((8, 10))?.to_vec2::<f32>()?;
    let changed_rows = changed.reshape((8, 10))?.to_vec2::<f32>()?;
    for position in 0..5 {
        assert_eq!(
            base_rows[position], changed_rows[position],
            "logits at position {position} depend on a later target token"
        );
    }
    assert_ne!(base_rows[5], changed_rows[5]);
    Ok(())
}

#[test]
fn source_mask_marks_exactly_the_pad_positions() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;

    let source = ids(&device, &[&[0, 2, 3, 0, 5]])?;
    let mask = transformer.source_mask(&source)?;
    assert_eq!(mask.dims(), &[1, 1, 1, 5]);

    let row = mask.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(row, vec![MASK_FILL, 0.0, 0.0, MASK_FILL, 0.0]);
    Ok(())
}

#[test]
fn target_mask_is_lower_triangular() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;

    let target = ids(&device, &[&[1, 2, 3, 4]])?;
    let mask = transformer.target_mask(&target)?;
    assert_eq!(mask.dims(), &[1, 1, 4, 4]);

    let rows = mask.reshape((4, 4))?.to_vec2::<f32>()?;
    for (q, row) in rows.iter().enumerate() {
        for (k, &value) in row.iter().enumerate() {
            if k <= q {
                assert_eq!(value, 0.0, "visible cell ({q}, {k}) was masked");
            } else {
                assert_eq!(value, MASK_FILL, "future cell ({q}, {k}) was visible");
            }
        }
    }
    Ok(())
}

#[test]
fn fully_padded_source_still_yields_finite_logits() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;
    transformer.set_training(false);

    let source = ids(&device, &[&[0, 0, 0, 0]])?;
    let target = ids(&device, &[&[0, 3, 5]])?;

    let logits = transformer.forward(&source, &target)?;
    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn out_of_vocabulary_token_is_rejected() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;
    transformer.set_training(false);

    let source = ids(&device, &[&[2, 4, 99]])?;
    let target = ids(&device, &[&[0, 3]])?;
    assert!(transformer.forward(&source, &target).is_err());
    Ok(())
}

#[test]
fn sequence_beyond_max_positions_is_rejected() -> Result<()> {
    let device = Device::Cpu;
    let mut config = small_config();
    config.max_positions = 4;
    let transformer = Transformer::new(config)?;
    transformer.set_training(false);

    let source = ids(&device, &[&[2, 4, 5, 1, 3]])?;
    let target = ids(&device, &[&[0, 3]])?;
    assert!(transformer.forward(&source, &target).is_err());
    Ok(())
}

#[test]
fn invalid_configuration_fails_at_construction() {
    let mut config = small_config();
    config.n_heads = 0;
    assert!(Transformer::new(config).is_err());
}

#[test]
fn named_parameters_are_unique_and_cover_both_stacks() -> Result<()> {
    let transformer = Transformer::new(small_config())?;
    let params = transformer.named_parameters();
    assert!(!params.is_empty());

    let mut names: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total, "duplicate parameter names");

    assert!(names.iter().any(|n| n.starts_with("encoder.")));
    assert!(names.iter().any(|n| n.starts_with("decoder.")));
    assert!(names.contains(&"decoder.output_proj.weight"));
    assert!(names.contains(&"decoder.output_proj.bias"));
    Ok(())
}

#[test]
fn batched_inputs_are_processed_independently() -> Result<()> {
    let device = Device::Cpu;
    let transformer = Transformer::new(small_config())?;
    transformer.set_training(false);

    let source_pair = ids(&device, &[&[2, 4, 5, 1], &[7, 2, 1, 3]])?;
    let target_pair = ids(&device, &[&[0, 3, 5], &[0, 1, 2]])?;
    let batched = transformer.forward(&source_pair, &target_pair)?;

    let source_single = ids(&device, &[&[2, 4, 5, 1]])?;
    let target_single = ids(&device, &[&[0, 3, 5]])?;
    let single = transformer.forward(&source_single, &target_single)?;

    let batched_first = batched.narrow(0, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
    let single_flat = single.flatten_all()?.to_vec1::<f32>()?;
    for (a, b) in batched_first.iter().zip(single_flat.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
    Ok(())
}
