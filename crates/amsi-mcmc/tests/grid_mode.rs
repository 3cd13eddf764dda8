use amsi_core::AmsiError;
use amsi_hist::{entropy, normalize};
use amsi_mcmc::{BoxUniform, Sampler, SamplerConfig};

#[test]
fn flat_ratio_gives_exact_uniform_cells() {
    let flat = |_: &[f64], _: &[f64]| 0.0;
    let prior = BoxUniform::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
    let config = SamplerConfig {
        batch_size: 7,
        ..SamplerConfig::default()
    };
    let sampler = Sampler::new(&flat, &prior, &[], config).unwrap();
    let outcome = sampler.histogram(10, 1 << 20).unwrap();

    assert!(!outcome.histogram.is_sparse());
    assert!((outcome.total_probability - 1.0).abs() < 1e-12);
    for (_, mass) in outcome.histogram.entries() {
        assert!((mass - 0.01).abs() < 1e-12);
    }
    let (hist, _) = normalize(&outcome.histogram).unwrap();
    assert!((entropy(&hist) - 100f64.ln()).abs() < 1e-9);
}

#[test]
fn ratio_is_evaluated_at_cell_centers() {
    // Observation shifts the log ratio; mass = exp(x * theta) * width / (high - low).
    let tilted = |theta: &[f64], x: &[f64]| x[0] * theta[0];
    let prior = BoxUniform::new(vec![0.0], vec![2.0]).unwrap();
    let sampler = Sampler::new(&tilted, &prior, &[0.5], SamplerConfig::default()).unwrap();
    let outcome = sampler.histogram(4, 1 << 20).unwrap();
    for bin in 0..4u32 {
        let center = 0.25 + 0.5 * bin as f64;
        let expected = (0.5 * center).exp() * 0.5 / 2.0;
        let mass = outcome.histogram.get(&[bin]).unwrap();
        assert!((mass - expected).abs() < 1e-12, "bin {bin}");
    }
}

#[test]
fn all_nan_batch_is_recorded_as_zero_mass() {
    let half = |theta: &[f64], _: &[f64]| if theta[0] < 0.5 { f64::NAN } else { 0.0 };
    let prior = BoxUniform::new(vec![0.0], vec![1.0]).unwrap();
    let config = SamplerConfig {
        batch_size: 10,
        ..SamplerConfig::default()
    };
    let sampler = Sampler::new(&half, &prior, &[], config).unwrap();
    let outcome = sampler.histogram(20, 1 << 20).unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].step, 0);
    assert_eq!(outcome.warnings[0].batch_len, 10);
    assert!((outcome.total_probability - 0.5).abs() < 1e-12);
}

#[test]
fn oversized_grid_is_refused() {
    let flat = |_: &[f64], _: &[f64]| 0.0;
    let prior = BoxUniform::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
    let sampler = Sampler::new(&flat, &prior, &[], SamplerConfig::default()).unwrap();
    match sampler.histogram(50, 100_000) {
        Err(AmsiError::SizeLimit(info)) => assert_eq!(info.code, "grid-mode-size"),
        other => panic!("expected a size limit error, got {other:?}"),
    }
}

#[test]
fn invalid_sampler_config_is_rejected() {
    let flat = |_: &[f64], _: &[f64]| 0.0;
    let prior = BoxUniform::new(vec![0.0], vec![1.0]).unwrap();
    let config = SamplerConfig {
        sigma: -1.0,
        ..SamplerConfig::default()
    };
    assert!(matches!(
        Sampler::new(&flat, &prior, &[], config),
        Err(AmsiError::Sampling(_))
    ));
}
