use std::collections::BTreeMap;

use amsi_core::{AmsiError, Mask};
use amsi_hist::{CancelToken, SampleBatch};
use amsi_eval::{
    evaluate_index, evaluate_range, read_records, run_evaluation, EvalConfig, EvalContext,
    EvalManifest, MemoryTruthCache, Observation, CONSISTENCE_CORNER,
};
use amsi_mcmc::{BoxUniform, DensityModel, Estimator};
use tempfile::tempdir;

/// Normalized Gaussian log density around the observation, over `dims`.
struct Gaussian {
    dims: Vec<usize>,
    sd: f64,
}

impl DensityModel for Gaussian {
    fn evaluate(&self, theta: &SampleBatch, x: &[f64]) -> Result<Vec<f64>, AmsiError> {
        let norm = -(self.sd * (2.0 * std::f64::consts::PI).sqrt()).ln();
        Ok(theta
            .rows()
            .map(|row| {
                row.iter()
                    .zip(&self.dims)
                    .map(|(v, &d)| {
                        let z = (v - x[d]) / self.sd;
                        -0.5 * z * z + norm
                    })
                    .sum()
            })
            .collect())
    }
}

fn gaussian(dims: &[usize]) -> Box<dyn DensityModel> {
    Box::new(Gaussian {
        dims: dims.to_vec(),
        sd: 0.1,
    })
}

fn ensemble() -> Estimator {
    let mut models = BTreeMap::new();
    models.insert(Mask::from_label("10").unwrap(), gaussian(&[0]));
    models.insert(Mask::from_label("01").unwrap(), gaussian(&[1]));
    models.insert(Mask::from_label("11").unwrap(), gaussian(&[0, 1]));
    Estimator::MaskedEnsemble(models)
}

fn prior() -> BoxUniform {
    BoxUniform::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap()
}

fn observation() -> Observation {
    Observation {
        theta: vec![0.45, 0.55],
        x: vec![0.5, 0.5],
    }
}

fn config() -> EvalConfig {
    EvalConfig {
        batch_size: 256,
        sigma: 0.1,
        start: 16,
        stop: 200,
        groupby: 32,
        bins: 10,
        accuracy: true,
        coverage: true,
        consistence: true,
        composition: true,
        ..EvalConfig::default()
    }
}

#[test]
fn every_measure_is_filled_for_an_ensemble() {
    let prior = prior();
    let estimator = ensemble();
    let truth = Gaussian {
        dims: vec![0, 1],
        sd: 0.1,
    };
    let ctx = EvalContext::new(&prior, &estimator).with_likelihood(&truth);
    let report = evaluate_index(&ctx, &config(), 0, &observation()).unwrap();

    let labels: Vec<&str> = report.records.iter().map(|r| r.mask.as_str()).collect();
    assert_eq!(labels, vec!["01", "10", "11"]);
    for record in &report.records {
        assert_eq!(record.index, 0);
        assert!((record.total_probability - 1.0).abs() < 0.02, "{record:?}");
        let entropy_truth = record.entropy_truth.unwrap();
        // Cell-center masses against sampled bin integrals: about 0.04 nats per dimension.
        assert!((record.entropy - entropy_truth).abs() < 0.15, "{record:?}");
        let kl = record.kl_truth.unwrap();
        assert!(kl.is_finite() && kl >= 0.0 && kl < 0.1, "{record:?}");
        let wd = record.wd_truth.unwrap();
        assert!(wd.is_finite() && wd < 0.5, "{record:?}");
        let quantile = record.quantile.unwrap();
        assert!(quantile > 0.0 && quantile <= 1.0 + 1e-9, "{record:?}");
    }

    let matrix = report.consistence.unwrap();
    assert_eq!(matrix.labels, vec!["01", "10", "11"]);
    assert_eq!(matrix.get("01", "10"), Some(0.0));
    assert_eq!(matrix.get("11", "11"), Some(0.0));
    assert!(matrix.get("10", "11").unwrap() < 1e-9);

    let composition = report.composition.unwrap();
    assert_eq!(composition.present, Mask::full(2));
    assert!(composition.table[0][0].is_some());
    assert!(composition.table[1][0].is_some());
    assert!(composition.table[1][1].is_some());
}

/// `inner` evaluated against an observation moved by `shift`.
struct Shifted<M> {
    inner: M,
    shift: Vec<f64>,
}

impl<M: DensityModel> DensityModel for Shifted<M> {
    fn evaluate(&self, theta: &SampleBatch, x: &[f64]) -> Result<Vec<f64>, AmsiError> {
        let moved: Vec<f64> = x.iter().zip(&self.shift).map(|(v, s)| v + s).collect();
        self.inner.evaluate(theta, &moved)
    }
}

#[test]
fn transport_distance_measures_a_shifted_truth() {
    // The truth sits two bins further along dimension 0 than the estimate.
    let prior = prior();
    let estimator = ensemble();
    let truth = Shifted {
        inner: Gaussian {
            dims: vec![0, 1],
            sd: 0.1,
        },
        shift: vec![0.2, 0.0],
    };
    let ctx = EvalContext::new(&prior, &estimator).with_likelihood(&truth);
    let report = evaluate_index(&ctx, &config(), 0, &observation()).unwrap();

    let wd = |label: &str| {
        report
            .records
            .iter()
            .find(|r| r.mask == label)
            .and_then(|r| r.wd_truth)
            .unwrap()
    };
    assert!((wd("11") - 2.0).abs() < 0.25, "joint distance {}", wd("11"));
    assert!((wd("10") - 2.0).abs() < 0.25, "shifted marginal {}", wd("10"));
    assert!(wd("01") < 0.3, "unshifted marginal {}", wd("01"));
    assert!(wd("11") >= wd("01"));
}

#[test]
fn ground_truth_is_sampled_once_per_index() {
    let prior = prior();
    let estimator = ensemble();
    let truth = Gaussian {
        dims: vec![0, 1],
        sd: 0.1,
    };
    let cache = MemoryTruthCache::new();
    let ctx = EvalContext::new(&prior, &estimator)
        .with_likelihood(&truth)
        .with_truth_cache(&cache);

    let first = evaluate_index(&ctx, &config(), 3, &observation()).unwrap();
    assert_eq!(cache.len(), 1);
    let second = evaluate_index(&ctx, &config(), 3, &observation()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn large_grids_switch_to_chains_and_skip_transport() {
    let prior = prior();
    let estimator = ensemble();
    let truth = Gaussian {
        dims: vec![0, 1],
        sd: 0.1,
    };
    let ctx = EvalContext::new(&prior, &estimator).with_likelihood(&truth);
    let config = EvalConfig {
        mcmc_limit: 50,
        wd_limit: 50,
        ..config()
    };
    let report = evaluate_index(&ctx, &config, 1, &observation()).unwrap();

    let joint = report.records.iter().find(|r| r.mask == "11").unwrap();
    // Chain histograms count samples: 256 chains over 184 kept steps.
    assert_eq!(joint.total_probability, (256 * 184) as f64);
    assert!(joint.wd_truth.is_none());
    // Both sides are sampled, so an empty tail bin may make the divergence infinite.
    assert!(joint.kl_truth.unwrap() >= 0.0);
    assert!((joint.entropy - joint.entropy_truth.unwrap()).abs() < 0.1);

    let single = report.records.iter().find(|r| r.mask == "10").unwrap();
    assert!(single.wd_truth.is_some());
}

#[test]
fn single_estimator_only_answers_the_full_mask() {
    let prior = prior();
    let estimator = Estimator::Single(gaussian(&[0, 1]));
    let ctx = EvalContext::new(&prior, &estimator)
        .with_masks(vec![Mask::from_label("10").unwrap()])
        .unwrap();
    let config = EvalConfig {
        accuracy: false,
        ..config()
    };
    let report = evaluate_index(&ctx, &config, 0, &observation()).unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].mask, "11");
    assert!(report.records[0].kl_truth.is_none());
}

#[test]
fn failing_indices_do_not_stop_the_range() {
    let prior = prior();
    let estimator = ensemble();
    let ctx = EvalContext::new(&prior, &estimator);
    let observations = vec![
        observation(),
        Observation {
            theta: vec![0.5],
            x: vec![0.5, 0.5],
        },
        observation(),
    ];
    let config = EvalConfig {
        accuracy: false,
        ..config()
    };
    let report = evaluate_range(&ctx, &config, &observations, 0..4);

    let done: Vec<usize> = report.reports.iter().map(|r| r.index).collect();
    assert_eq!(done, vec![0, 2]);
    let failed: Vec<(usize, &str)> = report
        .failures
        .iter()
        .map(|f| (f.index, f.error.info().code.as_str()))
        .collect();
    assert_eq!(failed, vec![(1, "theta-length"), (3, "index-range")]);
    assert!(!report.cancelled);
}

#[test]
fn bad_masks_are_rejected_up_front() {
    let prior = prior();
    let estimator = ensemble();
    let result = EvalContext::new(&prior, &estimator).with_masks(vec![Mask::from_label("101").unwrap()]);
    assert!(matches!(result, Err(AmsiError::Mask(_))));
}

#[test]
fn cancelled_runs_stop_before_the_next_index() {
    let prior = prior();
    let estimator = ensemble();
    let token = CancelToken::new();
    token.cancel();
    let ctx = EvalContext::new(&prior, &estimator).with_cancel(token);
    let report = evaluate_range(&ctx, &config(), &[observation()], 0..1);
    assert!(report.cancelled);
    assert!(report.reports.is_empty());
}

#[test]
fn run_appends_records_and_writes_artefacts() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("eval").join("run.csv");
    let prior = prior();
    let estimator = ensemble();
    let ctx = EvalContext::new(&prior, &estimator);
    let config = EvalConfig {
        accuracy: false,
        ..config()
    };
    let observations = vec![observation(), observation()];

    run_evaluation(&ctx, &config, &observations, 0..1, &output).unwrap();
    run_evaluation(&ctx, &config, &observations, 1..2, &output).unwrap();

    let records = read_records(&output).unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(records[3].index, 1);
    assert!(records[0].kl_truth.is_none());
    assert!(records[0].quantile.is_some());

    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents.matches("total_probability").count(), 1);
    assert!(dir.path().join("eval").join("run_0.csv").exists());
    assert!(dir.path().join("eval").join("run_1.csv").exists());
    let table = std::fs::read_to_string(dir.path().join("eval").join("run_0.csv")).unwrap();
    assert!(table.starts_with(&format!("{CONSISTENCE_CORNER},01,10,11")), "{table}");

    let manifest = EvalManifest::load(&output.with_extension("manifest.json")).unwrap();
    assert_eq!(manifest.indices, vec![1]);
    assert_eq!(manifest.config, config);
    assert_eq!(manifest.provenance.config_hash.len(), 64);
}
