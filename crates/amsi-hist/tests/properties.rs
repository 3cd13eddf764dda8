use amsi_hist::{
    entropy, marginalize, normalize, reduce_histogram, BinGrid, Histogram, ReduceOptions,
    SampleBatch,
};
use proptest::prelude::*;

fn entries_strategy(shape: Vec<usize>) -> impl Strategy<Value = Vec<(Vec<u32>, f64)>> {
    let coord = shape
        .iter()
        .map(|&n| (0..n as u32).boxed())
        .collect::<Vec<_>>();
    proptest::collection::vec((coord, 0.01f64..10.0), 1..40)
}

fn histogram_pair() -> impl Strategy<Value = (Histogram, Histogram)> {
    proptest::collection::vec(1usize..5, 1..4).prop_flat_map(|shape| {
        entries_strategy(shape.clone()).prop_map(move |entries| {
            let mut sparse = Histogram::sparse(shape.clone()).unwrap();
            let mut dense = Histogram::zeros(shape.clone(), u128::MAX).unwrap();
            for (coord, mass) in &entries {
                sparse.add(coord, *mass).unwrap();
                dense.add(coord, *mass).unwrap();
            }
            (sparse, dense)
        })
    })
}

proptest! {
    #[test]
    fn coalescing_twice_equals_coalescing_once((sparse, _) in histogram_pair()) {
        let once = sparse.clone().coalesced();
        let twice = once.clone().coalesced();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn marginalizing_nothing_is_identity((sparse, dense) in histogram_pair()) {
        for hist in [&sparse, &dense] {
            let same = marginalize(hist, &[], false).unwrap();
            prop_assert_eq!(same.max_abs_diff(hist).unwrap(), 0.0);
        }
    }

    #[test]
    fn marginalizing_everything_yields_total((sparse, dense) in histogram_pair()) {
        for hist in [&sparse, &dense] {
            let all: Vec<usize> = (0..hist.rank()).collect();
            let scalar = marginalize(hist, &all, false).unwrap();
            prop_assert_eq!(scalar.rank(), 0);
            prop_assert!((scalar.total() - hist.total()).abs() <= 1e-9 * hist.total());
        }
    }

    #[test]
    fn normalizing_twice_reports_unit_mass((sparse, _) in histogram_pair()) {
        let (once, _) = normalize(&sparse).unwrap();
        let (_, total) = normalize(&once).unwrap();
        prop_assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sparse_and_dense_paths_agree((sparse, dense) in histogram_pair(), axis in 0usize..3) {
        prop_assert!(sparse.max_abs_diff(&dense).unwrap() < 1e-9);

        let (ps, ts) = normalize(&sparse).unwrap();
        let (pd, td) = normalize(&dense).unwrap();
        prop_assert!((ts - td).abs() < 1e-9);
        prop_assert!((entropy(&ps) - entropy(&pd)).abs() < 1e-9);

        let axis = axis % sparse.rank();
        for keep in [false, true] {
            let ms = marginalize(&sparse, &[axis], keep).unwrap();
            let md = marginalize(&dense, &[axis], keep).unwrap();
            prop_assert!(ms.is_sparse());
            prop_assert!(!md.is_sparse());
            prop_assert!(ms.max_abs_diff(&md).unwrap() < 1e-9);
        }
    }
}

fn deterministic_stream(samples: usize, dim: usize, batch: usize) -> Vec<SampleBatch> {
    // Weyl sequence: deterministic and well spread over the unit cube.
    let alphas: Vec<f64> = (0..dim).map(|d| ((d + 2) as f64).sqrt().fract()).collect();
    let mut out = Vec::new();
    let mut values = Vec::with_capacity(batch * dim);
    for n in 0..samples {
        for alpha in &alphas {
            values.push((0.5 + n as f64 * alpha).fract() * 1.2 - 0.1);
        }
        if values.len() == batch * dim {
            out.push(SampleBatch::new(dim, std::mem::take(&mut values)).unwrap());
        }
    }
    if !values.is_empty() {
        out.push(SampleBatch::new(dim, values).unwrap());
    }
    out
}

#[test]
fn groupby_does_not_change_bin_counts() {
    let grid = BinGrid::new(vec![0.0; 3], vec![1.0; 3], 12).unwrap();
    let stream = deterministic_stream(1 << 16, 3, 1000);
    let reduce = |groupby: usize, dense_limit: u128| {
        let options = ReduceOptions {
            groupby,
            dense_limit,
        };
        reduce_histogram(stream.iter().cloned().map(Ok), &grid, &options, None)
            .unwrap()
            .histogram
    };

    let small = reduce(256, 0);
    let large = reduce(4096, 0);
    assert!(small.is_sparse());
    assert_eq!(small, large);
    assert_eq!(small.total(), (1u64 << 16) as f64);

    let dense = reduce(4096, u128::MAX);
    assert!(!dense.is_sparse());
    assert_eq!(dense.max_abs_diff(&small).unwrap(), 0.0);
}
