use amsi_mcmc::{BoxUniform, ChainRun, Sampler, SamplerConfig};
use proptest::prelude::*;

fn flat(_: &[f64], _: &[f64]) -> f64 {
    0.0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn chunks_partition_the_kept_steps(start in 0u64..12, extra in 0u64..20, groupby in 1usize..8) {
        let stop = start + extra;
        let prior = BoxUniform::new(vec![0.0], vec![1.0]).unwrap();
        let config = SamplerConfig { batch_size: 3, ..SamplerConfig::default() };
        let sampler = Sampler::new(&flat, &prior, &[], config).unwrap();
        let run = ChainRun { start, stop, groupby };
        let sizes: Vec<usize> = sampler.chain(&run).unwrap().map(|chunk| chunk.unwrap().len()).collect();

        let kept = (stop - start) as usize;
        prop_assert_eq!(sizes.iter().sum::<usize>(), 3 * kept);
        prop_assert!(sizes.iter().all(|&len| len <= 3 * groupby));
        if kept > 0 {
            prop_assert_eq!(sizes.len(), kept.div_ceil(groupby));
        }
    }
}
