use amsi_core::rng::{derive_labelled_seed, derive_substream_seed, RngHandle};

/// Derives the seed of the chain evaluating `mask_label` for sample `index`.
pub fn chain_seed(master_seed: u64, index: u64, mask_label: &str) -> u64 {
    derive_labelled_seed(derive_substream_seed(master_seed, index), mask_label)
}

/// RNG of the initial prior draw of a chain.
pub fn init_rng(chain_seed: u64) -> RngHandle {
    RngHandle::substream(chain_seed ^ 0xA5A5_A5A5_A5A5_A5A5, 0)
}

/// RNG of the proposals and acceptance draws of chain step `step`.
pub fn step_rng(chain_seed: u64, step: u64) -> RngHandle {
    RngHandle::substream(chain_seed, step)
}
