//! Per-core uniformity survey.
//!
//! Detection assumes every logical core reports the same feature bits. This
//! module checks the assumption by pinning one scoped thread to each core and
//! sampling the feature-bearing leaves there.
use core_affinity::CoreId;
use std::thread;
use tracing::{debug, warn};

use super::range::LeafRange;
use crate::cpuid::{
    Leaf, LeafResult, LeafSource, NativeSource, LEAF_EXT_FEATURES, LEAF_FEATURES,
    LEAF_STRUCTURED_EXT,
};

/// Leaves compared across cores.
pub const SURVEYED_LEAVES: [u32; 3] = [LEAF_FEATURES, LEAF_STRUCTURED_EXT, LEAF_EXT_FEATURES];

/// Leaf 1 EBX bits 31:24 hold the initial APIC ID, which differs per core by design.
const APIC_ID_MASK: u32 = 0xFF00_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSample {
    pub core: usize,
    /// False when the thread could not be pinned; the sample then came from
    /// whichever core the scheduler chose.
    pub pinned: bool,
    pub leaves: Vec<(Leaf, LeafResult)>,
}

/// Reads the surveyed leaves that `range` says exist, with per-core fields masked.
pub fn sample<S: LeafSource + ?Sized>(source: &S, range: &LeafRange) -> Vec<(Leaf, LeafResult)> {
    SURVEYED_LEAVES
        .iter()
        .filter(|&&leaf| range.contains(leaf))
        .map(|&leaf| {
            let mut result = source.query(leaf, 0);
            if leaf == LEAF_FEATURES {
                result.ebx &= !APIC_ID_MASK;
            }
            (Leaf::new(leaf), result)
        })
        .collect()
}

/// Pins the current thread to `core_ids[index]`. False when the index is out of
/// range or the OS refuses.
pub fn pin_thread(core_ids: &[CoreId], index: usize) -> bool {
    match core_ids.get(index) {
        Some(&id) => core_affinity::set_for_current(id),
        None => false,
    }
}

/// Samples every core the OS exposes. Empty when the core list is unavailable.
pub fn survey() -> Vec<CoreSample> {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let range = LeafRange::discover(&NativeSource);
    debug!(cores = core_ids.len(), "Surveying CPUID across cores");

    thread::scope(|scope| {
        let handles: Vec<_> = core_ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let (core_ids, range) = (&core_ids, &range);
                let core = id.id;
                scope.spawn(move || CoreSample {
                    core,
                    pinned: pin_thread(core_ids, index),
                    leaves: sample(&NativeSource, range),
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect()
    })
}

/// Cores whose samples differ from the first core's.
pub fn divergent(samples: &[CoreSample]) -> Vec<usize> {
    let Some((first, rest)) = samples.split_first() else {
        return Vec::new();
    };
    let cores: Vec<usize> = rest
        .iter()
        .filter(|s| s.leaves != first.leaves)
        .map(|s| s.core)
        .collect();
    for core in &cores {
        warn!(core, reference = first.core, "Core reports different feature leaves");
    }
    cores
}
