use serde::Serialize;
use tracing::debug;

use crate::cpuid::{Leaf, LeafSource, EXTENDED_BASE, LEAF_VENDOR};

/// Highest valid standard and extended leaves of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeafRange {
    pub max_standard: u32,
    pub max_extended: u32,
}

impl LeafRange {
    /// Queries leaf 0 and the extended base. Leaf 0 is valid on every
    /// CPUID-capable processor, so this cannot fail.
    pub fn discover<S: LeafSource + ?Sized>(source: &S) -> Self {
        let max_standard = source.query(LEAF_VENDOR, 0).eax;
        let max_extended = source.query(EXTENDED_BASE, 0).eax;
        debug!(
            max_standard = %Leaf::new(max_standard),
            max_extended = %Leaf::new(max_extended),
            "Discovered CPUID leaf range"
        );
        Self {
            max_standard,
            max_extended,
        }
    }

    /// Older parts answer the extended base with standard-leaf data; a value
    /// below the base means no extended leaves exist.
    pub fn has_extended(&self) -> bool {
        self.max_extended >= EXTENDED_BASE
    }

    pub fn contains(&self, leaf: impl Into<Leaf>) -> bool {
        let leaf = leaf.into();
        if leaf.is_extended() {
            self.has_extended() && leaf.value() <= self.max_extended
        } else {
            leaf.value() <= self.max_standard
        }
    }
}
