//! Runtime detection of x86 instruction-set extensions.
//!
//! The engine queries CPUID leaves through a [`cpuid::LeafSource`], learns the
//! valid leaf range, classifies the vendor and decodes a fixed feature table into
//! an immutable [`core::decoder::FeatureSet`]. The live processor is reached through
//! [`core::hardware`]; tests and replays use [`cpuid::snapshot::LeafSnapshot`].

pub mod core;
pub mod cpuid;
pub mod error;
pub mod report;

pub use crate::core::decoder::{CpuInfo, DecodeOptions, FeatureSet};
pub use crate::core::features::Feature;
pub use crate::core::vendor::{CpuIdentity, Vendor};
pub use crate::cpuid::{Leaf, LeafResult, LeafSource, Register};
