use serde::Serialize;
use std::fmt;
use tracing::debug;

use super::range::LeafRange;
use crate::cpuid::{LeafSource, LEAF_BRAND_FIRST, LEAF_BRAND_LAST, LEAF_VENDOR};

pub const VENDOR_INTEL: &str = "GenuineIntel";
pub const VENDOR_AMD: &str = "AuthenticAMD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Vendor {
    Intel,
    Amd,
    Other,
}

impl Vendor {
    pub fn classify(vendor: &str) -> Self {
        match vendor {
            VENDOR_INTEL => Vendor::Intel,
            VENDOR_AMD => Vendor::Amd,
            _ => Vendor::Other,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vendor::Intel => "Intel",
            Vendor::Amd => "AMD",
            Vendor::Other => "Other",
        })
    }
}

/// Who made the processor and which leaves it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuIdentity {
    /// Raw 12-byte vendor string, kept even when unrecognized.
    pub vendor: String,
    /// Processor brand string, empty when the brand leaves are out of range.
    pub brand: String,
    pub range: LeafRange,
    pub vendor_class: Vendor,
}

impl CpuIdentity {
    pub fn identify<S: LeafSource + ?Sized>(source: &S) -> Self {
        let range = LeafRange::discover(source);
        let vendor = read_vendor(source);
        let brand = if range.contains(LEAF_BRAND_LAST) {
            read_brand(source)
        } else {
            String::new()
        };
        let vendor_class = Vendor::classify(&vendor);

        debug!(%vendor, %brand, ?vendor_class, "Identified processor");

        Self {
            vendor,
            brand,
            range,
            vendor_class,
        }
    }
}

/// Leaf 0 spells the vendor across EBX, EDX, ECX in that order.
fn read_vendor<S: LeafSource + ?Sized>(source: &S) -> String {
    let leaf = source.query(LEAF_VENDOR, 0);
    let mut bytes = [0u8; 12];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip([leaf.ebx, leaf.edx, leaf.ecx]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    text_from_bytes(&bytes)
}

fn read_brand<S: LeafSource + ?Sized>(source: &S) -> String {
    let mut bytes = [0u8; 48];
    let leaves = LEAF_BRAND_FIRST..=LEAF_BRAND_LAST;
    for (chunk, leaf) in bytes.chunks_exact_mut(16).zip(leaves) {
        let words = source.query(leaf, 0).words();
        for (dst, word) in chunk.chunks_exact_mut(4).zip(words) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
    }
    // Intel pads the brand with leading spaces.
    text_from_bytes(&bytes).trim().to_string()
}

/// Reads up to the first NUL, as the processor terminates short strings.
fn text_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
