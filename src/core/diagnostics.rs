use std::fmt;
use tracing::{debug, warn};

use super::decoder::{CpuInfo, DecodeOptions, Decoder};
use super::features::{Feature, FeatureFlag, FEATURES};
use super::vendor::Vendor;
use crate::cpuid::{LeafSource, StateComponents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Expected masking, reported for completeness.
    Notice,
    /// Plausible but unusual; often a hypervisor or an old processor.
    Suspicious,
    /// Raw bits and decoded support contradict each other.
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Suspicious,
    Inconsistent,
}

pub struct Diagnostics;

impl Diagnostics {
    /// Compares what the processor reports against what was decoded from it.
    ///
    /// `info` must have been detected from `source`.
    pub fn check_health<S: LeafSource + ?Sized>(source: &S, info: &CpuInfo) -> Vec<Finding> {
        let identity = &info.identity;
        let mut raw = Decoder::new(source, identity, DecodeOptions::default());
        let mut findings = Vec::new();

        // Check 1: Leaf range
        if !identity.range.has_extended() {
            findings.push(Finding::new(
                Severity::Suspicious,
                "No extended leaves reported; extended features read as unsupported",
            ));
        }

        // Check 2: Vendor
        if identity.vendor_class == Vendor::Other {
            findings.push(Finding::new(
                Severity::Suspicious,
                format!(
                    "Unrecognized vendor {:?}; vendor-exclusive features are masked",
                    identity.vendor
                ),
            ));
        }

        // Check 3: AVX cascade
        if raw_set(&mut raw, Feature::Avx) && !info.has(Feature::Avx) {
            let message = if !raw_set(&mut raw, Feature::Osxsave) {
                "AVX reported by the processor but OSXSAVE is clear"
            } else if !raw_set(&mut raw, Feature::Xsave) {
                "AVX reported by the processor without XSAVE"
            } else {
                "AVX reported by the processor but the OS has not enabled YMM state"
            };
            findings.push(Finding::new(Severity::Inconsistent, message));
        }
        if raw_set(&mut raw, Feature::Avx2) && !info.has(Feature::Avx) {
            findings.push(Finding::new(
                Severity::Inconsistent,
                "AVX2 reported by the processor but AVX is unusable",
            ));
        }

        // Check 4: AVX-512 without ZMM state
        let state = info.os_state.unwrap_or_default();
        if info.has(Feature::Avx512F) && !state.contains(StateComponents::ZMM) {
            findings.push(Finding::new(
                Severity::Suspicious,
                format!(
                    "AVX512F reported but the OS state mask {:#x} lacks opmask/ZMM state",
                    state.bits()
                ),
            ));
        }

        // Check 5: Vendor-gated bits on the other vendor
        for flag in FEATURES.iter() {
            let Some(vendor) = flag.vendor else { continue };
            if vendor == identity.vendor_class || shares_bit_with_usable(flag, identity.vendor_class) {
                continue;
            }
            if raw_set(&mut raw, flag.feature) {
                findings.push(Finding::new(
                    Severity::Notice,
                    format!(
                        "{} bit set on a {} processor; masked as {}-only",
                        flag.name, identity.vendor_class, vendor
                    ),
                ));
            }
        }

        for finding in &findings {
            match finding.severity {
                Severity::Notice => debug!(%finding, "Diagnostics"),
                _ => warn!(%finding, "Diagnostics"),
            }
        }
        findings
    }

    pub fn status(findings: &[Finding]) -> HealthStatus {
        match findings.iter().map(|f| f.severity).max() {
            Some(Severity::Inconsistent) => HealthStatus::Inconsistent,
            Some(Severity::Suspicious) => HealthStatus::Suspicious,
            Some(Severity::Notice) | None => HealthStatus::Healthy,
        }
    }
}

fn raw_set<S: LeafSource + ?Sized>(raw: &mut Decoder<'_, S>, feature: Feature) -> bool {
    raw.raw_bit(feature.flag()) == Some(true)
}

/// Whether another entry reads the same bit with meaning for `vendor`.
fn shares_bit_with_usable(flag: &FeatureFlag, vendor: Vendor) -> bool {
    FEATURES.iter().any(|other| {
        other.feature != flag.feature
            && other.leaf == flag.leaf
            && other.subleaf == flag.subleaf
            && other.register == flag.register
            && other.bit == flag.bit
            && other.vendor.map_or(true, |v| v == vendor)
    })
}
