//! Hardware Detection Module
//! Detects the host processor once per process and answers named queries.
use std::sync::OnceLock;
use tracing::debug;

use super::decoder::{CpuInfo, DecodeOptions};
use super::features::Feature;
use super::probe;
use crate::cpuid::{Leaf, NativeSource};

static HOST: OnceLock<CpuInfo> = OnceLock::new();

/// The host processor, detected on first use with default options.
///
/// Concurrent first callers block until one of them finishes detection; all
/// of them observe the same value.
pub fn host() -> &'static CpuInfo {
    HOST.get_or_init(|| {
        let info = CpuInfo::detect(&NativeSource, DecodeOptions::default());
        debug!(
            vendor = %info.identity.vendor,
            supported = info.features.supported().count(),
            "Detected host processor"
        );
        info
    })
}

pub fn has(feature: Feature) -> bool {
    host().has(feature)
}

/// Raw 12-byte vendor string of the host.
pub fn vendor() -> &'static str {
    &host().identity.vendor
}

/// Host brand string, empty when the processor has no brand leaves.
pub fn brand() -> &'static str {
    &host().identity.brand
}

pub fn is_64bit() -> bool {
    host().is_64bit()
}

/// Host-bound [`probe::check_bit`], validated against the host's leaf range.
pub fn check_bit(leaf: impl Into<Leaf>, subleaf: u32, register: u8, bit: u8) -> bool {
    probe::check_bit(&NativeSource, &host().identity.range, leaf, subleaf, register, bit)
}

macro_rules! named_queries {
    ($($name:ident => $feature:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name() -> bool {
                has(Feature::$feature)
            }
        )*

        #[cfg(test)]
        const NAMED: &[(fn() -> bool, Feature)] = &[$(($name as fn() -> bool, Feature::$feature)),*];
    };
}

named_queries! {
    msr => Msr,
    cx8 => Cx8,
    sep => Sep,
    cmov => Cmov,
    clfsh => Clfsh,
    mmx => Mmx,
    fxsr => Fxsr,
    sse => Sse,
    sse2 => Sse2,
    sse3 => Sse3,
    pclmulqdq => Pclmulqdq,
    monitor => Monitor,
    vmx => Vmx,
    ssse3 => Ssse3,
    fma => Fma,
    cmpxchg16b => Cmpxchg16b,
    sse41 => Sse41,
    sse42 => Sse42,
    movbe => Movbe,
    popcnt => Popcnt,
    aes => Aes,
    xsave => Xsave,
    osxsave => Osxsave,
    avx => Avx,
    f16c => F16c,
    rdrand => Rdrand,
    fsgsbase => Fsgsbase,
    bmi1 => Bmi1,
    hle => Hle,
    avx2 => Avx2,
    bmi2 => Bmi2,
    erms => Erms,
    invpcid => Invpcid,
    rtm => Rtm,
    avx512f => Avx512F,
    avx512dq => Avx512Dq,
    rdseed => Rdseed,
    adx => Adx,
    avx512ifma => Avx512Ifma,
    avx512pf => Avx512Pf,
    avx512er => Avx512Er,
    avx512cd => Avx512Cd,
    sha => Sha,
    avx512bw => Avx512Bw,
    avx512vl => Avx512Vl,
    prefetchwt1 => Prefetchwt1,
    avx512vbmi => Avx512Vbmi,
    avx512vbmi2 => Avx512Vbmi2,
    avx512vnni => Avx512Vnni,
    avx512bitalg => Avx512Bitalg,
    avx512vpopcntdq => Avx512Vpopcntdq,
    avx512_4vnniw => Avx5124Vnniw,
    avx512_4fmaps => Avx5124Fmaps,
    lahf => Lahf,
    lzcnt => Lzcnt,
    abm => Abm,
    sse4a => Sse4a,
    xop => Xop,
    tbm => Tbm,
    syscall => Syscall,
    mmxext => Mmxext,
    rdtscp => Rdtscp,
    long_mode => LongMode,
    amd_3dnowext => Amd3dNowExt,
    amd_3dnow => Amd3dNow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_concurrent_first_use_sees_one_value() {
        let seen: Vec<usize> = (0..64)
            .into_par_iter()
            .map(|_| host() as *const CpuInfo as usize)
            .collect();
        let first = seen[0];
        assert!(seen.iter().all(|&p| p == first));
        assert_eq!(*host(), CpuInfo::detect(&NativeSource, DecodeOptions::default()));
    }

    #[test]
    fn test_named_queries_cover_table() {
        assert_eq!(NAMED.len(), Feature::COUNT);
        for (query, feature) in NAMED {
            assert_eq!(query(), host().has(*feature), "{}", feature);
        }
        let mut features: Vec<Feature> = NAMED.iter().map(|(_, f)| *f).collect();
        features.sort();
        features.dedup();
        assert_eq!(features.len(), Feature::COUNT);
    }

    #[test]
    fn test_host_identity_accessors() {
        assert_eq!(vendor(), host().identity.vendor);
        assert_eq!(brand(), brand().trim());
        assert_eq!(is_64bit(), long_mode());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_x86_64_baseline() {
        assert!(sse());
        assert!(sse2());
        assert!(long_mode());
        assert_eq!(sse2(), check_bit(1u32, 0, 3, 26));
        assert!(!check_bit(1u32, 0, 4, 26));
        assert!(!check_bit(1u32, 0, 3, 32));
    }
}
