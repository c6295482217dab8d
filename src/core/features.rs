//! Feature Table
//! One descriptor per named capability: where its bit lives and which gates apply.
use std::fmt;
use std::str::FromStr;

use super::vendor::Vendor;
use crate::cpuid::{
    Leaf, Register, StateComponents, LEAF_EXT_FEATURES, LEAF_FEATURES, LEAF_STRUCTURED_EXT,
};
use crate::error::ParseError;

/// Named capabilities, in the documented enumeration order.
///
/// The discriminant indexes [`FEATURES`].
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    // Leaf 1, EDX
    Msr,
    Cx8,
    Sep,
    Cmov,
    Clfsh,
    Mmx,
    Fxsr,
    Sse,
    Sse2,
    // Leaf 1, ECX
    Sse3,
    Pclmulqdq,
    Monitor,
    Vmx,
    Ssse3,
    Fma,
    Cmpxchg16b,
    Sse41,
    Sse42,
    Movbe,
    Popcnt,
    Aes,
    Xsave,
    Osxsave,
    Avx,
    F16c,
    Rdrand,
    // Leaf 7, EBX
    Fsgsbase,
    Bmi1,
    Hle,
    Avx2,
    Bmi2,
    Erms,
    Invpcid,
    Rtm,
    Avx512F,
    Avx512Dq,
    Rdseed,
    Adx,
    Avx512Ifma,
    Avx512Pf,
    Avx512Er,
    Avx512Cd,
    Sha,
    Avx512Bw,
    Avx512Vl,
    // Leaf 7, ECX
    Prefetchwt1,
    Avx512Vbmi,
    Avx512Vbmi2,
    Avx512Vnni,
    Avx512Bitalg,
    Avx512Vpopcntdq,
    // Leaf 7, EDX
    Avx5124Vnniw,
    Avx5124Fmaps,
    // Leaf 0x80000001, ECX
    Lahf,
    Lzcnt,
    Abm,
    Sse4a,
    Xop,
    Tbm,
    // Leaf 0x80000001, EDX
    Syscall,
    Mmxext,
    Rdtscp,
    LongMode,
    Amd3dNowExt,
    Amd3dNow,
}

impl Feature {
    pub const COUNT: usize = TABLE.len();

    pub fn flag(self) -> &'static FeatureFlag {
        &FEATURES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.flag().name
    }

    pub fn all() -> impl Iterator<Item = Feature> {
        FEATURES.iter().map(|f| f.feature)
    }

    pub fn is_avx_family(self) -> bool {
        matches!(self, Feature::Avx | Feature::Avx2 | Feature::Avx512F)
            || self.flag().requires == Some(Feature::Avx512F)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = ParseError;

    /// Case-insensitive; `.`, `-`, `_` and spaces are ignored, so `sse4.1`,
    /// `SSE41` and `sse4_1` all name the same feature.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        if wanted.is_empty() {
            return Err(ParseError::UnknownFeature(s.to_string()));
        }
        Feature::all()
            .find(|f| normalize(f.name()) == wanted)
            .or_else(|| alias(&wanted))
            .ok_or_else(|| ParseError::UnknownFeature(s.to_string()))
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '.' | '-' | '_' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn alias(normalized: &str) -> Option<Feature> {
    match normalized {
        "LONGMODE" | "X8664" | "AMD64" => Some(Feature::LongMode),
        "AVX512" => Some(Feature::Avx512F),
        "RDRND" => Some(Feature::Rdrand),
        "PCLMUL" => Some(Feature::Pclmulqdq),
        "AESNI" => Some(Feature::Aes),
        "CX16" => Some(Feature::Cmpxchg16b),
        _ => None,
    }
}

/// Where a feature's bit lives and which gates override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlag {
    pub feature: Feature,
    pub name: &'static str,
    pub leaf: Leaf,
    pub subleaf: u32,
    pub register: Register,
    pub bit: u8,
    /// The bit is architecturally defined only for this vendor.
    pub vendor: Option<Vendor>,
    /// Must decode true before this feature can.
    pub requires: Option<Feature>,
    /// OS-enabled state components required, on top of XSAVE and OSXSAVE.
    pub os_state: Option<StateComponents>,
}

const fn flag(feature: Feature, name: &'static str, leaf: u32, register: Register, bit: u8) -> FeatureFlag {
    FeatureFlag {
        feature,
        name,
        leaf: Leaf::new(leaf),
        subleaf: 0,
        register,
        bit,
        vendor: None,
        requires: None,
        os_state: None,
    }
}

impl FeatureFlag {
    const fn only(mut self, vendor: Vendor) -> Self {
        self.vendor = Some(vendor);
        self
    }

    const fn requires(mut self, feature: Feature) -> Self {
        self.requires = Some(feature);
        self
    }

    const fn os_state(mut self, state: StateComponents) -> Self {
        self.os_state = Some(state);
        self
    }
}

use Feature as F;
use Register::{Ebx, Ecx, Edx};

const L1: u32 = LEAF_FEATURES;
const L7: u32 = LEAF_STRUCTURED_EXT;
const L81: u32 = LEAF_EXT_FEATURES;

const TABLE: [FeatureFlag; 65] = [
    flag(F::Msr, "MSR", L1, Edx, 5),
    flag(F::Cx8, "CX8", L1, Edx, 8),
    flag(F::Sep, "SEP", L1, Edx, 11),
    flag(F::Cmov, "CMOV", L1, Edx, 15),
    flag(F::Clfsh, "CLFSH", L1, Edx, 19),
    flag(F::Mmx, "MMX", L1, Edx, 23),
    flag(F::Fxsr, "FXSR", L1, Edx, 24),
    flag(F::Sse, "SSE", L1, Edx, 25),
    flag(F::Sse2, "SSE2", L1, Edx, 26),
    flag(F::Sse3, "SSE3", L1, Ecx, 0),
    flag(F::Pclmulqdq, "PCLMULQDQ", L1, Ecx, 1),
    flag(F::Monitor, "MONITOR", L1, Ecx, 3),
    flag(F::Vmx, "VMX", L1, Ecx, 5),
    flag(F::Ssse3, "SSSE3", L1, Ecx, 9),
    flag(F::Fma, "FMA", L1, Ecx, 12).requires(F::Avx),
    flag(F::Cmpxchg16b, "CMPXCHG16B", L1, Ecx, 13),
    flag(F::Sse41, "SSE4.1", L1, Ecx, 19),
    flag(F::Sse42, "SSE4.2", L1, Ecx, 20),
    flag(F::Movbe, "MOVBE", L1, Ecx, 22),
    flag(F::Popcnt, "POPCNT", L1, Ecx, 23),
    flag(F::Aes, "AES", L1, Ecx, 25),
    flag(F::Xsave, "XSAVE", L1, Ecx, 26),
    flag(F::Osxsave, "OSXSAVE", L1, Ecx, 27),
    flag(F::Avx, "AVX", L1, Ecx, 28).os_state(StateComponents::YMM),
    flag(F::F16c, "F16C", L1, Ecx, 29).requires(F::Avx),
    flag(F::Rdrand, "RDRAND", L1, Ecx, 30),
    flag(F::Fsgsbase, "FSGSBASE", L7, Ebx, 0),
    flag(F::Bmi1, "BMI1", L7, Ebx, 3),
    flag(F::Hle, "HLE", L7, Ebx, 4).only(Vendor::Intel),
    flag(F::Avx2, "AVX2", L7, Ebx, 5).requires(F::Avx),
    flag(F::Bmi2, "BMI2", L7, Ebx, 8),
    flag(F::Erms, "ERMS", L7, Ebx, 9),
    flag(F::Invpcid, "INVPCID", L7, Ebx, 10),
    flag(F::Rtm, "RTM", L7, Ebx, 11).only(Vendor::Intel),
    flag(F::Avx512F, "AVX512F", L7, Ebx, 16).requires(F::Avx2),
    flag(F::Avx512Dq, "AVX512DQ", L7, Ebx, 17).requires(F::Avx512F),
    flag(F::Rdseed, "RDSEED", L7, Ebx, 18),
    flag(F::Adx, "ADX", L7, Ebx, 19),
    flag(F::Avx512Ifma, "AVX512IFMA", L7, Ebx, 21).requires(F::Avx512F),
    flag(F::Avx512Pf, "AVX512PF", L7, Ebx, 26).requires(F::Avx512F),
    flag(F::Avx512Er, "AVX512ER", L7, Ebx, 27).requires(F::Avx512F),
    flag(F::Avx512Cd, "AVX512CD", L7, Ebx, 28).requires(F::Avx512F),
    flag(F::Sha, "SHA", L7, Ebx, 29),
    flag(F::Avx512Bw, "AVX512BW", L7, Ebx, 30).requires(F::Avx512F),
    flag(F::Avx512Vl, "AVX512VL", L7, Ebx, 31).requires(F::Avx512F),
    flag(F::Prefetchwt1, "PREFETCHWT1", L7, Ecx, 0),
    flag(F::Avx512Vbmi, "AVX512VBMI", L7, Ecx, 1).requires(F::Avx512F),
    flag(F::Avx512Vbmi2, "AVX512VBMI2", L7, Ecx, 6).requires(F::Avx512F),
    flag(F::Avx512Vnni, "AVX512VNNI", L7, Ecx, 11).requires(F::Avx512F),
    flag(F::Avx512Bitalg, "AVX512BITALG", L7, Ecx, 12).requires(F::Avx512F),
    flag(F::Avx512Vpopcntdq, "AVX512VPOPCNTDQ", L7, Ecx, 14).requires(F::Avx512F),
    flag(F::Avx5124Vnniw, "AVX512_4VNNIW", L7, Edx, 2).requires(F::Avx512F),
    flag(F::Avx5124Fmaps, "AVX512_4FMAPS", L7, Edx, 3).requires(F::Avx512F),
    flag(F::Lahf, "LAHF", L81, Ecx, 0),
    // LZCNT and ABM share a bit; the meaning depends on the vendor.
    flag(F::Lzcnt, "LZCNT", L81, Ecx, 5).only(Vendor::Intel),
    flag(F::Abm, "ABM", L81, Ecx, 5).only(Vendor::Amd),
    flag(F::Sse4a, "SSE4a", L81, Ecx, 6).only(Vendor::Amd),
    flag(F::Xop, "XOP", L81, Ecx, 11).only(Vendor::Amd),
    flag(F::Tbm, "TBM", L81, Ecx, 21).only(Vendor::Amd),
    flag(F::Syscall, "SYSCALL", L81, Edx, 11).only(Vendor::Intel),
    flag(F::Mmxext, "MMXEXT", L81, Edx, 22).only(Vendor::Amd),
    flag(F::Rdtscp, "RDTSCP", L81, Edx, 27).only(Vendor::Intel),
    flag(F::LongMode, "LM", L81, Edx, 29),
    flag(F::Amd3dNowExt, "3DNOWEXT", L81, Edx, 30).only(Vendor::Amd),
    flag(F::Amd3dNow, "3DNOW", L81, Edx, 31).only(Vendor::Amd),
];

pub static FEATURES: [FeatureFlag; 65] = TABLE;

// Entries sit at their discriminant and dependency chains terminate, since the
// decoder resolves prerequisites recursively.
const _: () = {
    let mut i = 0;
    while i < TABLE.len() {
        assert!(TABLE[i].feature as usize == i);
        assert!(TABLE[i].bit < 32);
        let mut dep = TABLE[i].requires;
        let mut depth = 0;
        while let Some(d) = dep {
            assert!(depth < TABLE.len());
            dep = TABLE[d as usize].requires;
            depth += 1;
        }
        i += 1;
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup() {
        assert_eq!("sse4.1".parse::<Feature>().unwrap(), Feature::Sse41);
        assert_eq!("SSE41".parse::<Feature>().unwrap(), Feature::Sse41);
        assert_eq!("sse4_2".parse::<Feature>().unwrap(), Feature::Sse42);
        assert_eq!("avx512f".parse::<Feature>().unwrap(), Feature::Avx512F);
        assert_eq!("AVX512".parse::<Feature>().unwrap(), Feature::Avx512F);
        assert_eq!("avx512_4fmaps".parse::<Feature>().unwrap(), Feature::Avx5124Fmaps);
        assert_eq!("3dnow".parse::<Feature>().unwrap(), Feature::Amd3dNow);
        assert_eq!("rdrnd".parse::<Feature>().unwrap(), Feature::Rdrand);
        assert_eq!("longmode".parse::<Feature>().unwrap(), Feature::LongMode);
        assert_eq!("lm".parse::<Feature>().unwrap(), Feature::LongMode);
        assert!("avx1024".parse::<Feature>().is_err());
        assert!("".parse::<Feature>().is_err());
        assert!("...".parse::<Feature>().is_err());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<String> = Feature::all().map(|f| normalize(f.name())).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_every_name_round_trips() {
        for feature in Feature::all() {
            assert_eq!(feature.name().parse::<Feature>().unwrap(), feature);
        }
    }

    #[test]
    fn test_vmx_and_aes_use_distinct_bits() {
        let vmx = Feature::Vmx.flag();
        let aes = Feature::Aes.flag();
        assert_eq!((vmx.leaf, vmx.register, vmx.bit), (Leaf::new(1), Register::Ecx, 5));
        assert_eq!((aes.leaf, aes.register, aes.bit), (Leaf::new(1), Register::Ecx, 25));
    }

    #[test]
    fn test_vendor_exclusive_bits_live_in_extended_leaf() {
        for flag in FEATURES.iter().filter(|f| f.vendor.is_some()) {
            if matches!(flag.feature, Feature::Hle | Feature::Rtm) {
                continue;
            }
            assert!(flag.leaf.is_extended(), "{} should be extended", flag.name);
            assert!(matches!(flag.register, Register::Ecx | Register::Edx));
        }
    }

    #[test]
    fn test_avx_cascade_wiring() {
        assert_eq!(Feature::Avx.flag().os_state, Some(StateComponents::YMM));
        assert_eq!(Feature::Avx2.flag().requires, Some(Feature::Avx));
        assert_eq!(Feature::Avx512F.flag().requires, Some(Feature::Avx2));
        assert!(Feature::Avx512Vl.is_avx_family());
        assert!(!Feature::Fma.is_avx_family());
    }
}
