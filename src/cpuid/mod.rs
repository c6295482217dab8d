pub mod native;
pub mod snapshot;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

pub use native::NativeSource;

/// First extended leaf. Leaves at or above this value are logically unsigned.
pub const EXTENDED_BASE: u32 = 0x8000_0000;

pub const LEAF_VENDOR: u32 = 0x0;
pub const LEAF_FEATURES: u32 = 0x1;
pub const LEAF_STRUCTURED_EXT: u32 = 0x7;
pub const LEAF_EXT_FEATURES: u32 = 0x8000_0001;
pub const LEAF_BRAND_FIRST: u32 = 0x8000_0002;
pub const LEAF_BRAND_LAST: u32 = 0x8000_0004;

/// Register words returned by one CPUID query, in EAX, EBX, ECX, EDX order.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct LeafResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

const _: () = assert!(std::mem::size_of::<LeafResult>() == 16);

impl LeafResult {
    pub const fn new(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self { eax, ebx, ecx, edx }
    }

    pub fn words(&self) -> [u32; 4] {
        bytemuck::cast(*self)
    }

    pub fn register(&self, register: Register) -> u32 {
        self.words()[register as usize]
    }

    /// Returns whether `bit` of `register` is set. Bits above 31 are never set.
    pub fn bit(&self, register: Register, bit: u8) -> bool {
        bit < 32 && self.register(register) & (1u32 << bit) != 0
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Register {
    Eax = 0,
    Ebx = 1,
    Ecx = 2,
    Edx = 3,
}

impl Register {
    pub const ALL: [Register; 4] = [Register::Eax, Register::Ebx, Register::Ecx, Register::Edx];

    pub fn name(self) -> &'static str {
        match self {
            Register::Eax => "EAX",
            Register::Ebx => "EBX",
            Register::Ecx => "ECX",
            Register::Edx => "EDX",
        }
    }
}

impl TryFrom<u8> for Register {
    type Error = ParseError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Register::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| ParseError::InvalidRegister(index.to_string()))
    }
}

impl FromStr for Register {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Register::try_from(index);
        }
        Register::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseError::InvalidRegister(s.to_string()))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A CPUID function number.
///
/// Extended leaves live above `i32::MAX`, so callers holding them in a signed
/// integer see negative numbers. Converting from `i32` keeps the bit pattern;
/// the sign carries no meaning.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leaf(u32);

impl Leaf {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn as_signed(self) -> i32 {
        self.0 as i32
    }

    pub const fn is_extended(self) -> bool {
        self.0 >= EXTENDED_BASE
    }
}

impl From<u32> for Leaf {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<i32> for Leaf {
    fn from(value: i32) -> Self {
        Self(value as u32)
    }
}

impl FromStr for Leaf {
    type Err = ParseError;

    /// Accepts `7`, `0x80000001`, or the signed form `-2147483647`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u32::from_str_radix(&hex.replace('_', ""), 16).ok().map(Leaf::from)
        } else if trimmed.starts_with('-') {
            trimmed.parse::<i32>().ok().map(Leaf::from)
        } else {
            trimmed.parse::<u32>().ok().map(Leaf::from)
        };
        parsed.ok_or_else(|| ParseError::InvalidLeaf(s.to_string()))
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

bitflags! {
    /// Extended-state components enabled by the OS, as reported in XCR0.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StateComponents: u64 {
        /// x87 FPU state.
        const X87 = 1 << 0;
        /// XMM registers and MXCSR.
        const SSE = 1 << 1;
        /// Upper halves of YMM0-15.
        const AVX = 1 << 2;
        /// AVX-512 opmask registers k0-k7.
        const OPMASK = 1 << 5;
        /// Upper 256 bits of ZMM0-15.
        const ZMM_HI256 = 1 << 6;
        /// ZMM16-31.
        const HI16_ZMM = 1 << 7;
    }
}

impl StateComponents {
    pub const YMM: StateComponents = StateComponents::SSE.union(StateComponents::AVX);
    pub const ZMM: StateComponents = StateComponents::OPMASK
        .union(StateComponents::ZMM_HI256)
        .union(StateComponents::HI16_ZMM);
}

/// Anything that can answer CPUID queries.
///
/// `query` performs no range validation; callers consult a
/// [`LeafRange`](crate::core::range::LeafRange) first.
pub trait LeafSource {
    fn query(&self, leaf: u32, subleaf: u32) -> LeafResult;

    /// Extended-state components the OS has enabled. Only meaningful once
    /// OSXSAVE is known to be set; implementations return an empty mask otherwise.
    fn os_state(&self) -> StateComponents;
}

impl<S: LeafSource + ?Sized> LeafSource for &S {
    fn query(&self, leaf: u32, subleaf: u32) -> LeafResult {
        (**self).query(leaf, subleaf)
    }

    fn os_state(&self) -> StateComponents {
        (**self).os_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_and_unsigned_leaf_agree() {
        let unsigned = Leaf::from(0x8000_0001u32);
        let signed = Leaf::from(0x8000_0001u32 as i32);
        assert_eq!(unsigned, signed);
        assert!(signed.is_extended());
        assert_eq!(signed.as_signed(), -2147483647);
        assert!(!Leaf::from(7i32).is_extended());
    }

    #[test]
    fn test_leaf_parsing() {
        assert_eq!("7".parse::<Leaf>().unwrap(), Leaf::new(7));
        assert_eq!("0x80000001".parse::<Leaf>().unwrap(), Leaf::new(0x8000_0001));
        assert_eq!("-2147483647".parse::<Leaf>().unwrap(), Leaf::new(0x8000_0001));
        assert_eq!("0x8000_0004".parse::<Leaf>().unwrap(), Leaf::new(0x8000_0004));
        assert!("leaf".parse::<Leaf>().is_err());
        assert!("-".parse::<Leaf>().is_err());
        assert_eq!(Leaf::new(0x8000_0001).to_string(), "0x80000001");
    }

    #[test]
    fn test_register_parsing() {
        assert_eq!("ecx".parse::<Register>().unwrap(), Register::Ecx);
        assert_eq!("EDX".parse::<Register>().unwrap(), Register::Edx);
        assert_eq!("1".parse::<Register>().unwrap(), Register::Ebx);
        assert!("4".parse::<Register>().is_err());
        assert!("esp".parse::<Register>().is_err());
        assert!(Register::try_from(4).is_err());
    }

    #[test]
    fn test_bit_extraction() {
        let result = LeafResult::new(0, 1 << 5, 0x1000_0001, 1 << 31);
        assert_eq!(result.words(), [0, 1 << 5, 0x1000_0001, 1 << 31]);
        assert!(result.bit(Register::Ebx, 5));
        assert!(result.bit(Register::Ecx, 0));
        assert!(result.bit(Register::Ecx, 28));
        assert!(result.bit(Register::Edx, 31));
        assert!(!result.bit(Register::Eax, 0));
        assert!(!result.bit(Register::Edx, 32));
    }

    #[test]
    fn test_state_component_masks() {
        assert_eq!(StateComponents::YMM.bits(), 0b110);
        assert_eq!(StateComponents::ZMM.bits(), 0b1110_0000);
        let enabled = StateComponents::from_bits_truncate(0x7);
        assert!(enabled.contains(StateComponents::YMM));
        assert!(!enabled.contains(StateComponents::ZMM));
    }
}
