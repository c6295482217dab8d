use tracing::trace;

use super::range::LeafRange;
use crate::cpuid::{Leaf, LeafSource, Register};
use crate::error::ParseError;

/// Checks one arbitrary bit of one leaf.
///
/// `leaf` may be given as its unsigned value or as the signed reinterpretation
/// of an extended leaf; both name the same leaf. Out-of-range leaves, register
/// indices above 3 and bit indices above 31 all answer `false`, and no query is
/// issued for them.
pub fn check_bit<S: LeafSource + ?Sized>(
    source: &S,
    range: &LeafRange,
    leaf: impl Into<Leaf>,
    subleaf: u32,
    register: u8,
    bit: u8,
) -> bool {
    let leaf = leaf.into();
    let Ok(register) = Register::try_from(register) else {
        return false;
    };
    if bit >= 32 || !range.contains(leaf) {
        return false;
    }
    let set = source.query(leaf.value(), subleaf).bit(register, bit);
    trace!(%leaf, subleaf, %register, bit, set, "Probed CPUID bit");
    set
}

/// Reads a register given as an index or a name. Numeric indices pass through
/// unchecked, so 4 and above reach [`check_bit`] and read as unset.
pub fn register_index(text: &str) -> Result<u8, ParseError> {
    match text.trim().parse::<u8>() {
        Ok(index) => Ok(index),
        Err(_) => text.parse::<Register>().map(|r| r as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::snapshot::{fixtures, LeafSnapshot};
    use crate::cpuid::{LeafResult, StateComponents};
    use std::cell::Cell;

    struct CountingSource {
        inner: LeafSnapshot,
        queries: Cell<usize>,
    }

    impl LeafSource for CountingSource {
        fn query(&self, leaf: u32, subleaf: u32) -> LeafResult {
            self.queries.set(self.queries.get() + 1);
            self.inner.query(leaf, subleaf)
        }

        fn os_state(&self) -> StateComponents {
            self.inner.os_state()
        }
    }

    fn host() -> LeafSnapshot {
        fixtures::base("GenuineIntel", 7, 0x8000_0001)
            .with_leaf(1u32, LeafResult::new(0, 0, 1 << 25, 1 << 26))
            .with_subleaf(7u32, 1, LeafResult::new(1 << 4, 0, 0, 0))
            .with_leaf(0x8000_0001u32, LeafResult::new(0, 0, 0, 1 << 29))
    }

    #[test]
    fn test_standard_bits() {
        let source = host();
        let range = LeafRange::discover(&source);
        assert!(check_bit(&source, &range, 1u32, 0, 2, 25));
        assert!(check_bit(&source, &range, 1u32, 0, 3, 26));
        assert!(!check_bit(&source, &range, 1u32, 0, 2, 5));
        assert!(check_bit(&source, &range, 7u32, 1, 0, 4));
        assert!(!check_bit(&source, &range, 7u32, 0, 0, 4));
    }

    #[test]
    fn test_signed_extended_leaf_matches_unsigned() {
        let source = host();
        let range = LeafRange::discover(&source);
        for bit in 0..32u8 {
            for register in 0..4u8 {
                assert_eq!(
                    check_bit(&source, &range, 0x8000_0001u32, 0, register, bit),
                    check_bit(&source, &range, 0x8000_0001u32 as i32, 0, register, bit),
                );
            }
        }
        assert!(check_bit(&source, &range, -2147483647i32, 0, 3, 29));
    }

    #[test]
    fn test_register_index_accepts_names_and_raw_indices() {
        assert_eq!(register_index("ecx"), Ok(2));
        assert_eq!(register_index(" EDX "), Ok(3));
        assert_eq!(register_index("0"), Ok(0));
        assert_eq!(register_index("4"), Ok(4));
        assert_eq!(register_index("255"), Ok(255));
        assert!(matches!(register_index("esp"), Err(ParseError::InvalidRegister(_))));
        assert!(register_index("256").is_err());

        let source = host();
        let range = LeafRange::discover(&source);
        let index = register_index("4").unwrap();
        assert!(!check_bit(&source, &range, 1u32, 0, index, 25));
        let index = register_index("ecx").unwrap();
        assert!(check_bit(&source, &range, 1u32, 0, index, 25));
    }

    #[test]
    fn test_invalid_arguments_are_false_without_query() {
        let source = CountingSource {
            inner: host(),
            queries: Cell::new(0),
        };
        let range = LeafRange::discover(&source.inner);

        assert!(!check_bit(&source, &range, 1u32, 0, 4, 25));
        assert!(!check_bit(&source, &range, 1u32, 0, 255, 0));
        assert!(!check_bit(&source, &range, 1u32, 0, 2, 32));
        assert!(!check_bit(&source, &range, 1u32, 0, 2, 255));
        assert!(!check_bit(&source, &range, 8u32, 0, 0, 0));
        assert!(!check_bit(&source, &range, 0x8000_0002u32, 0, 0, 0));
        assert!(!check_bit(&source, &range, -1i32, 0, 0, 0));
        assert_eq!(source.queries.get(), 0);

        assert!(check_bit(&source, &range, 1u32, 0, 2, 25));
        assert_eq!(source.queries.get(), 1);
    }
}
