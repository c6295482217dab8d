#[cfg(target_arch = "x86")]
use std::arch::x86 as arch;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64 as arch;

use super::{LeafResult, LeafSource, StateComponents, LEAF_FEATURES, LEAF_VENDOR};

/// OSXSAVE: the OS has set CR4.OSXSAVE, so XGETBV is usable.
const ECX_OSXSAVE: u32 = 1 << 27;

/// The executing processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSource;

impl LeafSource for NativeSource {
    fn query(&self, leaf: u32, subleaf: u32) -> LeafResult {
        cpuid_count(leaf, subleaf)
    }

    fn os_state(&self) -> StateComponents {
        // XGETBV raises #UD unless the OS set OSXSAVE.
        if cpuid_count(LEAF_VENDOR, 0).eax < LEAF_FEATURES {
            return StateComponents::empty();
        }
        if cpuid_count(LEAF_FEATURES, 0).ecx & ECX_OSXSAVE == 0 {
            return StateComponents::empty();
        }
        StateComponents::from_bits_truncate(read_xcr0())
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
#[allow(unused_unsafe)]
fn cpuid_count(leaf: u32, subleaf: u32) -> LeafResult {
    if !cpuid_available() {
        return LeafResult::default();
    }
    let res = unsafe { arch::__cpuid_count(leaf, subleaf) };
    LeafResult::new(res.eax, res.ebx, res.ecx, res.edx)
}

// Pre-Pentium 32-bit parts may lack the instruction entirely.
#[cfg(target_arch = "x86")]
fn cpuid_available() -> bool {
    arch::has_cpuid()
}

#[cfg(target_arch = "x86_64")]
fn cpuid_available() -> bool {
    true
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline]
fn cpuid_count(_leaf: u32, _subleaf: u32) -> LeafResult {
    LeafResult::default()
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn read_xcr0() -> u64 {
    #[target_feature(enable = "xsave")]
    unsafe fn xgetbv0() -> u64 {
        arch::_xgetbv(0)
    }
    // Only reached after OSXSAVE was observed set.
    unsafe { xgetbv0() }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn read_xcr0() -> u64 {
    0
}
