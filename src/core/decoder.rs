use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use tracing::trace;

use super::features::{Feature, FeatureFlag};
use super::vendor::CpuIdentity;
use crate::cpuid::{LeafResult, LeafSource, StateComponents};
use crate::error::ParseError;

/// Engine knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Also require the OS to have enabled opmask and ZMM state before
    /// reporting AVX-512. Off by default: only the AVX2 cascade is checked.
    pub verify_avx512_state: bool,
}

/// Decoded support for every entry of the feature table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureSet {
    supported: [bool; Feature::COUNT],
}

impl FeatureSet {
    pub fn has(&self, feature: Feature) -> bool {
        self.supported[feature as usize]
    }

    /// All features with their support, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (Feature, bool)> + '_ {
        Feature::all().map(move |f| (f, self.has(f)))
    }

    pub fn supported(&self) -> impl Iterator<Item = Feature> + '_ {
        self.iter().filter(|(_, s)| *s).map(|(f, _)| f)
    }

    pub fn unsupported(&self) -> impl Iterator<Item = Feature> + '_ {
        self.iter().filter(|(_, s)| !*s).map(|(f, _)| f)
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter().map(|(feat, s)| (feat.name(), s))).finish()
    }
}

impl Serialize for FeatureSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Feature::COUNT))?;
        for (feature, supported) in self.iter() {
            map.serialize_entry(feature.name(), &supported)?;
        }
        map.end()
    }
}

/// Everything learned about one processor in a single detection run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CpuInfo {
    pub identity: CpuIdentity,
    pub features: FeatureSet,
    /// OS state mask, if decoding needed to read it.
    pub os_state: Option<StateComponents>,
}

impl CpuInfo {
    pub fn detect<S: LeafSource + ?Sized>(source: &S, options: DecodeOptions) -> Self {
        let identity = CpuIdentity::identify(source);
        let mut decoder = Decoder::new(source, &identity, options);
        let features = decoder.decode_all();
        let os_state = decoder.os_state();
        Self {
            identity,
            features,
            os_state,
        }
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.has(feature)
    }

    pub fn is_64bit(&self) -> bool {
        self.has(Feature::LongMode)
    }

    /// The named features this processor lacks, each once, in the order given.
    /// An unknown name fails the whole check.
    pub fn missing<I, T>(&self, names: I) -> Result<Vec<Feature>, ParseError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut missing = Vec::new();
        for name in names {
            let feature: Feature = name.as_ref().parse()?;
            if !self.has(feature) && !missing.contains(&feature) {
                missing.push(feature);
            }
        }
        Ok(missing)
    }
}

const CACHE_SLOTS: usize = 8;

/// Per-run memo of leaf answers, so each leaf is queried once.
struct LeafCache {
    entries: [(u32, u32, LeafResult); CACHE_SLOTS],
    len: usize,
}

impl LeafCache {
    fn new() -> Self {
        Self {
            entries: [(0, 0, LeafResult::default()); CACHE_SLOTS],
            len: 0,
        }
    }

    fn query<S: LeafSource + ?Sized>(&mut self, source: &S, leaf: u32, subleaf: u32) -> LeafResult {
        if let Some((_, _, result)) = self.entries[..self.len]
            .iter()
            .find(|(l, s, _)| *l == leaf && *s == subleaf)
        {
            return *result;
        }
        let result = source.query(leaf, subleaf);
        if self.len < CACHE_SLOTS {
            self.entries[self.len] = (leaf, subleaf, result);
            self.len += 1;
        }
        result
    }
}

/// Decodes feature descriptors against one identity and its leaf source.
///
/// Gates are applied in order: range, raw bit, vendor, dependency, OS state.
/// Results are memoized, so evaluation order never changes the outcome.
pub struct Decoder<'a, S: LeafSource + ?Sized> {
    source: &'a S,
    identity: &'a CpuIdentity,
    options: DecodeOptions,
    cache: LeafCache,
    os_state: Option<StateComponents>,
    resolved: [Option<bool>; Feature::COUNT],
}

impl<'a, S: LeafSource + ?Sized> Decoder<'a, S> {
    pub fn new(source: &'a S, identity: &'a CpuIdentity, options: DecodeOptions) -> Self {
        Self {
            source,
            identity,
            options,
            cache: LeafCache::new(),
            os_state: None,
            resolved: [None; Feature::COUNT],
        }
    }

    pub fn decode_all(&mut self) -> FeatureSet {
        let mut supported = [false; Feature::COUNT];
        for feature in Feature::all() {
            supported[feature as usize] = self.decode(feature);
        }
        FeatureSet { supported }
    }

    pub fn decode(&mut self, feature: Feature) -> bool {
        if let Some(value) = self.resolved[feature as usize] {
            return value;
        }
        let flag = feature.flag();
        let value = self.evaluate(flag);
        trace!(feature = flag.name, supported = value, "Decoded feature");
        self.resolved[feature as usize] = Some(value);
        value
    }

    /// The bit as the processor reports it, before any gate but the range
    /// check. `None` when the leaf is beyond the supported range.
    pub fn raw_bit(&mut self, flag: &FeatureFlag) -> Option<bool> {
        if !self.identity.range.contains(flag.leaf) {
            return None;
        }
        let result = self.cache.query(self.source, flag.leaf.value(), flag.subleaf);
        Some(result.bit(flag.register, flag.bit))
    }

    /// The OS state mask, if any feature required reading it.
    pub fn os_state(&self) -> Option<StateComponents> {
        self.os_state
    }

    fn evaluate(&mut self, flag: &FeatureFlag) -> bool {
        if self.raw_bit(flag) != Some(true) {
            return false;
        }
        if let Some(vendor) = flag.vendor {
            if self.identity.vendor_class != vendor {
                return false;
            }
        }
        if let Some(dependency) = flag.requires {
            if !self.decode(dependency) {
                return false;
            }
        }

        let mut required = flag.os_state.unwrap_or_else(StateComponents::empty);
        if flag.feature == Feature::Avx512F && self.options.verify_avx512_state {
            required |= StateComponents::ZMM;
        }
        required.is_empty() || self.os_enabled(required)
    }

    fn os_enabled(&mut self, required: StateComponents) -> bool {
        // The state mask is only readable once XSAVE exists and the OS set OSXSAVE.
        let xsave = self.raw_bit(Feature::Xsave.flag()) == Some(true);
        let osxsave = self.raw_bit(Feature::Osxsave.flag()) == Some(true);
        if !(xsave && osxsave) {
            return false;
        }
        let state = match self.os_state {
            Some(state) => state,
            None => {
                let state = self.source.os_state();
                trace!(?state, "Read OS state mask");
                self.os_state = Some(state);
                state
            }
        };
        state.contains(required)
    }
}
