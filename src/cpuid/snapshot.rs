use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

use super::{Leaf, LeafResult, LeafSource, StateComponents, EXTENDED_BASE};
use crate::core::range::LeafRange;
use crate::error::SnapshotError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Cap on leaves captured per class, in case a hypervisor reports a bogus maximum.
const MAX_CAPTURED_LEAVES: u32 = 0x40;

/// Leaves whose subleaf 1 carries feature data.
const MULTI_SUBLEAF_LEAVES: [u32; 2] = [0x7, 0xD];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub leaf: Leaf,
    #[serde(default)]
    pub subleaf: u32,
    #[serde(flatten)]
    pub result: LeafResult,
}

/// Recorded CPUID answers.
///
/// Serves as a replayable [`LeafSource`]: leaves that were never recorded read
/// back as zero, the same as a processor with no such feature bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSnapshot {
    pub version: u32,
    #[serde(default)]
    pub os_state: StateComponents,
    pub leaves: Vec<LeafEntry>,
}

impl Default for LeafSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl LeafSnapshot {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            os_state: StateComponents::empty(),
            leaves: Vec::new(),
        }
    }

    pub fn with_leaf(self, leaf: impl Into<Leaf>, result: LeafResult) -> Self {
        self.with_subleaf(leaf, 0, result)
    }

    pub fn with_subleaf(mut self, leaf: impl Into<Leaf>, subleaf: u32, result: LeafResult) -> Self {
        self.insert(leaf, subleaf, result);
        self
    }

    pub fn with_os_state(mut self, os_state: StateComponents) -> Self {
        self.os_state = os_state;
        self
    }

    /// Records a result, replacing any earlier one for the same leaf/subleaf.
    pub fn insert(&mut self, leaf: impl Into<Leaf>, subleaf: u32, result: LeafResult) {
        let leaf = leaf.into();
        match self
            .leaves
            .iter_mut()
            .find(|e| e.leaf == leaf && e.subleaf == subleaf)
        {
            Some(entry) => entry.result = result,
            None => self.leaves.push(LeafEntry {
                leaf,
                subleaf,
                result,
            }),
        }
    }

    pub fn get(&self, leaf: impl Into<Leaf>, subleaf: u32) -> Option<&LeafResult> {
        let leaf = leaf.into();
        self.leaves
            .iter()
            .find(|e| e.leaf == leaf && e.subleaf == subleaf)
            .map(|e| &e.result)
    }

    /// Records every in-range leaf of `source`, plus the OS state mask.
    pub fn capture<S: LeafSource + ?Sized>(source: &S) -> Self {
        let range = LeafRange::discover(source);
        let mut snapshot = Self::new().with_os_state(source.os_state());

        let standard_end = range.max_standard.min(MAX_CAPTURED_LEAVES);
        for leaf in 0..=standard_end {
            snapshot.record(source, leaf);
        }

        if range.has_extended() {
            let extended_end = range.max_extended.min(EXTENDED_BASE + MAX_CAPTURED_LEAVES);
            for leaf in EXTENDED_BASE..=extended_end {
                snapshot.record(source, leaf);
            }
        }

        debug!(leaves = snapshot.leaves.len(), "Captured CPUID snapshot");
        snapshot
    }

    fn record<S: LeafSource + ?Sized>(&mut self, source: &S, leaf: u32) {
        self.insert(leaf, 0, source.query(leaf, 0));
        if MULTI_SUBLEAF_LEAVES.contains(&leaf) {
            self.insert(leaf, 1, source.query(leaf, 1));
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Self = serde_json::from_reader(reader)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        debug!(leaves = snapshot.leaves.len(), path = ?path, "Loaded CPUID snapshot");
        Ok(snapshot)
    }
}

impl LeafSource for LeafSnapshot {
    fn query(&self, leaf: u32, subleaf: u32) -> LeafResult {
        self.get(leaf, subleaf).copied().unwrap_or_default()
    }

    fn os_state(&self) -> StateComponents {
        self.os_state
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unrecorded_leaf_reads_zero() {
        let snapshot = LeafSnapshot::new().with_leaf(1u32, LeafResult::new(1, 2, 3, 4));
        assert_eq!(snapshot.query(1, 0), LeafResult::new(1, 2, 3, 4));
        assert_eq!(snapshot.query(1, 1), LeafResult::default());
        assert_eq!(snapshot.query(0x8000_0001, 0), LeafResult::default());
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let mut snapshot = LeafSnapshot::new();
        snapshot.insert(7u32, 0, LeafResult::new(0, 1, 0, 0));
        snapshot.insert(7u32, 0, LeafResult::new(0, 2, 0, 0));
        assert_eq!(snapshot.leaves.len(), 1);
        assert_eq!(snapshot.query(7, 0).ebx, 2);
    }

    #[test]
    fn test_capture_respects_reported_range() {
        let source = fixtures::base("AuthenticAMD", 1, 0x8000_0001)
            .with_leaf(1u32, LeafResult::new(0, 0, 1, 0))
            .with_leaf(7u32, LeafResult::new(0, 0xFFFF_FFFF, 0, 0))
            .with_leaf(0x8000_0001u32, LeafResult::new(0, 0, 0, 1 << 29))
            .with_os_state(StateComponents::X87 | StateComponents::SSE);

        let captured = LeafSnapshot::capture(&source);

        // Leaf 7 lies beyond max_standard and must not be recorded.
        assert!(captured.get(7u32, 0).is_none());
        assert_eq!(captured.query(1, 0).ecx, 1);
        assert_eq!(captured.query(0x8000_0001, 0).edx, 1 << 29);
        assert_eq!(captured.os_state, StateComponents::X87 | StateComponents::SSE);
        assert_eq!(captured.leaves.len(), 4);
    }

    #[test]
    fn test_save_load_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = fixtures::base("GenuineIntel", 7, 0x8000_0004)
            .with_subleaf(7u32, 1, LeafResult::new(1, 0, 0, 0))
            .with_os_state(StateComponents::X87 | StateComponents::YMM);

        let temp_file = NamedTempFile::new()?;
        snapshot.save(temp_file.path())?;
        let loaded = LeafSnapshot::load(temp_file.path())?;

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.query(7, 1).eax, 1);
        Ok(())
    }

    #[test]
    fn test_load_rejects_future_version() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        std::fs::write(temp_file.path(), r#"{"version": 99, "leaves": []}"#)?;

        match LeafSnapshot::load(temp_file.path()) {
            Err(SnapshotError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, 99);
                assert_eq!(expected, SNAPSHOT_VERSION);
            }
            other => panic!("expected version error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = LeafSnapshot::load(Path::new("/nonexistent/cpuid-snapshot.json"));
        assert!(matches!(result, Err(SnapshotError::Io(_))));
    }
}
