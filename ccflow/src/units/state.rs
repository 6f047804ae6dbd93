//! The unit table of a build.

use super::SourceUnit;
use crate::core::{StageResult, UnitState};
use crate::errors::{StageFailureError, ToolInvocationError, UsageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Why a unit stopped short of its target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFailure {
    /// A tool ran and failed, timed out, or was interrupted.
    Stage(StageFailureError),
    /// A tool could not be started.
    ToolInvocation(ToolInvocationError),
}

impl UnitFailure {
    /// The raw diagnostic text to show the user.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Stage(e) => e.diagnostic.clone(),
            Self::ToolInvocation(e) => e.to_string(),
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(e) => write!(f, "{e}"),
            Self::ToolInvocation(e) => write!(f, "{e}"),
        }
    }
}

/// Everything the orchestrator tracks for one unit.
#[derive(Debug, Clone)]
pub struct UnitRecord {
    /// The unit and its artifacts.
    pub unit: SourceUnit,
    /// Results of every stage run for the unit, in order.
    pub results: Vec<StageResult>,
    /// Set when the unit stopped because of a failure.
    pub failure: Option<UnitFailure>,
    /// Set when fail-fast stopped the unit before its target.
    pub halted: bool,
}

impl UnitRecord {
    /// Creates a record for a freshly declared unit.
    #[must_use]
    pub fn new(unit: SourceUnit) -> Self {
        Self {
            unit,
            results: Vec::new(),
            failure: None,
            halted: false,
        }
    }

    /// Returns true if the unit failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Maps each declared unit to its furthest completed state.
///
/// Declaration order is preserved; it is the order objects are linked in.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    records: Vec<UnitRecord>,
    by_name: HashMap<String, usize>,
}

impl PipelineState {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit to the table.
    ///
    /// # Errors
    ///
    /// Returns an error if a unit with the same name is already declared,
    /// since both would write the same artifact paths.
    pub fn declare(&mut self, unit: SourceUnit) -> Result<(), UsageError> {
        if let Some(&index) = self.by_name.get(unit.name()) {
            return Err(UsageError::new(format!(
                "units '{}' and '{}' share the name '{}' and would overwrite each other's artifacts",
                self.records[index].unit.path().display(),
                unit.path().display(),
                unit.name()
            )));
        }
        self.by_name.insert(unit.name().to_string(), self.records.len());
        self.records.push(UnitRecord::new(unit));
        Ok(())
    }

    /// Number of declared units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no unit is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in declaration order.
    #[must_use]
    pub fn records(&self) -> &[UnitRecord] {
        &self.records
    }

    /// Looks up a record by unit name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UnitRecord> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    /// The furthest state reached by a unit.
    #[must_use]
    pub fn furthest(&self, name: &str) -> Option<UnitState> {
        self.get(name).map(|r| r.unit.state())
    }

    /// Names of units that have not reached `state`, in declaration order.
    #[must_use]
    pub fn units_below(&self, state: UnitState) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.unit.state() < state)
            .map(|r| r.unit.name().to_string())
            .collect()
    }

    /// Moves every record out so workers can own them exclusively.
    pub(crate) fn take_records(&mut self) -> Vec<UnitRecord> {
        std::mem::take(&mut self.records)
    }

    /// Puts records back after the join barrier.
    ///
    /// Records must come back in declaration order.
    pub(crate) fn restore_records(&mut self, records: Vec<UnitRecord>) {
        debug_assert_eq!(records.len(), self.by_name.len());
        self.records = records;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stage;
    use std::path::{Path, PathBuf};

    fn unit(dir: &Path, file: &str) -> SourceUnit {
        let path = dir.join(file);
        std::fs::write(&path, "").unwrap();
        SourceUnit::declare(path).unwrap()
    }

    #[test]
    fn test_declare_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new();
        state.declare(unit(dir.path(), "b.c")).unwrap();
        state.declare(unit(dir.path(), "a.c")).unwrap();

        let names: Vec<_> = state.records().iter().map(|r| r.unit.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(state.len(), 2);
        assert_eq!(state.furthest("a"), Some(UnitState::Declared));
        assert_eq!(state.furthest("zzz"), None);
    }

    #[test]
    fn test_duplicate_unit_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut state = PipelineState::new();
        state.declare(unit(dir.path(), "util.c")).unwrap();

        let err = state.declare(unit(dir.path(), "sub/util.c")).unwrap_err();
        assert!(err.message.contains("share the name 'util'"));
    }

    #[test]
    fn test_units_below() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new();
        let mut a = unit(dir.path(), "a.c");
        a.advance(Stage::ToObject, PathBuf::from("a.o")).unwrap();
        state.declare(a).unwrap();
        state.declare(unit(dir.path(), "b.c")).unwrap();

        assert_eq!(state.units_below(UnitState::Object), vec!["b"]);
        assert!(state.units_below(UnitState::Declared).is_empty());
    }

    #[test]
    fn test_take_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new();
        state.declare(unit(dir.path(), "a.c")).unwrap();

        let mut records = state.take_records();
        records[0].halted = true;
        state.restore_records(records);

        assert!(state.get("a").unwrap().halted);
    }
}
