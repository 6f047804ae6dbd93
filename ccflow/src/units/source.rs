//! Source units: one translation unit and the artifacts built from it.

use crate::core::{Language, Stage, UnitState};
use crate::errors::UsageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One translation unit declared to a build.
///
/// A unit only moves forward: [`SourceUnit::advance`] is the single mutator
/// and it refuses any edge that does not start at the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    name: String,
    path: PathBuf,
    language: Language,
    state: UnitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    preprocessed: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assembly: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<PathBuf>,
    history: Vec<UnitState>,
}

impl SourceUnit {
    /// Declares a source file as a unit.
    ///
    /// The unit name is the file stem; artifact paths are derived from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, is not a regular file,
    /// has an unsupported extension, or has no usable stem.
    pub fn declare(path: impl Into<PathBuf>) -> Result<Self, UsageError> {
        let path = path.into();

        if !path.is_file() {
            return Err(UsageError::new(format!(
                "missing declared file '{}'",
                path.display()
            )));
        }

        let language = Language::from_path(&path).ok_or_else(|| {
            UsageError::new(format!(
                "unsupported source file '{}': expected a .c, .cc, .cpp, .cxx or .C file",
                path.display()
            ))
        })?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                UsageError::new(format!("cannot derive a unit name from '{}'", path.display()))
            })?
            .to_string();

        Ok(Self {
            name,
            path,
            language,
            state: UnitState::Declared,
            preprocessed: None,
            assembly: None,
            object: None,
            history: vec![UnitState::Declared],
        })
    }

    /// The unit name (file stem).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared source path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The unit's language.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// The furthest state reached.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Every state the unit has been in, oldest first.
    #[must_use]
    pub fn history(&self) -> &[UnitState] {
        &self.history
    }

    /// The artifact backing `state`, if the unit produced it.
    ///
    /// `Declared` maps to the source file itself.
    #[must_use]
    pub fn artifact(&self, state: UnitState) -> Option<&Path> {
        match state {
            UnitState::Declared => Some(&self.path),
            UnitState::Preprocessed => self.preprocessed.as_deref(),
            UnitState::AssembledText => self.assembly.as_deref(),
            UnitState::Object => self.object.as_deref(),
        }
    }

    /// The artifact of the current state.
    #[must_use]
    pub fn latest_artifact(&self) -> Option<&Path> {
        self.artifact(self.state)
    }

    /// The object file, once the unit reached the object state.
    #[must_use]
    pub fn object(&self) -> Option<&Path> {
        self.object.as_deref()
    }

    /// Where `stage` writes its artifact for this unit under `out_dir`.
    #[must_use]
    pub fn artifact_path(&self, out_dir: &Path, stage: Stage) -> Option<PathBuf> {
        stage
            .artifact_extension(self.language)
            .map(|ext| out_dir.join(format!("{}.{ext}", self.name)))
    }

    /// Records that `stage` completed and produced `artifact`.
    ///
    /// # Errors
    ///
    /// Returns an error if `stage` is not a per-unit stage or does not start
    /// at the unit's current state.
    pub(crate) fn advance(&mut self, stage: Stage, artifact: PathBuf) -> Result<(), UsageError> {
        let (input, output) = stage.transition().ok_or_else(|| {
            UsageError::new(format!("stage '{stage}' cannot be run on a single unit"))
        })?;

        if input != self.state {
            return Err(UsageError::new(format!(
                "unit '{}' is {}, but {stage} expects {input}",
                self.name, self.state
            )));
        }

        match output {
            UnitState::Preprocessed => self.preprocessed = Some(artifact),
            UnitState::AssembledText => self.assembly = Some(artifact),
            UnitState::Object => self.object = Some(artifact),
            UnitState::Declared => {}
        }
        self.state = output;
        self.history.push(output);
        Ok(())
    }
}
