//! The stage graph of the separate-compilation pipeline.
//!
//! A translation unit moves through a fixed set of states. Every stage is an
//! edge between two of them, and edges only ever point forward:
//!
//! ```text
//! Declared --preprocess--> Preprocessed --to-assembly--> AssembledText --assemble--> Object
//!     \______________________________to-object_____________________________________/
//! ```

use crate::errors::UsageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Source language of a translation unit, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// C source (`.c`).
    C,
    /// C++ source (`.cc`, `.cpp`, `.cxx`, `.c++`, `.C`).
    Cxx,
}

impl Language {
    /// Detects the language from a source path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "c" => Some(Self::C),
            "C" | "cc" | "cpp" | "cxx" | "c++" => Some(Self::Cxx),
            _ => None,
        }
    }

    /// Extension of the preprocessed text artifact.
    #[must_use]
    pub fn preprocessed_extension(self) -> &'static str {
        match self {
            Self::C => "i",
            Self::Cxx => "ii",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::C => write!(f, "c"),
            Self::Cxx => write!(f, "c++"),
        }
    }
}

/// How far a translation unit has progressed.
///
/// The derived ordering is the pipeline order, so a unit's history can be
/// checked for monotonicity with plain comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Declared to the orchestrator, nothing built yet.
    #[default]
    Declared,
    /// Preprocessed text produced.
    Preprocessed,
    /// Assembly text produced.
    AssembledText,
    /// Relocatable object produced.
    Object,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::Preprocessed => write!(f, "preprocessed"),
            Self::AssembledText => write!(f, "assembled(text)"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// One pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Run the preprocessor over the source file.
    Preprocess,
    /// Compile preprocessed text to assembly.
    ToAssembly,
    /// Assemble assembly text into an object file.
    Assemble,
    /// Compile and assemble the source file in one invocation.
    ToObject,
    /// Link objects into an executable. Never run per unit.
    Link,
}

impl Stage {
    /// Returns the stage name as used in events and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::ToAssembly => "to-assembly",
            Self::Assemble => "assemble",
            Self::ToObject => "to-object",
            Self::Link => "link",
        }
    }

    /// The `(input, output)` unit states of a per-unit stage.
    ///
    /// Returns `None` for [`Stage::Link`], which operates on the whole unit
    /// table rather than on a single unit.
    #[must_use]
    pub fn transition(self) -> Option<(UnitState, UnitState)> {
        match self {
            Self::Preprocess => Some((UnitState::Declared, UnitState::Preprocessed)),
            Self::ToAssembly => Some((UnitState::Preprocessed, UnitState::AssembledText)),
            Self::Assemble => Some((UnitState::AssembledText, UnitState::Object)),
            Self::ToObject => Some((UnitState::Declared, UnitState::Object)),
            Self::Link => None,
        }
    }

    /// Extension of the artifact this stage writes for a unit of `language`.
    #[must_use]
    pub fn artifact_extension(self, language: Language) -> Option<&'static str> {
        match self {
            Self::Preprocess => Some(language.preprocessed_extension()),
            Self::ToAssembly => Some("s"),
            Self::Assemble | Self::ToObject => Some("o"),
            Self::Link => None,
        }
    }

    /// The staged edge leaving `state`, if any.
    fn staged_edge(state: UnitState) -> Option<Self> {
        match state {
            UnitState::Declared => Some(Self::Preprocess),
            UnitState::Preprocessed => Some(Self::ToAssembly),
            UnitState::AssembledText => Some(Self::Assemble),
            UnitState::Object => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edges to take on the way to the object state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Preprocess, compile to assembly, assemble. Every intermediate artifact
    /// stays on disk.
    #[default]
    Staged,
    /// Use the combined compile-to-object stage when going straight from
    /// `Declared` to `Object`.
    Direct,
}

/// Returns the ordered stages that move a unit from `from` to `to`.
///
/// Empty when `from` is already at or past `to`.
#[must_use]
pub fn stages_between(from: UnitState, to: UnitState, route: Route) -> Vec<Stage> {
    if from >= to {
        return Vec::new();
    }

    if route == Route::Direct && from == UnitState::Declared && to == UnitState::Object {
        return vec![Stage::ToObject];
    }

    let mut stages = Vec::new();
    let mut state = from;
    while state < to {
        let Some(stage) = Stage::staged_edge(state) else {
            break;
        };
        stages.push(stage);
        state = stage.transition().map_or(UnitState::Object, |(_, output)| output);
    }
    stages
}

/// The final stage a build is asked to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStage {
    /// Stop after preprocessing.
    Preprocess,
    /// Stop after producing assembly text.
    Asm,
    /// Stop after producing object files.
    Object,
    /// Produce objects and link them into an executable.
    #[default]
    Link,
}

impl TargetStage {
    /// The unit state every unit must reach for this target.
    #[must_use]
    pub fn required_state(self) -> UnitState {
        match self {
            Self::Preprocess => UnitState::Preprocessed,
            Self::Asm => UnitState::AssembledText,
            Self::Object | Self::Link => UnitState::Object,
        }
    }

    /// Returns true if the build ends with a link step.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(self, Self::Link)
    }
}

impl fmt::Display for TargetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preprocess => write!(f, "preprocess"),
            Self::Asm => write!(f, "asm"),
            Self::Object => write!(f, "object"),
            Self::Link => write!(f, "link"),
        }
    }
}

impl FromStr for TargetStage {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocess" => Ok(Self::Preprocess),
            "asm" => Ok(Self::Asm),
            "object" => Ok(Self::Object),
            "link" => Ok(Self::Link),
            other => Err(UsageError::new(format!(
                "invalid stage '{other}': expected one of preprocess, asm, object, link"
            ))),
        }
    }
}
