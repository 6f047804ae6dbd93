//! The ordered link plan.

use super::{LinkOptions, Linkage, RuntimeObjects};
use crate::config::ToolchainConfig;
use crate::core::Language;
use crate::errors::UsageError;
use crate::runner::ToolInvocation;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// A unit's object file, as handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitObject {
    /// Unit name.
    pub name: String,
    /// Object file path.
    pub path: PathBuf,
    /// Language the unit was written in.
    pub language: Language,
}

/// One positional input of the link command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkInput {
    /// Runtime object that must precede every unit object.
    RuntimeStart {
        /// Object path.
        path: PathBuf,
    },
    /// A translation unit's object.
    Unit {
        /// Unit name.
        name: String,
        /// Object path.
        path: PathBuf,
    },
    /// A library, searched after the objects that reference it.
    Library {
        /// Library name without the `lib` prefix.
        name: String,
    },
    /// Runtime object that must follow every unit object.
    RuntimeEnd {
        /// Object path.
        path: PathBuf,
    },
}

impl LinkInput {
    fn rank(&self) -> u8 {
        match self {
            Self::RuntimeStart { .. } => 0,
            Self::Unit { .. } => 1,
            Self::Library { .. } => 2,
            Self::RuntimeEnd { .. } => 3,
        }
    }

    /// The command-line argument for this input.
    #[must_use]
    pub fn arg(&self) -> OsString {
        match self {
            Self::RuntimeStart { path } | Self::Unit { path, .. } | Self::RuntimeEnd { path } => {
                path.clone().into_os_string()
            }
            Self::Library { name } => OsString::from(format!("-l{name}")),
        }
    }
}

/// Which program performs the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTool {
    /// The compiler driver, which supplies runtime objects itself.
    Driver,
    /// The raw linker; runtime objects are part of the plan.
    Linker,
}

/// A fully ordered link command.
///
/// Runtime-start objects precede every unit object, runtime-end objects
/// follow them, and dynamic output always carries its loader path. These
/// hold by construction; a plan is never modified after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPlan {
    output: PathBuf,
    tool: LinkTool,
    program: String,
    tool_args: Vec<String>,
    linkage: Linkage,
    #[serde(skip_serializing_if = "Option::is_none")]
    dynamic_linker: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
    inputs: Vec<LinkInput>,
}

impl LinkPlan {
    /// Composes a plan from unit objects, in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no objects, the runtime objects have
    /// not been resolved yet, or dynamic output has no loader path.
    pub fn compose(
        config: &ToolchainConfig,
        objects: Vec<UnitObject>,
        output: impl Into<PathBuf>,
        options: &LinkOptions,
    ) -> Result<Self, UsageError> {
        let output = output.into();
        if output.as_os_str().is_empty() {
            return Err(UsageError::new("link requires an output name"));
        }
        if objects.is_empty() {
            return Err(UsageError::new("nothing to link: no unit objects"));
        }

        let (tool, start, end) = match &options.runtime {
            RuntimeObjects::Driver => (LinkTool::Driver, Vec::new(), Vec::new()),
            RuntimeObjects::Explicit { start, end } => (LinkTool::Linker, start.clone(), end.clone()),
            RuntimeObjects::Discover => {
                return Err(UsageError::new(
                    "runtime objects must be discovered before planning the link",
                ))
            }
        };

        let dynamic_linker = match options.linkage {
            Linkage::Static => None,
            Linkage::Dynamic if options.dynamic_linker.as_os_str().is_empty() => {
                return Err(UsageError::new(
                    "dynamically linked output requires a dynamic linker path",
                ))
            }
            Linkage::Dynamic => Some(options.dynamic_linker.clone()),
        };

        let (program, tool_args) = match tool {
            LinkTool::Driver => {
                let language = if objects.iter().any(|o| o.language == Language::Cxx) {
                    Language::Cxx
                } else {
                    Language::C
                };
                (
                    config.driver.program_for(language).to_string(),
                    config.driver.args.clone(),
                )
            }
            LinkTool::Linker => (config.linker.program.clone(), config.linker.args.clone()),
        };

        let inputs = start
            .into_iter()
            .map(|path| LinkInput::RuntimeStart { path })
            .chain(objects.into_iter().map(|o| LinkInput::Unit {
                name: o.name,
                path: o.path,
            }))
            .chain(
                options
                    .libraries
                    .iter()
                    .map(|name| LinkInput::Library { name: name.clone() }),
            )
            .chain(end.into_iter().map(|path| LinkInput::RuntimeEnd { path }))
            .collect();

        let plan = Self {
            output,
            tool,
            program,
            tool_args,
            linkage: options.linkage,
            dynamic_linker,
            search_dirs: options.search_dirs.clone(),
            inputs,
        };
        debug_assert!(plan.is_ordered());
        Ok(plan)
    }

    /// Returns true if inputs follow the start, unit, library, end order.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.inputs.windows(2).all(|w| w[0].rank() <= w[1].rank())
    }

    /// The executable path.
    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Which program performs the link.
    #[must_use]
    pub fn tool(&self) -> LinkTool {
        self.tool
    }

    /// Static or dynamic output.
    #[must_use]
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// The loader path for dynamic output.
    #[must_use]
    pub fn dynamic_linker(&self) -> Option<&Path> {
        self.dynamic_linker.as_deref()
    }

    /// Positional inputs, in command order.
    #[must_use]
    pub fn inputs(&self) -> &[LinkInput] {
        &self.inputs
    }

    /// Names of the linked units, in command order.
    #[must_use]
    pub fn unit_names(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter_map(|input| match input {
                LinkInput::Unit { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Renders the plan as a tool invocation.
    #[must_use]
    pub fn to_invocation(&self) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(&self.program).args(&self.tool_args);

        invocation = match (self.tool, &self.dynamic_linker) {
            (_, None) => invocation.arg("-static"),
            (LinkTool::Linker, Some(loader)) => {
                invocation.arg("-dynamic-linker").arg(loader.as_os_str())
            }
            (LinkTool::Driver, Some(loader)) => {
                let mut flag = OsString::from("-Wl,-dynamic-linker,");
                flag.push(loader.as_os_str());
                invocation.arg(flag)
            }
        };

        invocation = invocation.arg("-o").arg(self.output.as_os_str());
        for dir in &self.search_dirs {
            let mut flag = OsString::from("-L");
            flag.push(dir.as_os_str());
            invocation = invocation.arg(flag);
        }
        invocation.args(self.inputs.iter().map(LinkInput::arg))
    }
}
