//! Link options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Loader path embedded in dynamically linked x86-64 glibc executables.
pub const DEFAULT_DYNAMIC_LINKER: &str = "/lib64/ld-linux-x86-64.so.2";

/// Whether the executable is linked dynamically or statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    /// Shared libraries resolved at load time by the dynamic linker.
    #[default]
    Dynamic,
    /// Everything resolved at link time.
    Static,
}

/// Where the C runtime start and end objects come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RuntimeObjects {
    /// Link through the compiler driver, which adds the runtime objects.
    #[default]
    Driver,
    /// Raw linker with runtime objects listed by the caller, in order.
    Explicit {
        /// Objects placed before every unit object.
        start: Vec<PathBuf>,
        /// Objects placed after every unit object and library.
        end: Vec<PathBuf>,
    },
    /// Raw linker with runtime objects located by asking the compiler driver.
    Discover,
}

impl RuntimeObjects {
    /// Short name of the mode.
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Explicit { .. } => "explicit",
            Self::Discover => "discover",
        }
    }

    /// Object names to look up, as `(start, end)`.
    #[must_use]
    pub fn discovery_set(linkage: Linkage) -> (&'static [&'static str], &'static [&'static str]) {
        match linkage {
            Linkage::Dynamic => (&["crt1.o", "crti.o", "crtbegin.o"], &["crtend.o", "crtn.o"]),
            Linkage::Static => (&["crt1.o", "crti.o", "crtbeginT.o"], &["crtend.o", "crtn.o"]),
        }
    }
}

/// How the final executable is linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Dynamic or static output.
    #[serde(default)]
    pub linkage: Linkage,
    /// Loader path for dynamic output.
    #[serde(default = "default_dynamic_linker")]
    pub dynamic_linker: PathBuf,
    /// Source of the runtime start and end objects.
    #[serde(default)]
    pub runtime: RuntimeObjects,
    /// Libraries, passed as `-l<name>` after the unit objects.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Library search directories, passed as `-L<dir>`.
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
}

fn default_dynamic_linker() -> PathBuf {
    PathBuf::from(DEFAULT_DYNAMIC_LINKER)
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            linkage: Linkage::Dynamic,
            dynamic_linker: default_dynamic_linker(),
            runtime: RuntimeObjects::Driver,
            libraries: Vec::new(),
            search_dirs: Vec::new(),
        }
    }
}

impl LinkOptions {
    /// Creates dynamic, driver-linked options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links statically.
    #[must_use]
    pub fn with_static(mut self) -> Self {
        self.linkage = Linkage::Static;
        self
    }

    /// Sets the dynamic linker path.
    #[must_use]
    pub fn with_dynamic_linker(mut self, path: impl Into<PathBuf>) -> Self {
        self.dynamic_linker = path.into();
        self
    }

    /// Sets the runtime object mode.
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeObjects) -> Self {
        self.runtime = runtime;
        self
    }

    /// Adds a library.
    #[must_use]
    pub fn with_library(mut self, name: impl Into<String>) -> Self {
        self.libraries.push(name.into());
        self
    }

    /// Adds a library search directory.
    #[must_use]
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}
