//! Toolchain configuration: which programs run each stage, and how.

use crate::core::{Language, Stage};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One external program and the fixed arguments it always receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments placed right after the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Program to use instead for C++ units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cxx_program: Option<String>,
}

impl ToolSpec {
    /// Creates a tool spec with no fixed arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cxx_program: None,
        }
    }

    /// Appends a fixed argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the C++ program.
    #[must_use]
    pub fn with_cxx_program(mut self, program: impl Into<String>) -> Self {
        self.cxx_program = Some(program.into());
        self
    }

    /// The program to run for a unit of `language`.
    #[must_use]
    pub fn program_for(&self, language: Language) -> &str {
        match (language, self.cxx_program.as_deref()) {
            (Language::Cxx, Some(cxx)) => cxx,
            _ => &self.program,
        }
    }
}

fn default_preprocessor() -> ToolSpec {
    ToolSpec::new("cc").with_arg("-E").with_cxx_program("c++")
}

fn default_compiler() -> ToolSpec {
    ToolSpec::new("cc").with_arg("-S").with_cxx_program("c++")
}

fn default_assembler() -> ToolSpec {
    ToolSpec::new("as")
}

fn default_object_compiler() -> ToolSpec {
    ToolSpec::new("cc").with_arg("-c").with_cxx_program("c++")
}

fn default_linker() -> ToolSpec {
    ToolSpec::new("ld")
}

fn default_driver() -> ToolSpec {
    ToolSpec::new("cc").with_cxx_program("c++")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_jobs() -> usize {
    1
}

/// Tool paths and flags for a build.
///
/// Passed explicitly to every component that runs tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Runs the preprocess stage.
    #[serde(default = "default_preprocessor")]
    pub preprocessor: ToolSpec,
    /// Runs the compile-to-assembly stage.
    #[serde(default = "default_compiler")]
    pub compiler: ToolSpec,
    /// Runs the assemble stage.
    #[serde(default = "default_assembler")]
    pub assembler: ToolSpec,
    /// Runs the combined compile-to-object stage.
    #[serde(default = "default_object_compiler")]
    pub object_compiler: ToolSpec,
    /// Raw linker, used when runtime objects are listed explicitly.
    #[serde(default = "default_linker")]
    pub linker: ToolSpec,
    /// Compiler driver, used for driver-supplied linking and runtime lookups.
    #[serde(default = "default_driver")]
    pub driver: ToolSpec,
    /// Extra flags for the preprocess, compile-to-assembly and compile-to-object stages.
    #[serde(default)]
    pub cflags: Vec<String>,
    /// Directory receiving every artifact.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Number of units built concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Per-invocation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            preprocessor: default_preprocessor(),
            compiler: default_compiler(),
            assembler: default_assembler(),
            object_compiler: default_object_compiler(),
            linker: default_linker(),
            driver: default_driver(),
            cflags: Vec::new(),
            out_dir: default_out_dir(),
            jobs: default_jobs(),
            timeout_seconds: None,
        }
    }
}

impl ToolchainConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON file, or returns defaults when no
    /// path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::in_file(path, format!("cannot read file: {e}")))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| ConfigError::in_file(path, e.to_string()))?;
        config
            .validate()
            .map_err(|e| ConfigError::in_file(path, e.message))?;

        tracing::debug!(path = %path.display(), "Loaded toolchain configuration");
        Ok(config)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if a program name is empty, `jobs` is zero, or the
    /// timeout is not a positive number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, tool) in [
            ("preprocessor", &self.preprocessor),
            ("compiler", &self.compiler),
            ("assembler", &self.assembler),
            ("object_compiler", &self.object_compiler),
            ("linker", &self.linker),
            ("driver", &self.driver),
        ] {
            if tool.program.trim().is_empty() {
                return Err(ConfigError::new(format!("{name}.program must not be empty")));
            }
        }
        if self.jobs == 0 {
            return Err(ConfigError::new("jobs must be at least 1"));
        }
        if let Some(seconds) = self.timeout_seconds {
            if seconds <= 0.0 || Duration::try_from_secs_f64(seconds).is_err() {
                return Err(ConfigError::new(format!(
                    "timeout_seconds must be a positive number of seconds, got {seconds}"
                )));
            }
        }
        Ok(())
    }

    /// Sets the artifact directory.
    #[must_use]
    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    /// Sets the number of concurrent units.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Appends a compiler flag.
    #[must_use]
    pub fn with_cflag(mut self, flag: impl Into<String>) -> Self {
        self.cflags.push(flag.into());
        self
    }

    /// Gets the timeout as a Duration. Values that do not validate yield no
    /// timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }

    /// The tool that runs `stage`.
    #[must_use]
    pub fn tool_for(&self, stage: Stage) -> &ToolSpec {
        match stage {
            Stage::Preprocess => &self.preprocessor,
            Stage::ToAssembly => &self.compiler,
            Stage::Assemble => &self.assembler,
            Stage::ToObject => &self.object_compiler,
            Stage::Link => &self.linker,
        }
    }

    /// Whether `cflags` are passed to `stage`.
    #[must_use]
    pub fn stage_takes_cflags(stage: Stage) -> bool {
        matches!(stage, Stage::Preprocess | Stage::ToAssembly | Stage::ToObject)
    }
}
