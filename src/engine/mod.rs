pub mod python;

#[cfg(test)]
pub mod fake;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::search_path::SearchPath;

/// Value of the module-name marker for the top-level unit
pub const MAIN_NAME: &str = "__main__";
/// Binding that holds the module-name marker
pub const NAME_KEY: &str = "__name__";
/// Binding that holds the current-file marker
pub const FILE_KEY: &str = "__file__";
/// Synthetic origin for code that did not come from a file
pub const STDIN_ORIGIN: &str = "<stdin>";

/// Anything the engine raised while doing work on our behalf
#[derive(Debug, Error)]
pub enum EngineError {
    /// An ordinary failure (exception) raised by the running program
    #[error("{kind}: {reason}")]
    Raised {
        kind: String,
        reason: String,
        trace: String,
    },
    /// The program asked the process to exit
    #[error("exit requested with status {code}")]
    Exit { code: i32, message: Option<String> },
    /// The program was interrupted from the keyboard
    #[error("interrupted")]
    Interrupted,
}

impl EngineError {
    /// Only ordinary failures may be diverted into the interactive prompt
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Raised { .. })
    }

    /// Process exit status when this error ends the run
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Raised { .. } => 1,
            EngineError::Exit { code, .. } => *code,
            EngineError::Interrupted => 130,
        }
    }

    /// Text printed to stderr when the error is reported
    pub fn trace(&self) -> Option<&str> {
        match self {
            EngineError::Raised { trace, .. } => Some(trace),
            EngineError::Exit { message, .. } => message.as_deref(),
            EngineError::Interrupted => Some("KeyboardInterrupt"),
        }
    }
}

/// A mutable symbol table the engine executes code in
pub trait Namespace {
    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError>;
    fn get(&self, key: &str) -> Option<String>;
}

/// The external collaborator that adds a site directory, processing any
/// extension-registration files found in it
pub trait SiteDirectory {
    /// Returns the roots to append, the site directory itself first
    fn add_site_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, EngineError>;
}

/// Boundary to the interpreter that actually parses and runs program units
pub trait Engine: SiteDirectory {
    type Namespace: Namespace;

    /// Suffixes that mark a file as a compiled unit
    const COMPILED_SUFFIXES: &'static [&'static str];

    /// "major.minor" of the engine, used to locate its library directory
    fn lib_version(&self) -> String;

    /// Long version string shown in the interactive banner
    fn version_banner(&self) -> String;

    /// Install prefix of the engine's own runtime library, if it knows one
    fn prefix(&self) -> Option<PathBuf>;

    fn new_namespace(&self) -> Result<Self::Namespace, EngineError>;

    /// Replace the argument vector the target program sees
    fn set_argv(&self, argv: &[String]) -> Result<(), EngineError>;

    fn set_search_path(&self, path: &SearchPath) -> Result<(), EngineError>;

    /// Current engine-side view of the search path
    fn search_path(&self) -> Result<Vec<String>, EngineError>;

    fn set_unbuffered(&self) -> Result<(), EngineError>;

    /// Re-sync site bookkeeping after the runtime layout was configured
    fn refresh_site_state(&self) -> Result<(), EngineError>;

    /// Site initialization (installed packages, extension files)
    fn run_site_main(&self) -> Result<(), EngineError>;

    /// Magic constant a compiled unit must start with
    fn bytecode_magic(&self) -> [u8; 4];

    /// Bytes between the magic and the serialized program
    fn bytecode_header_skip(&self) -> usize;

    /// Look `name` up on the search path and run it as the top-level unit
    fn run_module(&self, name: &str, ns: &mut Self::Namespace) -> Result<(), EngineError>;

    /// Compile and run program text; `origin` labels it in traces
    fn run_source(
        &self,
        source: &[u8],
        origin: &str,
        ns: &mut Self::Namespace,
    ) -> Result<(), EngineError>;

    /// Deserialize and run a compiled program payload
    fn run_bytecode(&self, payload: &[u8], ns: &mut Self::Namespace) -> Result<(), EngineError>;

    /// Whether `code` is a complete interactive statement
    fn is_complete(&self, code: &str) -> bool;

    /// Run one interactive statement, echoing expression results
    fn run_interactive(&self, code: &str, ns: &mut Self::Namespace) -> Result<(), EngineError>;
}
