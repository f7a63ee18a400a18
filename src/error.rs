use thiserror::Error;

use crate::cli::CliError;
use crate::dispatch::bytecode::BytecodeError;
use crate::engine::EngineError;

/// Everything that can end a launcher run early
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] CliError),

    #[error("Could not find/read script file '{script}'")]
    ScriptUnreadable { script: String },

    #[error("Incompatible bytecode file '{script}'")]
    IncompatibleBytecode { script: String },

    /// Failure while preparing the environment (search path, site init)
    #[error("setup failed: {0}")]
    Setup(EngineError),

    /// Failure raised by the target program itself
    #[error(transparent)]
    Target(EngineError),
}

impl LaunchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Config(_)
            | LaunchError::ScriptUnreadable { .. }
            | LaunchError::IncompatibleBytecode { .. } => 1,
            LaunchError::Setup(err) | LaunchError::Target(err) => err.exit_code(),
        }
    }

    pub(crate) fn from_bytecode(err: BytecodeError, script: &str) -> Self {
        match err {
            BytecodeError::Unreadable(_) => LaunchError::ScriptUnreadable {
                script: script.to_string(),
            },
            BytecodeError::BadMagic => LaunchError::IncompatibleBytecode {
                script: script.to_string(),
            },
        }
    }
}
