use std::ffi::OsString;

use clap::error::{ContextKind, ErrorKind};
use clap::{ColorChoice, Parser};
use thiserror::Error;

/// How the target program unit is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvocationMode {
    /// Source file
    #[default]
    AsFile,
    /// Module name looked up on the search path
    AsModule,
    /// Inline source string
    AsString,
    /// Compiled-unit file
    AsBytecodeFile,
    /// Compiled unit passed inline
    AsBytecodeString,
}

/// Launcher options, parsed once and passed by reference from then on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub verbose: bool,
    pub debug: bool,
    pub interactive: bool,
    pub unbuffered: bool,
    pub ignore_environment: bool,
    pub ignore_pth_files: bool,
    pub skip_site_main: bool,
    pub mode: InvocationMode,
}

/// What the command line asks the launcher to do
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Run with the given options; `args` is the residual argument vector
    Run {
        config: Configuration,
        args: Vec<String>,
    },
    Help,
    Version,
}

#[derive(Debug, Error, PartialEq)]
pub enum CliError {
    #[error("Unknown option {0}")]
    UnknownOption(String),
    #[error("Problem parsing command line: {0}")]
    Malformed(String),
}

impl CliError {
    /// Line appended below the help text
    pub fn help_line(&self) -> String {
        match self {
            CliError::UnknownOption(option) => format!("*** Error: Unknown option '{option}'"),
            CliError::Malformed(reason) => format!("*** Problem parsing command line: {reason}"),
        }
    }
}

/// Getopt-style flag table: single letters, parsing stops at the first
/// positional so the target keeps its own flags
#[derive(Parser, Debug)]
#[command(
    name = "pyrun",
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true,
    color = ColorChoice::Never
)]
struct Flags {
    #[arg(short = 'h', short_alias = '?')]
    show_help: bool,

    #[arg(short = 'V')]
    show_version: bool,

    #[arg(short = 'v')]
    verbose: bool,

    #[arg(short = 'm', conflicts_with_all = ["as_string", "as_bytecode"])]
    as_module: bool,

    #[arg(short = 'c', conflicts_with_all = ["as_module", "as_bytecode"])]
    as_string: bool,

    #[arg(short = 'b', conflicts_with_all = ["as_module", "as_string"])]
    as_bytecode: bool,

    #[arg(short = 'i')]
    interactive: bool,

    #[arg(short = 'E')]
    ignore_environment: bool,

    #[arg(short = 'S')]
    no_site: bool,

    #[arg(short = 'd')]
    debug: bool,

    #[arg(short = 'u')]
    unbuffered: bool,

    /// Accepted for compatibility, no effect
    #[arg(short = 'O')]
    optimize: bool,

    /// Accepted for compatibility, no effect
    #[arg(short = '3')]
    py3k_warnings: bool,

    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl From<&Flags> for Configuration {
    fn from(flags: &Flags) -> Self {
        let mode = if flags.as_module {
            InvocationMode::AsModule
        } else if flags.as_string {
            InvocationMode::AsString
        } else if flags.as_bytecode {
            InvocationMode::AsBytecodeFile
        } else {
            InvocationMode::AsFile
        };

        Self {
            verbose: flags.verbose,
            debug: flags.debug,
            interactive: flags.interactive,
            unbuffered: flags.unbuffered,
            ignore_environment: flags.ignore_environment,
            // -S is an approximation: no extension files, no site main
            ignore_pth_files: flags.no_site,
            skip_site_main: flags.no_site,
            mode,
        }
    }
}

/// Parse a full argument vector (program name first)
pub fn parse<I, T>(argv: I) -> Result<Invocation, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let flags = Flags::try_parse_from(argv).map_err(|err| match err.kind() {
        ErrorKind::UnknownArgument => CliError::UnknownOption(
            err.get(ContextKind::InvalidArg)
                .map(|value| value.to_string())
                .unwrap_or_default(),
        ),
        _ => CliError::Malformed(first_line(&err.to_string())),
    })?;

    if flags.show_help {
        return Ok(Invocation::Help);
    }
    if flags.show_version {
        return Ok(Invocation::Version);
    }

    Ok(Invocation::Run {
        config: Configuration::from(&flags),
        args: flags.args,
    })
}

fn first_line(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}
