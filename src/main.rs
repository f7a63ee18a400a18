mod cli;
mod diagnostics;
mod dispatch;
mod engine;
mod error;
mod install;
mod paths;
mod repl;
mod search_path;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Result;

use cli::{Configuration, Invocation};
use dispatch::Launcher;
use engine::python::PythonEngine;
use error::LaunchError;
use install::{BuildInfo, Installation};
use paths::Environment;
use repl::Console;

/// Directory holding the running executable, where `pyrun.toml` may live
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<()> {
    let invocation = cli::parse(std::env::args_os());

    let config = match &invocation {
        Ok(Invocation::Run { config, .. }) => config.clone(),
        _ => Configuration::default(),
    };
    diagnostics::init_tracing(&config);
    let info = BuildInfo::load(&exe_dir());

    let args = match invocation {
        Ok(Invocation::Run { args, .. }) => args,
        Ok(Invocation::Help) => {
            diagnostics::write_help(&mut io::stderr(), &info, &[]);
            process::exit(0);
        }
        Ok(Invocation::Version) => {
            println!("{}", diagnostics::version_line(&info));
            process::exit(0);
        }
        Err(e) => {
            diagnostics::write_help(&mut io::stderr(), &info, &[e.help_line()]);
            process::exit(LaunchError::from(e).exit_code());
        }
    };

    let engine = PythonEngine::initialize()?;
    let install = Installation::discover(&info, &engine);
    let env = Environment::capture();

    let status = launch(&config, &engine, &env, &install, &info, &args);

    engine.shutdown();
    let _ = io::stdout().flush();
    process::exit(status);
}

/// Run the target and report the outcome; returns the exit status
fn launch(
    config: &Configuration,
    engine: &PythonEngine,
    env: &Environment,
    install: &Installation,
    info: &BuildInfo,
    args: &[String],
) -> i32 {
    let mut stderr = io::stderr();
    let mut input = repl::default_source();
    let mut console = Console {
        input: input.as_mut(),
        err: &mut stderr,
    };

    let mut launcher = Launcher::new(config, engine, env, install, info);
    let result = launcher.run(args, &mut console);
    tracing::debug!("finished in phase {:?}", launcher.phase());

    match result {
        Ok(status) => status,
        Err(e) => {
            report(&mut stderr, info, &e);
            e.exit_code()
        }
    }
}

fn report(out: &mut dyn Write, info: &BuildInfo, err: &LaunchError) {
    match err {
        LaunchError::Config(e) => diagnostics::log_error(out, info, &e.help_line()),
        LaunchError::ScriptUnreadable { .. } | LaunchError::IncompatibleBytecode { .. } => {
            diagnostics::log_error(out, info, &err.to_string())
        }
        LaunchError::Setup(e) | LaunchError::Target(e) => {
            if let Some(trace) = e.trace() {
                let _ = writeln!(out, "{trace}");
            }
        }
    }
}
