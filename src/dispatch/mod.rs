pub mod bytecode;

use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};

use crate::cli::{Configuration, InvocationMode};
use crate::diagnostics;
use crate::engine::{Engine, EngineError, FILE_KEY, MAIN_NAME, NAME_KEY, Namespace, STDIN_ORIGIN};
use crate::error::LaunchError;
use crate::install::{BuildInfo, Installation};
use crate::paths::Environment;
use crate::repl::{self, Console};
use crate::search_path;
use bytecode::Header;

/// The target named by the first positional argument
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptReference {
    Path { raw: String, absolute: PathBuf },
    Module(String),
    Inline(String),
}

impl ScriptReference {
    pub fn new(target: &str, mode: InvocationMode, env: &Environment) -> Self {
        match mode {
            InvocationMode::AsModule => ScriptReference::Module(target.to_string()),
            InvocationMode::AsString | InvocationMode::AsBytecodeString => {
                ScriptReference::Inline(target.to_string())
            }
            InvocationMode::AsFile | InvocationMode::AsBytecodeFile => ScriptReference::Path {
                raw: target.to_string(),
                absolute: env.normalize(target),
            },
        }
    }

    /// The reference as the user typed it
    pub fn raw(&self) -> &str {
        match self {
            ScriptReference::Path { raw, .. } => raw,
            ScriptReference::Module(name) => name,
            ScriptReference::Inline(source) => source,
        }
    }

    /// File the search path is scoped to; none for modules and inline code
    pub fn script_path(&self) -> Option<&str> {
        match self {
            ScriptReference::Path { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Namespace the target runs in, handed on to the interactive prompt
pub struct ExecutionContext<N: Namespace> {
    namespace: N,
}

impl<N: Namespace> ExecutionContext<N> {
    pub fn new(namespace: N) -> Self {
        Self { namespace }
    }

    /// Inject the top-level name marker and the current-file marker
    pub fn enter(&mut self, file: &str) -> Result<(), EngineError> {
        self.namespace.set(NAME_KEY, MAIN_NAME)?;
        self.namespace.set(FILE_KEY, file)
    }

    pub fn namespace(&self) -> &N {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut N {
        &mut self.namespace
    }
}

/// Driver states, in the order a run moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PathReady,
    SiteReady,
    SiteSkipped,
    Running,
    Completed,
    Failed,
    InteractivePrompt,
    Exited,
}

/// Compiled-unit suffixes silently upgrade a plain file run
pub fn effective_mode(mode: InvocationMode, target: &str, compiled_suffixes: &[&str]) -> InvocationMode {
    if mode == InvocationMode::AsFile && compiled_suffixes.iter().any(|s| target.ends_with(s)) {
        InvocationMode::AsBytecodeFile
    } else {
        mode
    }
}

/// Prepares the environment for one target and runs it
pub struct Launcher<'a, E: Engine> {
    config: &'a Configuration,
    engine: &'a E,
    env: &'a Environment,
    install: &'a Installation,
    info: &'a BuildInfo,
    phase: Phase,
}

impl<'a, E: Engine> Launcher<'a, E> {
    pub fn new(
        config: &'a Configuration,
        engine: &'a E,
        env: &'a Environment,
        install: &'a Installation,
        info: &'a BuildInfo,
    ) -> Self {
        Self {
            config,
            engine,
            env,
            install,
            info,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        tracing::debug!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Run the residual argument vector; returns the process exit status
    pub fn run(&mut self, args: &[String], console: &mut Console<'_>) -> Result<i32, LaunchError> {
        self.configure(args, console)?;

        let Some(target) = args.first() else {
            self.prepare(None, console)?;
            let mut ctx = self.new_context()?;
            return self.fallback(&mut ctx, diagnostics::banner(self.info, self.engine), console);
        };

        let script = ScriptReference::new(target, self.config.mode, self.env);
        self.prepare(script.script_path(), console)?;
        let mut ctx = self.new_context()?;

        if self.config.debug {
            let search_path = self.engine.search_path().map_err(LaunchError::Setup)?;
            diagnostics::run_state(&mut *console.err, self.info, args, &search_path);
        }

        self.advance(Phase::Running);
        match self.execute(&script, &mut ctx) {
            Ok(()) => {
                self.advance(Phase::Completed);
                if self.config.interactive {
                    self.fallback(&mut ctx, diagnostics::banner(self.info, self.engine), console)
                } else {
                    self.advance(Phase::Exited);
                    Ok(0)
                }
            }
            Err(LaunchError::Target(err)) if self.config.interactive && err.is_recoverable() => {
                self.advance(Phase::Failed);
                if let Some(trace) = err.trace() {
                    let _ = writeln!(console.err, "{trace}");
                }
                self.fallback(&mut ctx, String::new(), console)
            }
            Err(err) => {
                self.advance(Phase::Failed);
                Err(err)
            }
        }
    }

    /// Process-wide engine state, set once before any search path work
    fn configure(&mut self, args: &[String], console: &mut Console<'_>) -> Result<(), LaunchError> {
        self.engine.set_argv(args).map_err(LaunchError::Setup)?;
        if self.config.unbuffered {
            self.engine.set_unbuffered().map_err(LaunchError::Setup)?;
        }
        self.engine
            .refresh_site_state()
            .map_err(LaunchError::Setup)?;

        if self.config.debug {
            diagnostics::debug_info(&mut *console.err, self.info, self.install, self.config);
        }
        Ok(())
    }

    fn new_context(&self) -> Result<ExecutionContext<E::Namespace>, LaunchError> {
        let namespace = self.engine.new_namespace().map_err(LaunchError::Setup)?;
        Ok(ExecutionContext::new(namespace))
    }

    /// Search path for `script`, then site initialization unless skipped
    fn prepare(&mut self, script: Option<&str>, console: &mut Console<'_>) -> Result<(), LaunchError> {
        let path = search_path::assemble(script, self.config, self.env, self.install, self.engine)
            .map_err(LaunchError::Setup)?;
        self.engine
            .set_search_path(&path)
            .map_err(LaunchError::Setup)?;
        self.advance(Phase::PathReady);

        if self.config.skip_site_main {
            self.advance(Phase::SiteSkipped);
            return Ok(());
        }

        if self.config.debug {
            diagnostics::log_path(&mut *console.err, self.info, "search path before site init", &path.to_strings());
        }
        self.engine.run_site_main().map_err(LaunchError::Setup)?;
        if self.config.debug {
            let after = self.engine.search_path().map_err(LaunchError::Setup)?;
            diagnostics::log_path(&mut *console.err, self.info, "search path after site init", &after);
        }
        self.advance(Phase::SiteReady);
        Ok(())
    }

    fn execute(
        &self,
        script: &ScriptReference,
        ctx: &mut ExecutionContext<E::Namespace>,
    ) -> Result<(), LaunchError> {
        let raw = script.raw();
        let header = Header {
            magic: self.engine.bytecode_magic(),
            skip: self.engine.bytecode_header_skip(),
        };

        match (effective_mode(self.config.mode, raw, E::COMPILED_SUFFIXES), script) {
            (InvocationMode::AsModule, _) => {
                tracing::info!("Running '{}' as module", raw);
                ctx.enter(raw).map_err(LaunchError::Setup)?;
                self.engine
                    .run_module(raw, ctx.namespace_mut())
                    .map_err(LaunchError::Target)
            }
            (InvocationMode::AsBytecodeFile, ScriptReference::Path { absolute, .. }) => {
                tracing::info!("Running '{}' as bytecode file", raw);
                ensure_readable(absolute, raw)?;
                let payload = header
                    .load_file(absolute)
                    .map_err(|e| LaunchError::from_bytecode(e, raw))?;
                ctx.enter(&absolute.to_string_lossy())
                    .map_err(LaunchError::Setup)?;
                self.engine
                    .run_bytecode(&payload, ctx.namespace_mut())
                    .map_err(LaunchError::Target)
            }
            (InvocationMode::AsBytecodeString, _) => {
                tracing::info!("Running script as bytecode string");
                let payload = header
                    .read_payload(raw.as_bytes())
                    .map_err(|e| LaunchError::from_bytecode(e, raw))?;
                ctx.enter(STDIN_ORIGIN).map_err(LaunchError::Setup)?;
                self.engine
                    .run_bytecode(&payload, ctx.namespace_mut())
                    .map_err(LaunchError::Target)
            }
            (InvocationMode::AsFile, ScriptReference::Path { absolute, .. }) => {
                tracing::info!("Running '{}' as script", raw);
                ensure_readable(absolute, raw)?;
                let source = fs::read(absolute).map_err(|_| LaunchError::ScriptUnreadable {
                    script: raw.to_string(),
                })?;
                let file = absolute.to_string_lossy();
                ctx.enter(&file).map_err(LaunchError::Setup)?;
                self.engine
                    .run_source(&source, &file, ctx.namespace_mut())
                    .map_err(LaunchError::Target)
            }
            (InvocationMode::AsString, _) => {
                tracing::info!("Running script as string");
                let mut source = raw.to_string();
                if !source.ends_with('\n') {
                    source.push('\n');
                }
                ctx.enter(STDIN_ORIGIN).map_err(LaunchError::Setup)?;
                self.engine
                    .run_source(source.as_bytes(), STDIN_ORIGIN, ctx.namespace_mut())
                    .map_err(LaunchError::Target)
            }
            (mode, script) => unreachable!("{:?} cannot run {:?}", mode, script),
        }
    }

    fn fallback(
        &mut self,
        ctx: &mut ExecutionContext<E::Namespace>,
        banner: String,
        console: &mut Console<'_>,
    ) -> Result<i32, LaunchError> {
        self.advance(Phase::InteractivePrompt);
        let status =
            repl::interact(self.engine, ctx, &banner, console).map_err(LaunchError::Setup)?;
        self.advance(Phase::Exited);
        Ok(status)
    }
}

fn ensure_readable(path: &Path, raw: &str) -> Result<(), LaunchError> {
    access(path, AccessFlags::R_OK).map_err(|_| LaunchError::ScriptUnreadable {
        script: raw.to_string(),
    })
}
