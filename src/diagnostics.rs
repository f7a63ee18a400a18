use std::io::Write;

use tracing_subscriber::EnvFilter;

use crate::cli::Configuration;
use crate::engine::Engine;
use crate::install::{BuildInfo, Installation};

/// Variable that overrides the log filter derived from the flags
pub const LOG_ENV: &str = "PYRUN_LOG";

/// Install the stderr log subscriber; `-d` beats `-v`
pub fn init_tracing(config: &Configuration) {
    let level = if config.debug {
        "debug"
    } else if config.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be set when embedded; keep that one
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

pub fn help_text(info: &BuildInfo) -> String {
    format!(
        "\
Usage: {name} [pyrunoptions] <script> [parameters]

Version: {version}

Available pyrun options:

-h:   show this help text
-v:   run in verbose mode
-i:   enable interactive mode
-m:   import and run a module <script> available on PYTHONPATH
-c:   compile and run <script> directly as Python code
-b:   run the given <script> file as bytecode
-E:   ignore environment variables (only PYTHONPATH)
-S:   skip running site.main() and disable support for .pth files
-d:   show debug information
-O:   ignored (pyrun always runs in optimized mode)
-u:   open stdout/stderr in unbuffered mode
-V:   print the pyrun version and exit

Without options, the given <script> file is loaded as Python source
code and run. Parameters are passed to the script via sys.argv as
normal.
",
        name = info.name,
        version = info.version
    )
}

/// Help text followed by `extra_lines`
pub fn write_help(out: &mut dyn Write, info: &BuildInfo, extra_lines: &[String]) {
    let _ = write!(out, "{}", help_text(info));
    for line in extra_lines {
        let _ = writeln!(out, "{line}");
    }
}

pub fn version_line(info: &BuildInfo) -> String {
    format!("{} {}", info.name, info.version)
}

/// Banner shown when the interactive prompt starts normally
pub fn banner(info: &BuildInfo, engine: &impl Engine) -> String {
    format!(
        "{} {}\nType \"help\" or \"license\" for details.",
        info.name,
        engine.version_banner()
    )
}

pub fn log(out: &mut dyn Write, info: &BuildInfo, line: &str) {
    let _ = writeln!(out, "{}: {}", info.name, line);
}

pub fn log_error(out: &mut dyn Write, info: &BuildInfo, line: &str) {
    let _ = writeln!(out, "{} error: {}", info.name, line);
}

/// Titled listing of search path entries
pub fn log_path(out: &mut dyn Write, info: &BuildInfo, title: &str, entries: &[String]) {
    log(out, info, &format!("{title}:"));
    for entry in entries {
        log(out, info, &format!("    {entry}"));
    }
}

/// Dump of the build constants, installation layout and options
pub fn debug_info(out: &mut dyn Write, info: &BuildInfo, install: &Installation, config: &Configuration) {
    let text = format!(
        "\
### {name} Debug Information

# Name and version
name = {name:?}
version = {version:?}
libversion = {libversion:?}

# Files and directories
executable = {executable:?}
bindir = {bindir:?}
binary = {binary:?}
prefix = {prefix:?}
lib_dir = {lib_dir:?}

# Options
verbose = {verbose}
debug = {debug}
mode = {mode:?}
ignore_environment = {ignore_environment}
ignore_pth_files = {ignore_pth_files}
skip_site_main = {skip_site_main}
interactive = {interactive}
unbuffered = {unbuffered}
",
        name = info.name,
        version = info.version,
        libversion = install.libversion,
        executable = install.executable,
        bindir = install.bindir,
        binary = install.binary,
        prefix = install.prefix,
        lib_dir = install.lib_dir(),
        verbose = config.verbose,
        debug = config.debug,
        mode = config.mode,
        ignore_environment = config.ignore_environment,
        ignore_pth_files = config.ignore_pth_files,
        skip_site_main = config.skip_site_main,
        interactive = config.interactive,
        unbuffered = config.unbuffered,
    );
    let _ = writeln!(out, "{text}");
}

/// What the target is about to see: its argv and the search path
pub fn run_state(out: &mut dyn Write, info: &BuildInfo, argv: &[String], search_path: &[String]) {
    log(out, info, &format!("argv={argv:?}"));
    log(out, info, &format!("search path={search_path:?}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::InvocationMode;
    use crate::engine::fake::FakeEngine;
    use std::path::PathBuf;

    fn render(f: impl FnOnce(&mut dyn Write)) -> String {
        let mut out = Vec::new();
        f(&mut out);
        String::from_utf8(out).unwrap()
    }

    fn info() -> BuildInfo {
        BuildInfo {
            name: "pyrun".to_string(),
            version: "2.6.0".to_string(),
            ..BuildInfo::default()
        }
    }

    #[test]
    fn test_version_line() {
        assert_eq!(version_line(&info()), "pyrun 2.6.0");
    }

    #[test]
    fn test_help_names_program_and_version() {
        let text = render(|out| write_help(out, &info(), &[]));
        assert!(text.starts_with("Usage: pyrun [pyrunoptions]"));
        assert!(text.contains("Version: 2.6.0"));
    }

    #[test]
    fn test_help_extra_lines_come_last() {
        let text = render(|out| {
            write_help(out, &info(), &["*** Error: Unknown option '-x'".to_string()])
        });
        assert!(text.ends_with("*** Error: Unknown option '-x'\n"));
    }

    #[test]
    fn test_log_formats() {
        assert_eq!(render(|out| log(out, &info(), "hello")), "pyrun: hello\n");
        assert_eq!(
            render(|out| log_error(out, &info(), "Could not find/read script file 'x.py'")),
            "pyrun error: Could not find/read script file 'x.py'\n"
        );
    }

    #[test]
    fn test_log_path_lists_entries() {
        let text = render(|out| {
            log_path(out, &info(), "final", &["/a".to_string(), "/b".to_string()])
        });
        assert_eq!(text, "pyrun: final:\npyrun:     /a\npyrun:     /b\n");
    }

    #[test]
    fn test_debug_info_lists_options() {
        let install = Installation::from_executable(
            PathBuf::from("/opt/pyrun/bin/pyrun"),
            &info(),
            &FakeEngine::new(),
        );
        let config = Configuration {
            verbose: true,
            mode: InvocationMode::AsModule,
            ..Configuration::default()
        };
        let text = render(|out| debug_info(out, &info(), &install, &config));

        assert!(text.starts_with("### pyrun Debug Information"));
        assert!(text.contains("verbose = true"));
        assert!(text.contains("mode = AsModule"));
        assert!(text.contains("prefix = \"/opt/pyrun\""));
    }

    #[test]
    fn test_run_state() {
        let text = render(|out| {
            run_state(out, &info(), &["script.py".to_string(), "-x".to_string()], &["/w".to_string()])
        });
        assert_eq!(
            text,
            "pyrun: argv=[\"script.py\", \"-x\"]\npyrun: search path=[\"/w\"]\n"
        );
    }
}
