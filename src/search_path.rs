use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::Configuration;
use crate::engine::{EngineError, SiteDirectory};
use crate::install::Installation;
use crate::paths::Environment;

/// Ordered module lookup list; first match wins downstream
///
/// Never re-sorted or deduplicated once assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPath {
    entries: Vec<PathBuf>,
}

impl SearchPath {
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Entries as strings, the form the engine consumes
    pub fn to_strings(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect()
    }

    fn push(&mut self, entry: PathBuf) {
        self.entries.push(entry);
    }

    /// Drop entries missing on disk, keeping the order of the survivors
    fn retain_existing(&mut self) {
        self.entries.retain(|entry| entry.exists());
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "    {}", entry.display())?;
        }
        Ok(())
    }
}

/// Build the search path for running `script` (or the working directory
/// when there is none)
pub fn assemble(
    script: Option<&str>,
    config: &Configuration,
    env: &Environment,
    install: &Installation,
    site: &impl SiteDirectory,
) -> Result<SearchPath, EngineError> {
    let mut path = SearchPath::default();

    path.push(script_dir(script, env));

    // Not processed for extension files
    if !config.ignore_environment {
        for entry in env.module_path_entries() {
            path.push(env.normalize(entry));
        }
    }

    path.push(install.lib_dir());
    path.push(install.dynload_dir());

    let site_dir = install.site_dir();
    if config.ignore_pth_files {
        path.push(site_dir);
    } else {
        for root in site.add_site_dir(&site_dir)? {
            path.push(root);
        }
    }

    tracing::debug!("search path before cleanup:\n{}", path);
    path.retain_existing();
    tracing::debug!("search path final version:\n{}", path);

    Ok(path)
}

fn script_dir(script: Option<&str>, env: &Environment) -> PathBuf {
    match script {
        Some(script) => {
            let script = env.normalize(script);
            let dir = script.parent().unwrap_or(Path::new(""));
            env.normalize(&dir.to_string_lossy())
        }
        None => env.normalize(&env.cwd.to_string_lossy()),
    }
}
