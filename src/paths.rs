use std::borrow::Cow;
use std::env;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use path_absolutize::Absolutize;

/// Home-directory shorthand
const HOME_TOKEN: &str = "~";

/// Environment variable holding the home location
pub const HOME_VAR: &str = "HOME";
/// Environment variable holding extra module search roots
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Snapshot of the process environment the launcher depends on
///
/// Captured once at startup so path handling is reproducible for the rest
/// of the run, and so tests can supply their own values.
#[derive(Debug, Clone)]
pub struct Environment {
    pub home: Option<String>,
    pub module_path: Option<String>,
    pub cwd: PathBuf,
}

impl Environment {
    pub fn capture() -> Self {
        Self {
            home: env::var(HOME_VAR).ok(),
            module_path: env::var(MODULE_PATH_VAR).ok(),
            cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Normalize a path against this environment
    pub fn normalize(&self, path: &str) -> PathBuf {
        normalize(path, self.home.as_deref(), &self.cwd)
    }

    /// Entries of the module-path variable, split per platform
    pub fn module_path_entries(&self) -> Vec<&str> {
        match &self.module_path {
            Some(value) => split_module_path(value),
            None => Vec::new(),
        }
    }
}

/// Trim, expand a leading `~` and make `path` absolute against `cwd`
///
/// Never fails: with no home location the shorthand is kept literally, and
/// the path does not have to exist.
pub fn normalize(path: &str, home: Option<&str>, cwd: &Path) -> PathBuf {
    let expanded = expand_home(path.trim(), home);
    if expanded.is_empty() {
        return cwd.to_path_buf();
    }

    let path = Path::new(expanded.as_ref());
    match path.absolutize_from(cwd) {
        Ok(absolute) => absolute.into_owned(),
        Err(_) => cwd.join(path),
    }
}

/// Limited tilde expansion: only the bare token and `~/...`
fn expand_home<'a>(path: &'a str, home: Option<&'a str>) -> Cow<'a, str> {
    if path == HOME_TOKEN {
        return Cow::Borrowed(home.unwrap_or(HOME_TOKEN));
    }

    let Some(rest) = path
        .strip_prefix(HOME_TOKEN)
        .and_then(|p| p.strip_prefix(MAIN_SEPARATOR))
    else {
        return Cow::Borrowed(path);
    };

    match home {
        Some(home) if home.ends_with(MAIN_SEPARATOR) => Cow::Owned(format!("{home}{rest}")),
        Some(home) => Cow::Owned(format!("{home}{MAIN_SEPARATOR}{rest}")),
        None => Cow::Borrowed(path),
    }
}

/// Split a module-path variable value (`:` on unix, `;` on windows)
pub fn split_module_path(value: &str) -> Vec<&str> {
    #[cfg(windows)]
    const SEPARATOR: char = ';';
    #[cfg(not(windows))]
    const SEPARATOR: char = ':';

    value.split(SEPARATOR).collect()
}
