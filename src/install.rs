use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::Engine;

/// Optional file next to the executable that overrides the build constants
pub const BUILD_CONFIG_FILE: &str = "pyrun.toml";

/// Constants produced when the runtime image was packaged
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildInfo {
    /// Program name used in help, version and log output
    pub name: String,

    /// Launcher version
    pub version: String,

    /// Engine library version ("major.minor"); asked from the engine when unset
    pub libversion: Option<String>,

    /// Installation prefix; asked from the engine, then derived from the
    /// executable location when unset
    pub prefix: Option<PathBuf>,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            libversion: None,
            prefix: None,
        }
    }
}

impl BuildInfo {
    /// Load overrides from `dir`, falling back to the compiled-in defaults
    pub fn load(dir: &Path) -> Self {
        let config_path = dir.join(BUILD_CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", config_path.display(), e);
                Self::default()
            }
        }
    }
}

/// Where the launcher lives and where its runtime library is expected
#[derive(Debug, Clone)]
pub struct Installation {
    pub executable: PathBuf,
    pub binary: String,
    pub bindir: PathBuf,
    pub prefix: PathBuf,
    pub libversion: String,
}

impl Installation {
    /// Locate the running executable
    pub fn discover(info: &BuildInfo, engine: &impl Engine) -> Self {
        let executable = env::current_exe().unwrap_or_else(|_| PathBuf::from(&info.name));
        Self::from_executable(executable, info, engine)
    }

    /// Prefix precedence: build override, the engine's own prefix, then the
    /// parent of the executable's directory
    pub fn from_executable(executable: PathBuf, info: &BuildInfo, engine: &impl Engine) -> Self {
        let bindir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let binary = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| info.name.clone());
        let prefix = info
            .prefix
            .clone()
            .or_else(|| engine.prefix())
            .unwrap_or_else(|| {
                bindir
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| bindir.clone())
            });
        let libversion = info
            .libversion
            .clone()
            .unwrap_or_else(|| engine.lib_version());

        Self {
            executable,
            binary,
            bindir,
            prefix,
            libversion,
        }
    }

    /// Runtime library directory: under the prefix, or beside the binary
    /// when the prefix does not carry one
    pub fn lib_dir(&self) -> PathBuf {
        let lib_name = format!("python{}", self.libversion);
        let primary = self.prefix.join("lib").join(&lib_name);
        if primary.exists() {
            primary
        } else {
            self.bindir.join("lib").join(lib_name)
        }
    }

    /// Native-extension subdirectory of the library directory
    pub fn dynload_dir(&self) -> PathBuf {
        self.lib_dir().join("lib-dynload")
    }

    /// Installed-package directory
    pub fn site_dir(&self) -> PathBuf {
        self.lib_dir().join("site-packages")
    }
}
