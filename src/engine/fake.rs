//! In-memory engine for exercising the launcher without an interpreter.
//!
//! Program text is a tiny command language: `raise` fails, `exit N`
//! requests an exit, `interrupt` interrupts, anything else succeeds and is
//! stored under the `last` binding.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{Engine, EngineError, Namespace, SiteDirectory};
use crate::search_path::SearchPath;

pub const MAGIC: [u8; 4] = [0x0d, 0x0d, 0x0d, 0x0a];

#[derive(Debug, Default, Clone)]
pub struct FakeNamespace {
    pub bindings: HashMap<String, String>,
}

impl Namespace for FakeNamespace {
    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        self.bindings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        self.bindings.get(key).cloned()
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub calls: RefCell<Vec<String>>,
    pub argv: RefCell<Vec<String>>,
    pub search_path: RefCell<Vec<String>>,
    pub site_roots: Vec<PathBuf>,
    pub prefix: Option<PathBuf>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|call| call.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn execute(&self, text: &str, ns: &mut FakeNamespace) -> Result<(), EngineError> {
        let text = text.trim();
        if text == "raise" {
            return Err(EngineError::Raised {
                kind: "RuntimeError".to_string(),
                reason: "raised on request".to_string(),
                trace: "Traceback (most recent call last):\nRuntimeError: raised on request"
                    .to_string(),
            });
        }
        if text == "interrupt" {
            return Err(EngineError::Interrupted);
        }
        if let Some(code) = text.strip_prefix("exit ") {
            return Err(EngineError::Exit {
                code: code.trim().parse().unwrap_or(1),
                message: None,
            });
        }
        ns.set("last", text)
    }
}

impl SiteDirectory for FakeEngine {
    fn add_site_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
        self.record(format!("add_site_dir {}", dir.display()));
        let mut roots = vec![dir.to_path_buf()];
        roots.extend(self.site_roots.iter().cloned());
        Ok(roots)
    }
}

impl Engine for FakeEngine {
    type Namespace = FakeNamespace;

    const COMPILED_SUFFIXES: &'static [&'static str] = &[".pyc", ".pyo"];

    fn lib_version(&self) -> String {
        "3.12".to_string()
    }

    fn version_banner(&self) -> String {
        "3.12.4 (fake)".to_string()
    }

    fn prefix(&self) -> Option<PathBuf> {
        self.prefix.clone()
    }

    fn new_namespace(&self) -> Result<FakeNamespace, EngineError> {
        Ok(FakeNamespace::default())
    }

    fn set_argv(&self, argv: &[String]) -> Result<(), EngineError> {
        self.record("set_argv".to_string());
        *self.argv.borrow_mut() = argv.to_vec();
        Ok(())
    }

    fn set_search_path(&self, path: &SearchPath) -> Result<(), EngineError> {
        self.record("set_search_path".to_string());
        *self.search_path.borrow_mut() = path.to_strings();
        Ok(())
    }

    fn search_path(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.search_path.borrow().clone())
    }

    fn set_unbuffered(&self) -> Result<(), EngineError> {
        self.record("set_unbuffered".to_string());
        Ok(())
    }

    fn refresh_site_state(&self) -> Result<(), EngineError> {
        self.record("refresh_site_state".to_string());
        Ok(())
    }

    fn run_site_main(&self) -> Result<(), EngineError> {
        self.record("run_site_main".to_string());
        Ok(())
    }

    fn bytecode_magic(&self) -> [u8; 4] {
        MAGIC
    }

    fn bytecode_header_skip(&self) -> usize {
        4
    }

    fn run_module(&self, name: &str, ns: &mut FakeNamespace) -> Result<(), EngineError> {
        self.record(format!("run_module {name}"));
        if name == "missing" {
            return Err(EngineError::Raised {
                kind: "ImportError".to_string(),
                reason: format!("No module named {name}"),
                trace: String::new(),
            });
        }
        ns.set("module", name)
    }

    fn run_source(
        &self,
        source: &[u8],
        origin: &str,
        ns: &mut FakeNamespace,
    ) -> Result<(), EngineError> {
        self.record(format!("run_source {origin}"));
        self.execute(&String::from_utf8_lossy(source), ns)
    }

    fn run_bytecode(&self, payload: &[u8], ns: &mut FakeNamespace) -> Result<(), EngineError> {
        self.record("run_bytecode".to_string());
        self.execute(&String::from_utf8_lossy(payload), ns)
    }

    fn is_complete(&self, code: &str) -> bool {
        let opens_block = code
            .lines()
            .next()
            .is_some_and(|line| line.trim_end().ends_with(':'));
        !opens_block || code.ends_with('\n')
    }

    fn run_interactive(&self, code: &str, ns: &mut FakeNamespace) -> Result<(), EngineError> {
        self.record(format!("run_interactive {}", code.trim()));
        self.execute(code, ns)
    }
}
