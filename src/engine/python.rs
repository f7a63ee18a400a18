use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use pyo3::exceptions::{PyKeyboardInterrupt, PySystemExit};
use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyBytes, PyDict, PyList, PySet, PyString};

use super::{Engine, EngineError, MAIN_NAME, Namespace, STDIN_ORIGIN, SiteDirectory};
use crate::search_path::SearchPath;

/// Magic (4) + flags (4) + timestamp or hash (8 with source size)
const PYC_HEADER_SKIP: usize = 12;

/// Loaded up front; the search path is replaced before they are first used
const PRELOADED: &[&str] = &["codeop", "marshal", "runpy", "site", "traceback"];

/// A `dict` the interpreter executes code in
pub struct PythonNamespace(Py<PyDict>);

impl Namespace for PythonNamespace {
    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        guarded(|py| self.0.bind(py).set_item(key, value))
    }

    fn get(&self, key: &str) -> Option<String> {
        Python::attach(|py| {
            let value = self.0.bind(py).get_item(key).ok()??;
            value.str().ok().map(|s| s.to_string())
        })
    }
}

/// CPython embedded in this process
pub struct PythonEngine {
    magic: [u8; 4],
    lib_version: String,
    version: String,
    prefix: PathBuf,
}

impl PythonEngine {
    /// Bring up the bare interpreter and read the constants we depend on
    pub fn initialize() -> Result<Self> {
        Python::initialize();

        Python::attach(|py| -> Result<Self> {
            let magic: Vec<u8> = py
                .import("importlib.util")?
                .getattr("MAGIC_NUMBER")?
                .extract()?;
            let magic = <[u8; 4]>::try_from(magic.as_slice())
                .map_err(|_| anyhow!("unexpected bytecode magic length {}", magic.len()))?;

            for module in PRELOADED {
                py.import(*module)?;
            }

            // base_prefix: a virtualenv prefix does not carry the stdlib
            let prefix: String = py.import("sys")?.getattr("base_prefix")?.extract()?;

            let info = py.version_info();
            Ok(Self {
                magic,
                lib_version: format!("{}.{}", info.major, info.minor),
                version: py.version().to_string(),
                prefix: PathBuf::from(prefix),
            })
        })
    }

    /// Run exit handlers and flush the interpreter's stdio
    pub fn shutdown(&self) {
        Python::attach(|py| {
            if let Err(e) = py
                .import("atexit")
                .and_then(|atexit| atexit.call_method0("_run_exitfuncs"))
            {
                e.print(py);
            }
            if let Ok(sys) = py.import("sys") {
                for stream in ["stdout", "stderr"] {
                    if let Ok(stream) = sys.getattr(stream)
                        && !stream.is_none()
                    {
                        let _ = stream.call_method0("flush");
                    }
                }
            }
        });
    }
}

/// Run `f` holding the interpreter, translating raised exceptions
fn guarded<T>(f: impl for<'py> FnOnce(Python<'py>) -> PyResult<T>) -> Result<T, EngineError> {
    Python::attach(|py| f(py).map_err(|e| convert(py, e)))
}

fn convert(py: Python<'_>, err: PyErr) -> EngineError {
    if err.is_instance_of::<PySystemExit>(py) {
        return exit_request(py, &err);
    }
    if err.is_instance_of::<PyKeyboardInterrupt>(py) {
        return EngineError::Interrupted;
    }

    let kind = err
        .get_type(py)
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    let reason = err.value(py).to_string();
    let trace = format_trace(py, &err).unwrap_or_else(|_| format!("{kind}: {reason}"));

    EngineError::Raised {
        kind,
        reason,
        trace,
    }
}

/// `SystemExit` semantics: None is 0, an int is the status, anything else
/// is printed and exits 1
fn exit_request(py: Python<'_>, err: &PyErr) -> EngineError {
    let Ok(code) = err.value(py).getattr("code") else {
        return EngineError::Exit {
            code: 0,
            message: None,
        };
    };
    if code.is_none() {
        return EngineError::Exit {
            code: 0,
            message: None,
        };
    }
    match code.extract::<i32>() {
        Ok(code) => EngineError::Exit {
            code,
            message: None,
        },
        Err(_) => EngineError::Exit {
            code: 1,
            message: code.str().ok().map(|s| s.to_string()),
        },
    }
}

fn format_trace(py: Python<'_>, err: &PyErr) -> PyResult<String> {
    // The traceback is held by the PyErr, not always by the value
    let lines = py.import("traceback")?.call_method1(
        "format_exception",
        (err.get_type(py), err.value(py), err.traceback(py)),
    )?;
    let joined = PyString::new(py, "").call_method1("join", (lines,))?;
    Ok(joined.extract::<String>()?.trim_end().to_string())
}

fn exec_in(py: Python<'_>, code: Bound<'_, PyAny>, ns: &PythonNamespace) -> PyResult<()> {
    py.import("builtins")?
        .call_method1("exec", (code, ns.0.bind(py)))?;
    Ok(())
}

impl SiteDirectory for PythonEngine {
    fn add_site_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
        guarded(|py| {
            // addsitedir appends to sys.path; collect into an empty one
            let sys = py.import("sys")?;
            let saved = sys.getattr("path")?;
            sys.setattr("path", PyList::empty(py))?;

            let added = py
                .import("site")
                .and_then(|site| {
                    site.call_method1(
                        "addsitedir",
                        (dir.to_string_lossy().as_ref(), PySet::empty(py)?),
                    )
                })
                .and_then(|_| sys.getattr("path")?.extract::<Vec<String>>());

            sys.setattr("path", saved)?;
            Ok(added?.into_iter().map(PathBuf::from).collect())
        })
    }
}

impl Engine for PythonEngine {
    type Namespace = PythonNamespace;

    const COMPILED_SUFFIXES: &'static [&'static str] = &[".pyc", ".pyo"];

    fn lib_version(&self) -> String {
        self.lib_version.clone()
    }

    fn version_banner(&self) -> String {
        self.version.clone()
    }

    fn prefix(&self) -> Option<PathBuf> {
        Some(self.prefix.clone())
    }

    fn new_namespace(&self) -> Result<PythonNamespace, EngineError> {
        Ok(Python::attach(|py| PythonNamespace(PyDict::new(py).unbind())))
    }

    fn set_argv(&self, argv: &[String]) -> Result<(), EngineError> {
        guarded(|py| py.import("sys")?.setattr("argv", PyList::new(py, argv)?))
    }

    fn set_search_path(&self, path: &SearchPath) -> Result<(), EngineError> {
        guarded(|py| {
            py.import("sys")?
                .setattr("path", PyList::new(py, path.to_strings())?)
        })
    }

    fn search_path(&self) -> Result<Vec<String>, EngineError> {
        guarded(|py| py.import("sys")?.getattr("path")?.extract())
    }

    fn set_unbuffered(&self) -> Result<(), EngineError> {
        guarded(|py| {
            let sys = py.import("sys")?;
            let kwargs = [("write_through", true)].into_py_dict(py)?;
            for stream in ["stdout", "stderr"] {
                sys.getattr(stream)?
                    .call_method("reconfigure", (), Some(&kwargs))?;
            }
            Ok(())
        })
    }

    fn refresh_site_state(&self) -> Result<(), EngineError> {
        guarded(|py| {
            let sys = py.import("sys")?;
            if !sys.getattr("modules")?.contains("site")? {
                return Ok(());
            }
            let site = py.import("site")?;
            site.setattr("PREFIXES", PyList::new(py, [sys.getattr("prefix")?])?)?;
            site.call_method0("setcopyright")?;
            Ok(())
        })
    }

    fn run_site_main(&self) -> Result<(), EngineError> {
        guarded(|py| {
            let sys = py.import("sys")?;
            let site = py.import("site")?;
            site.setattr("PREFIXES", PyList::new(py, [sys.getattr("prefix")?])?)?;
            site.call_method0("main")?;
            Ok(())
        })
    }

    fn bytecode_magic(&self) -> [u8; 4] {
        self.magic
    }

    fn bytecode_header_skip(&self) -> usize {
        PYC_HEADER_SKIP
    }

    fn run_module(&self, name: &str, ns: &mut PythonNamespace) -> Result<(), EngineError> {
        guarded(|py| {
            let globals = py
                .import("runpy")?
                .call_method1("run_module", (name, ns.0.bind(py), MAIN_NAME, true))?;
            // runpy executes in a copy; keep its final state for the prompt
            if let Ok(globals) = globals.cast::<PyDict>() {
                ns.0.bind(py).update(globals.as_mapping())?;
            }
            Ok(())
        })
    }

    fn run_source(
        &self,
        source: &[u8],
        origin: &str,
        ns: &mut PythonNamespace,
    ) -> Result<(), EngineError> {
        guarded(|py| {
            let code = py.import("builtins")?.call_method1(
                "compile",
                (PyBytes::new(py, source), origin, "exec"),
            )?;
            exec_in(py, code, ns)
        })
    }

    fn run_bytecode(&self, payload: &[u8], ns: &mut PythonNamespace) -> Result<(), EngineError> {
        guarded(|py| {
            let code = py
                .import("marshal")?
                .call_method1("loads", (PyBytes::new(py, payload),))?;
            exec_in(py, code, ns)
        })
    }

    fn is_complete(&self, code: &str) -> bool {
        Python::attach(|py| {
            let result = py
                .import("codeop")
                .and_then(|codeop| codeop.call_method1("compile_command", (code,)));

            match result {
                Ok(obj) if obj.is_none() => false, // None = incomplete
                Ok(_) => true,                     // Code object = complete
                Err(_) => true,                    // Syntax error = let Python report it
            }
        })
    }

    fn run_interactive(&self, code: &str, ns: &mut PythonNamespace) -> Result<(), EngineError> {
        guarded(|py| {
            let compiled = py.import("codeop")?.call_method1(
                "compile_command",
                (code, STDIN_ORIGIN, "single"),
            )?;
            if compiled.is_none() {
                return Ok(());
            }
            exec_in(py, compiled, ns)
        })
    }
}
