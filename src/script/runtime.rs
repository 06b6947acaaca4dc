use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::expr;
use super::parser::Script;
use crate::debugger::{LineHook, ScriptHost, SourceRegistry};
use crate::error::{EvalError, ScriptError};

/// Variable bindings of one call level. Names are case-insensitive.
#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, String>,
    parent: Option<ScopeRef>,
}

/// Shared handle to a [`Scope`]; this is the environment handle the debugger
/// captures per frame.
#[derive(Debug, Clone, Default)]
pub struct ScopeRef(Arc<Mutex<Scope>>);

impl ScopeRef {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        ScopeRef(Arc::new(Mutex::new(Scope {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        let mut scope = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        scope.vars.insert(name.to_lowercase(), value.into());
    }

    /// Looks `name` up here, then in each parent.
    pub fn get(&self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        let mut current = self.clone();
        loop {
            let next = {
                let scope = current.0.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(value) = scope.vars.get(&key) {
                    return Some(value.clone());
                }
                scope.parent.clone()
            };
            current = next?;
        }
    }
}

/// Where script text comes from.
#[derive(Debug, Clone)]
pub enum SourceSet {
    FileSystem,
    /// Fixed path → text map, used by tests and embedding.
    Memory(HashMap<String, String>),
}

/// The interpreter's shared side: loaded scripts, the line hook and the
/// output stream. The executing thread owns the call stack separately.
pub struct ScriptRuntime {
    sources: SourceSet,
    loaded: Mutex<BTreeMap<String, Arc<Script>>>,
    hook: Mutex<Option<Arc<dyn LineHook<ScopeRef>>>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self::with_sources(SourceSet::FileSystem, Box::new(io::stdout()))
    }

    pub fn with_sources(sources: SourceSet, output: Box<dyn Write + Send>) -> Self {
        Self {
            sources,
            loaded: Mutex::new(BTreeMap::new()),
            hook: Mutex::new(None),
            output: Mutex::new(output),
        }
    }

    /// In-memory scripts, output discarded.
    pub fn in_memory<I, P, T>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(path, text)| (path.into(), text.into()))
            .collect();
        Self::with_sources(SourceSet::Memory(files), Box::new(io::sink()))
    }

    /// Canonical path for `target`, relative paths taken from `base_dir`.
    pub fn canonical_path(&self, target: &str, base_dir: Option<&Path>) -> Result<String, ScriptError> {
        let joined = match base_dir {
            Some(dir) if Path::new(target).is_relative() => dir.join(target),
            _ => PathBuf::from(target),
        };
        match &self.sources {
            SourceSet::FileSystem => fs::canonicalize(&joined)
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|source| ScriptError::Load {
                    path: joined,
                    source,
                }),
            SourceSet::Memory(_) => Ok(joined.to_string_lossy().into_owned()),
        }
    }

    /// Loads (or returns the already loaded) script at canonical `path`.
    /// A script is registered once and stays registered.
    pub fn load(&self, path: &str) -> Result<Arc<Script>, ScriptError> {
        if let Some(script) = self.lock_loaded().get(path) {
            return Ok(Arc::clone(script));
        }

        let text = match &self.sources {
            SourceSet::FileSystem => fs::read_to_string(path).map_err(|source| ScriptError::Load {
                path: PathBuf::from(path),
                source,
            })?,
            SourceSet::Memory(files) => files.get(path).cloned().ok_or_else(|| ScriptError::Load {
                path: PathBuf::from(path),
                source: io::Error::new(io::ErrorKind::NotFound, "no such script"),
            })?,
        };

        let script = Arc::new(Script::parse(path, &text)?);
        debug!(path, lines = script.len(), "script loaded");
        let mut loaded = self.lock_loaded();
        let entry = loaded
            .entry(path.to_string())
            .or_insert_with(|| Arc::clone(&script));
        Ok(Arc::clone(entry))
    }

    pub fn line_hook(&self) -> Option<Arc<dyn LineHook<ScopeRef>>> {
        self.hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn write_line(&self, text: &str) -> Result<(), ScriptError> {
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{text}")
            .and_then(|_| out.flush())
            .map_err(ScriptError::Output)
    }

    fn lock_loaded(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<Script>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry for ScriptRuntime {
    fn loaded_scripts(&self) -> Vec<String> {
        self.lock_loaded().keys().cloned().collect()
    }

    fn script_lines(&self, path: &str) -> Option<Vec<String>> {
        self.lock_loaded().get(path).map(|script| script.lines.clone())
    }
}

impl ScriptHost for ScriptRuntime {
    type Env = ScopeRef;

    fn set_line_hook(&self, hook: Arc<dyn LineHook<ScopeRef>>) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    fn evaluate(&self, expr: &str, env: &ScopeRef) -> Result<String, EvalError> {
        expr::evaluate(expr, &|name| env.get(name)).map(|value| value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_shadow_and_fall_back() {
        let globals = ScopeRef::root();
        globals.set("Name", "outer");
        globals.set("only_global", "g");
        let local = globals.child();
        local.set("NAME", "inner");

        assert_eq!(local.get("name").as_deref(), Some("inner"));
        assert_eq!(local.get("ONLY_GLOBAL").as_deref(), Some("g"));
        assert_eq!(globals.get("name").as_deref(), Some("outer"));
        assert_eq!(local.get("nope"), None);
    }

    #[test]
    fn registry_grows_on_load() {
        let runtime = ScriptRuntime::in_memory([("/p/a.bat", "echo a\n"), ("/p/b.bat", "echo b\n")]);
        assert!(runtime.loaded_scripts().is_empty());

        runtime.load("/p/b.bat").unwrap();
        assert_eq!(runtime.loaded_scripts(), vec!["/p/b.bat".to_string()]);
        assert_eq!(runtime.script_lines("/p/b.bat"), Some(vec!["echo b".to_string()]));
        assert!(runtime.load("/p/missing.bat").is_err());
    }

    #[test]
    fn relative_paths_join_the_caller_directory() {
        let runtime = ScriptRuntime::in_memory(Vec::<(String, String)>::new());
        let path = runtime
            .canonical_path("lib/util.bat", Some(Path::new("/proj")))
            .unwrap();
        assert_eq!(path, "/proj/lib/util.bat");
        let absolute = runtime.canonical_path("/other/x.bat", Some(Path::new("/proj"))).unwrap();
        assert_eq!(absolute, "/other/x.bat");
    }

    #[test]
    fn evaluates_in_scope() {
        let runtime = ScriptRuntime::in_memory(Vec::<(String, String)>::new());
        let scope = ScopeRef::root();
        scope.set("count", "41");
        assert_eq!(runtime.evaluate("count + 1", &scope), Ok("42".to_string()));
        assert_eq!(
            runtime.evaluate("other", &scope),
            Err(EvalError::UndefinedVariable("other".into()))
        );
    }
}
