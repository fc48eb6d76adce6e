use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::adapter::sourcemap::{LineMapBuilder, SourceMap, SourceMapError};
use crate::adapter::{Adapter, Selector};
use crate::error::{AdapterError, CompileError};
use crate::output::{Output, normalize_path};

const ESBUILD: &str = "esbuild";
const INLINE_MAP: &str = "//# sourceMappingURL=data:application/json;base64,";

/// Errors that can occur when bundling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The engine process could not be started.
    #[error("Couldn't start {0}: {1}")]
    Spawn(&'static str, std::io::Error),

    /// The Esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),

    /// Failed to parse engine output as UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("{file}:{line}: can't find '{name}' to include")]
    MissingInclude {
        file: Utf8PathBuf,
        line: usize,
        name: String,
    },

    #[error("{0} includes itself")]
    IncludeCycle(Utf8PathBuf),

    #[error("Source map error: {0}")]
    SourceMap(#[from] SourceMapError),

    #[error("Source map JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source map encoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Engine output has no inline source map")]
    MissingMap,
}

/// JavaScript text, optionally with the map that leads back to its sources.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub code: String,
    pub map: Option<SourceMap>,
}

/// Something that can transpile and minify a JavaScript bundle.
///
/// When the input carries a source map, the returned map must resolve to the
/// same original sources.
pub trait ScriptEngine: Send + Sync {
    fn minify(&self, bundle: &Bundle) -> Result<Bundle, ScriptError>;
}

/// Runs the `esbuild` binary, which has to be available in `PATH`.
#[derive(Debug, Clone)]
pub struct Esbuild {
    target: Option<&'static str>,
}

impl Esbuild {
    /// Minifies and lowers syntax to ES2015.
    pub fn new() -> Self {
        Self {
            target: Some("es2015"),
        }
    }

    /// Minifies without touching the syntax level.
    pub fn minify_only() -> Self {
        Self { target: None }
    }
}

impl Default for Esbuild {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for Esbuild {
    fn minify(&self, bundle: &Bundle) -> Result<Bundle, ScriptError> {
        let mut cmd = Command::new(ESBUILD);
        cmd.arg("--minify")
            .arg("--loader=js")
            .arg(format!("--sourcefile={}", bundle.name));

        if let Some(target) = self.target {
            cmd.arg(format!("--target={target}"));
        }

        let mut input = bundle.code.clone();
        if let Some(map) = &bundle.map {
            cmd.arg("--sourcemap=inline");
            if !input.ends_with('\n') {
                input.push('\n');
            }
            input.push_str(INLINE_MAP);
            input.push_str(&STANDARD.encode(map.to_json()?));
            input.push('\n');
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScriptError::Spawn(ESBUILD, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|e| ScriptError::Spawn(ESBUILD, e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ScriptError::Spawn(ESBUILD, e))?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(String::from_utf8(output.stderr)?));
        }

        let stdout = String::from_utf8(output.stdout)?;

        if bundle.map.is_none() {
            return Ok(Bundle {
                name: bundle.name.clone(),
                code: stdout,
                map: None,
            });
        }

        let (code, map) = split_inline_map(&stdout)?;
        Ok(Bundle {
            name: bundle.name.clone(),
            code,
            map: Some(map),
        })
    }
}

/// Separates engine output into code and the decoded inline map.
fn split_inline_map(text: &str) -> Result<(String, SourceMap), ScriptError> {
    let start = text.rfind(INLINE_MAP).ok_or(ScriptError::MissingMap)?;
    let encoded = text[start + INLINE_MAP.len()..].trim();
    let json = String::from_utf8(STANDARD.decode(encoded)?)?;
    let map = SourceMap::from_json(&json)?;

    Ok((text[..start].trim_end().to_string(), map))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    /// Inline the file every time.
    Include,
    /// Inline the file only once per bundle.
    Require,
}

fn parse_directive(line: &str) -> Option<(Directive, &str)> {
    let rest = line.trim_start().strip_prefix("//=")?.trim_start();

    let (kind, rest) = if let Some(rest) = rest.strip_prefix("include") {
        (Directive::Include, rest)
    } else if let Some(rest) = rest.strip_prefix("require") {
        (Directive::Require, rest)
    } else {
        return None;
    };

    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let name = rest.trim().trim_matches(|c| c == '"' || c == '\'');
    (!name.is_empty()).then_some((kind, name))
}

/// Concatenates sources, inlining partials and recording where every
/// generated line came from.
struct Concat<'a> {
    base: &'a Utf8Path,
    modules: &'a Utf8Path,
    lines: Vec<String>,
    map: LineMapBuilder,
    required: HashSet<Utf8PathBuf>,
    stack: Vec<Utf8PathBuf>,
}

impl<'a> Concat<'a> {
    fn new(base: &'a Utf8Path, modules: &'a Utf8Path) -> Self {
        Self {
            base,
            modules,
            lines: Vec::new(),
            map: LineMapBuilder::new(),
            required: HashSet::new(),
            stack: Vec::new(),
        }
    }

    fn source_name(&self, path: &Utf8Path) -> String {
        match path.strip_prefix(self.base) {
            Ok(relative) => relative.to_string(),
            Err(_) => path.file_name().unwrap_or(path.as_str()).to_string(),
        }
    }

    fn resolve(&self, from: &Utf8Path, name: &str) -> Option<Utf8PathBuf> {
        let name = Utf8Path::new(name);
        let name = match name.extension() {
            Some(_) => name.to_path_buf(),
            None => name.with_extension("js"),
        };

        let dir = from.parent().unwrap_or(Utf8Path::new(""));

        [dir.join(&name), self.modules.join(&name)]
            .into_iter()
            .map(|path| normalize_path(&path))
            .find(|path| path.is_file())
    }

    fn push(&mut self, path: &Utf8Path) -> Result<(), AdapterError> {
        let path = normalize_path(path);
        self.required.insert(path.clone());
        self.expand(&path)
    }

    fn expand(&mut self, path: &Utf8Path) -> Result<(), AdapterError> {
        if self.stack.iter().any(|p| p == path) {
            return Err(ScriptError::IncludeCycle(path.to_path_buf()).into());
        }

        let text = fs::read_to_string(path)?;
        let name = self.source_name(path);
        let source = self.map.add_source(&name, &text);
        self.stack.push(path.to_path_buf());

        for (i, line) in text.lines().enumerate() {
            let Some((kind, name)) = parse_directive(line) else {
                self.lines.push(line.to_string());
                self.map.push_line(source, i as u32);
                continue;
            };

            let target = self
                .resolve(path, name)
                .ok_or_else(|| ScriptError::MissingInclude {
                    file: path.to_path_buf(),
                    line: i + 1,
                    name: name.to_string(),
                })?;

            let first = self.required.insert(target.clone());
            if kind == Directive::Require && !first {
                continue;
            }

            self.expand(&target)?;
        }

        self.stack.pop();
        Ok(())
    }

    fn finish(self, name: &str) -> Bundle {
        let mut code = self.lines.join("\n");
        code.push('\n');

        Bundle {
            name: name.to_string(),
            code,
            map: Some(self.map.build(name)),
        }
    }
}

/// Bundles every script under a base directory into one minified file.
///
/// Files in the partials directory are not bundled on their own; they only
/// end up in the output through `//= include` and `//= require` lines.
pub struct ScriptAdapter {
    engine: Arc<dyn ScriptEngine>,
    modules: Utf8PathBuf,
    name: &'static str,
}

impl ScriptAdapter {
    pub const MAP_DIR: &'static str = "js_map";

    pub fn new(engine: Arc<dyn ScriptEngine>, modules: impl Into<Utf8PathBuf>) -> Self {
        Self {
            engine,
            modules: modules.into(),
            name: "main.js",
        }
    }

    fn minified_name(&self) -> String {
        Utf8Path::new(self.name).with_extension("min.js").to_string()
    }

    /// Concatenates the selected sources with their includes resolved.
    pub fn concat(&self, input: &Selector) -> Result<Bundle, AdapterError> {
        let base = input.base();
        let mut concat = Concat::new(base, &self.modules);

        for source in input.resolve()? {
            if source.path.starts_with(&self.modules) {
                continue;
            }
            concat.push(&source.path)?;
        }

        Ok(concat.finish(self.name))
    }
}

impl Adapter for ScriptAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        let bundle = self.concat(input)?;
        let minified = self.engine.minify(&bundle)?;

        let file = self.minified_name();
        let map_path = Utf8Path::new(Self::MAP_DIR).join(format!("{file}.map"));

        let mut code = minified.code.trim_end().to_string();
        code.push_str(&format!("\n//# sourceMappingURL={map_path}\n"));

        let mut outputs = vec![Output::text(&file, code)];

        if let Some(mut map) = minified.map {
            map.file = Some(file);
            let json = map
                .to_json()
                .map_err(|e| CompileError::Script(ScriptError::Json(e)))?;
            outputs.push(Output::text(map_path, json));
        }

        Ok(outputs)
    }
}

/// Minifies every selected script on its own, keeping relative paths and
/// adding a `.min` suffix. A file that fails to minify is logged and skipped.
pub struct ScriptMinifyAdapter {
    engine: Arc<dyn ScriptEngine>,
}

impl ScriptMinifyAdapter {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self { engine }
    }
}

impl Adapter for ScriptMinifyAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        let mut outputs = Vec::new();

        for source in input.resolve()? {
            let bundle = Bundle {
                name: source.relative.to_string(),
                code: fs::read_to_string(&source.path)?,
                map: None,
            };

            match self.engine.minify(&bundle) {
                Ok(minified) => {
                    outputs.push(Output::text(
                        source.relative.with_extension("min.js"),
                        minified.code,
                    ));
                }
                Err(err) => {
                    tracing::error!(file = %source.path, "{err}");
                }
            }
        }

        Ok(outputs)
    }
}
