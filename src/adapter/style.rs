use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use thiserror::Error;

use crate::adapter::{Adapter, Selector};
use crate::error::AdapterError;
use crate::output::Output;

/// Browsers the generated stylesheets have to support.
pub const BROWSERSLIST: [&str; 3] = ["> 1%", "last 2 versions", "not dead"];

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The browserslist query could not be resolved.
    #[error("Invalid browserslist query: {0}")]
    Browsers(String),

    /// The compiled CSS could not be prefixed.
    #[error("Autoprefixer error: {0}")]
    Prefix(String),

    #[error("CSS source map error: {0}")]
    SourceMap(String),
}

/// Compiled stylesheet and the JSON of its source map.
struct Compiled {
    code: String,
    map: String,
}

/// Compiles one Sass/SCSS entry into compressed, vendor-prefixed CSS with a
/// source map next to it.
///
/// Compilation is done by `grass`, prefixing and the final minification by
/// `lightningcss` using the targets resolved from a browserslist query.
/// `grass` produces no maps, so the map leads back to the compiled Sass with
/// the entry's name.
#[derive(Debug, Clone)]
pub struct StyleAdapter {
    targets: Targets,
    file: Option<&'static str>,
}

impl StyleAdapter {
    pub const MAP_DIR: &'static str = "css_map";

    pub fn new() -> Result<Self, StyleError> {
        Self::with_browsers(&BROWSERSLIST)
    }

    pub fn with_browsers(query: &[&str]) -> Result<Self, StyleError> {
        let browsers = Browsers::from_browserslist(query.iter().copied())
            .map_err(|e| StyleError::Browsers(e.to_string()))?;

        Ok(Self {
            targets: Targets {
                browsers,
                ..Targets::default()
            },
            file: None,
        })
    }

    /// Writes the stylesheet under a fixed file name instead of the entry's.
    pub fn named(mut self, file: &'static str) -> Self {
        self.file = Some(file);
        self
    }

    fn output_name(&self, relative: &Utf8Path) -> Utf8PathBuf {
        match self.file {
            Some(file) => relative.with_file_name(file),
            None => relative.with_extension("css"),
        }
    }

    fn compile(&self, path: &Utf8Path, name: &str) -> Result<Compiled, StyleError> {
        let mut opts = grass::Options::default().style(grass::OutputStyle::Expanded);
        if let Some(parent) = path.parent() {
            opts = opts.load_path(parent);
        }

        let css = grass::from_path(path, &opts)?;
        self.prefix(&css, name)
    }

    fn prefix(&self, css: &str, name: &str) -> Result<Compiled, StyleError> {
        let mut map = SourceMap::new("/");
        let source_index = map.add_source(name);
        map.set_source_content(source_index as usize, css)
            .map_err(map_error)?;

        let options = ParserOptions {
            filename: name.to_string(),
            source_index,
            ..ParserOptions::default()
        };

        let mut sheet =
            StyleSheet::parse(css, options).map_err(|e| StyleError::Prefix(e.to_string()))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets.clone(),
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::Prefix(e.to_string()))?;

        let printed = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets: self.targets.clone(),
                source_map: Some(&mut map),
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::Prefix(e.to_string()))?;

        Ok(Compiled {
            code: printed.code,
            map: map.to_json(None).map_err(map_error)?,
        })
    }
}

fn map_error(e: parcel_sourcemap::SourceMapError) -> StyleError {
    StyleError::SourceMap(format!("{e:?}"))
}

impl Adapter for StyleAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        let mut outputs = Vec::new();

        for source in input.resolve()? {
            let file = self.output_name(&source.relative);
            let map_path = Utf8Path::new(Self::MAP_DIR).join(format!("{file}.map"));

            let compiled = self.compile(&source.path, source.relative.as_str())?;
            let code = format!("{}\n/*# sourceMappingURL={map_path} */\n", compiled.code);

            outputs.push(Output::text(file, code));
            outputs.push(Output::text(map_path, compiled.map));
        }

        Ok(outputs)
    }
}
