//! Source map v3 support, limited to what the script bundle needs: building
//! a line-level map while concatenating files, and decoding maps to resolve a
//! generated position back to where it came from.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceMapError {
    #[error("Invalid base64 VLQ character '{0}'")]
    InvalidChar(char),

    #[error("VLQ value is truncated")]
    Truncated,

    #[error("VLQ value doesn't fit in 32 bits")]
    Overflow,

    #[error("Segment with {0} fields")]
    SegmentLength(usize),

    #[error("Segment refers to source #{0} which doesn't exist")]
    UnknownSource(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// A decoded mapping from a generated position to an original one.
/// Lines and columns are zero-based, as in the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source: u32,
    pub original_line: u32,
    pub original_column: u32,
}

impl SourceMap {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Decodes every segment that points back into a source. Segments that
    /// carry only a generated column are skipped.
    pub fn segments(&self) -> Result<Vec<Segment>, SourceMapError> {
        let mut segments = Vec::new();
        let (mut source, mut line, mut column) = (0i64, 0i64, 0i64);

        for (generated_line, group) in self.mappings.split(';').enumerate() {
            let mut generated_column = 0i64;

            for raw in group.split(',').filter(|s| !s.is_empty()) {
                let fields = decode_vlq(raw)?;
                match fields.len() {
                    1 => generated_column += fields[0],
                    4 | 5 => {
                        generated_column += fields[0];
                        source += fields[1];
                        line += fields[2];
                        column += fields[3];

                        if source < 0 || source as usize >= self.sources.len() {
                            return Err(SourceMapError::UnknownSource(source));
                        }

                        segments.push(Segment {
                            generated_line: generated_line as u32,
                            generated_column: generated_column as u32,
                            source: source as u32,
                            original_line: line as u32,
                            original_column: column as u32,
                        });
                    }
                    n => return Err(SourceMapError::SegmentLength(n)),
                }
            }
        }

        Ok(segments)
    }

    /// Finds the original position of a generated one: the closest segment on
    /// the same line that starts at or before `column`.
    pub fn lookup(&self, line: u32, column: u32) -> Result<Option<Segment>, SourceMapError> {
        Ok(self
            .segments()?
            .into_iter()
            .filter(|s| s.generated_line == line && s.generated_column <= column)
            .max_by_key(|s| s.generated_column))
    }
}

/// Collects a map one generated line at a time.
#[derive(Debug, Default)]
pub struct LineMapBuilder {
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    lines: Vec<(u32, u32)>,
}

impl LineMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source (once per name) and returns its index.
    pub fn add_source(&mut self, name: &str, content: &str) -> u32 {
        if let Some(index) = self.sources.iter().position(|s| s == name) {
            return index as u32;
        }

        self.sources.push(name.to_string());
        self.contents.push(Some(content.to_string()));
        (self.sources.len() - 1) as u32
    }

    /// Maps the next generated line to `original_line` of `source`.
    pub fn push_line(&mut self, source: u32, original_line: u32) {
        self.lines.push((source, original_line));
    }

    pub fn build(self, file: impl Into<String>) -> SourceMap {
        let mut mappings = String::new();
        let (mut prev_source, mut prev_line) = (0i64, 0i64);

        for (i, &(source, original)) in self.lines.iter().enumerate() {
            if i > 0 {
                mappings.push(';');
            }

            let (source, original) = (source as i64, original as i64);
            encode_vlq(&mut mappings, 0);
            encode_vlq(&mut mappings, source - prev_source);
            encode_vlq(&mut mappings, original - prev_line);
            encode_vlq(&mut mappings, 0);
            prev_source = source;
            prev_line = original;
        }

        SourceMap {
            version: 3,
            file: Some(file.into()),
            sources: self.sources,
            sources_content: self.contents,
            names: Vec::new(),
            mappings,
        }
    }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Largest shift a 32-bit value can need: seven digits of five bits.
const MAX_SHIFT: u32 = 30;

fn decode_vlq(segment: &str) -> Result<Vec<i64>, SourceMapError> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0;
    let mut pending = false;

    for c in segment.chars() {
        let digit = BASE64
            .iter()
            .position(|&b| b as char == c)
            .ok_or(SourceMapError::InvalidChar(c))? as i64;

        value += (digit & 0b11111) << shift;
        pending = digit & 0b100000 != 0;

        if pending {
            shift += 5;
            if shift > MAX_SHIFT {
                return Err(SourceMapError::Overflow);
            }
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            values.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
        }
    }

    if pending {
        return Err(SourceMapError::Truncated);
    }

    Ok(values)
}
