use std::fs;

use crate::adapter::{Adapter, Selector};
use crate::error::AdapterError;
use crate::output::Output;

/// Elements whose content is copied verbatim.
const RAW_ELEMENTS: [&str; 4] = ["pre", "textarea", "script", "style"];

/// Elements that flow with text, so whitespace around them is significant.
const INLINE_ELEMENTS: [&str; 29] = [
    "a", "abbr", "b", "bdi", "bdo", "br", "button", "cite", "code", "data", "dfn", "em", "i",
    "img", "input", "kbd", "label", "mark", "q", "s", "samp", "select", "small", "span",
    "strong", "sub", "sup", "time", "u",
];

/// Copies templates as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageAdapter;

impl Adapter for PageAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        input
            .resolve()?
            .into_iter()
            .map(|source| {
                let text = fs::read_to_string(&source.path)?;
                Ok(Output::text(source.relative, text))
            })
            .collect()
    }
}

/// Copies templates with whitespace collapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlAdapter;

impl Adapter for HtmlAdapter {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError> {
        input
            .resolve()?
            .into_iter()
            .map(|source| {
                let text = fs::read_to_string(&source.path)?;
                Ok(Output::text(source.relative, collapse_whitespace(&text)))
            })
            .collect()
    }
}

/// Returns the lowercased element name of a tag and whether it closes.
fn tag_name(tag: &str) -> Option<(String, bool)> {
    let inner = tag.strip_prefix('<')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };

    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    (!name.is_empty()).then(|| (name.to_ascii_lowercase(), closing))
}

fn is_inline(tag: Option<&str>) -> bool {
    tag.and_then(tag_name)
        .is_some_and(|(name, _)| INLINE_ELEMENTS.contains(&name.as_str()))
}

/// Collapses whitespace runs inside a tag, leaving quoted values alone.
fn collapse_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut quote = None;
    let mut space = false;

    for c in tag.chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        if c.is_whitespace() {
            space = true;
            continue;
        }

        if space && c != '>' {
            out.push(' ');
        }
        space = false;

        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }

    out
}

fn collapse_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            space = true;
        } else {
            if space {
                out.push(' ');
            }
            space = false;
            out.push(c);
        }
    }

    if space {
        out.push(' ');
    }

    out
}

/// Minifies HTML by collapsing whitespace.
///
/// Whitespace-only text is dropped unless it separates two inline elements,
/// text next to block-level tags is trimmed, and other whitespace runs shrink
/// to a single space. Comments and the content of `pre`, `textarea`,
/// `script` and `style` are kept byte for byte.
pub fn collapse_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut last_tag: Option<String> = None;

    while !rest.is_empty() {
        if rest.starts_with("<!--") {
            let end = rest.find("-->").map_or(rest.len(), |i| i + 3);
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }

        if rest.starts_with('<') {
            let end = rest.find('>').map_or(rest.len(), |i| i + 1);
            let tag = collapse_tag(&rest[..end]);
            rest = &rest[end..];
            out.push_str(&tag);

            if let Some((name, false)) = tag_name(&tag)
                && RAW_ELEMENTS.contains(&name.as_str())
                && !tag.ends_with("/>")
            {
                let close = format!("</{name}");
                let end = rest
                    .to_ascii_lowercase()
                    .find(&close)
                    .unwrap_or(rest.len());
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            }

            last_tag = Some(tag);
            continue;
        }

        let end = rest.find('<').unwrap_or(rest.len());
        let text = &rest[..end];
        rest = &rest[end..];

        let next_tag = rest
            .starts_with('<')
            .then(|| &rest[..rest.find('>').map_or(rest.len(), |i| i + 1)]);

        let inline_before = is_inline(last_tag.as_deref());
        let inline_after = is_inline(next_tag);

        if text.trim().is_empty() {
            if inline_before && inline_after {
                out.push(' ');
            }
            continue;
        }

        let mut text = collapse_text(text);
        if !inline_before {
            text = text.trim_start().to_string();
        }
        if !inline_after {
            text = text.trim_end().to_string();
        }
        out.push_str(&text);
    }

    out.trim().to_string()
}
