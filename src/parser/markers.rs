use std::collections::{BTreeMap, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use super::{lenient, modifiers};
use crate::error::{Diagnostic, DiagnosticKind, ExtractError};

pub const DEFAULT_MARKER: &str = "data-cms";

/// HTML elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// One marker-annotated element as found in a source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedField {
    pub path: String,
    pub attributes: BTreeMap<String, String>,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub element_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub fields: Vec<DetectedField>,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub marker: String,
    pub capture_text: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            marker: DEFAULT_MARKER.to_string(),
            capture_text: true,
        }
    }
}

struct OpenElement {
    name: String,
    capture: Option<usize>,
}

/// Byte offsets of line starts, for offset → (line, column).
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineIndex { starts }
    }

    fn position(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.starts[line];
        let column = source
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset.saturating_sub(line_start));
        (line + 1, column + 1)
    }
}

/// Extract every marker-annotated element from one markup source.
///
/// Script in component files is blanked before tokenizing (see
/// [`lenient::prepare`]); positions and attribute values still come from
/// `source`. A tokenizer failure fails the whole file; malformed modifier
/// values only produce warnings.
pub fn extract(source: &str, file: &str, opts: &ExtractOptions) -> Result<Extraction, ExtractError> {
    let lines = LineIndex::new(source);
    let modifier_prefix = format!("{}-", opts.marker);
    let markup = lenient::prepare(source);

    let mut reader = Reader::from_str(&markup);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.check_comments = false;
    }

    let mut out = Extraction::default();
    let mut open: Vec<OpenElement> = Vec::new();
    let mut buffers: HashMap<usize, String> = HashMap::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|source| ExtractError::Markup {
            offset: reader.error_position() as usize,
            source,
        })?;

        match event {
            Event::Start(e) => {
                let name = tag_name(&e);
                let tag = source.get(start..reader.buffer_position() as usize).unwrap_or_default();
                let idx = detect(tag, &name, start, source, file, &lines, opts, &modifier_prefix, &mut out);
                if is_void(&name) {
                    continue;
                }
                if let Some(i) = idx {
                    buffers.insert(i, String::new());
                }
                open.push(OpenElement { name, capture: idx });
            }
            Event::Empty(e) => {
                let name = tag_name(&e);
                let tag = source.get(start..reader.buffer_position() as usize).unwrap_or_default();
                detect(tag, &name, start, source, file, &lines, opts, &modifier_prefix, &mut out);
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                append_text(&open, &mut buffers, &text);
            }
            Event::CData(c) => {
                append_text(&open, &mut buffers, &String::from_utf8_lossy(&c));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                if let Some(pos) = open.iter().rposition(|el| el.name == name) {
                    for el in open.drain(pos..) {
                        finish_capture(el.capture, &mut buffers, &mut out.fields, opts);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Unclosed elements still yield their text.
    for el in open.drain(..) {
        finish_capture(el.capture, &mut buffers, &mut out.fields, opts);
    }

    Ok(out)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase()
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

#[allow(clippy::too_many_arguments)]
fn detect(
    tag: &str,
    name: &str,
    offset: usize,
    source: &str,
    file: &str,
    lines: &LineIndex,
    opts: &ExtractOptions,
    modifier_prefix: &str,
    out: &mut Extraction,
) -> Option<usize> {
    let mut path = None;
    let mut raw_modifiers = Vec::new();

    for (key, value) in lenient::attributes(tag) {
        let key = key.to_ascii_lowercase();
        if key == opts.marker {
            path = Some(modifiers::normalize_value(value.as_deref().unwrap_or_default()));
        } else if let Some(modifier) = key.strip_prefix(modifier_prefix) {
            if !modifiers::is_modifier(modifier) {
                continue;
            }
            let value = match value {
                Some(v) => modifiers::normalize_value(&v),
                // Bare boolean attribute, as in HTML.
                None if modifiers::is_flag(modifier) => "true".to_string(),
                None => String::new(),
            };
            raw_modifiers.push((modifier.to_string(), value));
        }
    }

    let path = path?;
    let (line, column) = lines.position(source, offset);

    let mut attributes = BTreeMap::new();
    for (modifier, value) in raw_modifiers {
        if let Err(reason) = modifiers::check(&modifier, &value) {
            out.warnings.push(
                Diagnostic::warning(DiagnosticKind::Modifier, reason)
                    .at(file, line, column)
                    .for_path(&path),
            );
        }
        attributes.insert(modifier, value);
    }

    out.fields.push(DetectedField {
        path,
        attributes,
        file: file.to_string(),
        line,
        column,
        element_tag: name.to_string(),
        text_content: None,
    });
    Some(out.fields.len() - 1)
}

fn append_text(open: &[OpenElement], buffers: &mut HashMap<usize, String>, text: &str) {
    for el in open {
        if let Some(buf) = el.capture.and_then(|i| buffers.get_mut(&i)) {
            buf.push_str(text);
        }
    }
}

fn finish_capture(
    capture: Option<usize>,
    buffers: &mut HashMap<usize, String>,
    fields: &mut [DetectedField],
    opts: &ExtractOptions,
) {
    let Some(i) = capture else { return };
    let Some(raw) = buffers.remove(&i) else { return };
    if !opts.capture_text || fields[i].attributes.contains_key("default") {
        return;
    }
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    // A bare JSX expression is a binding, not literal content.
    if text.is_empty() || (text.starts_with('{') && text.ends_with('}')) {
        return;
    }
    fields[i].text_content = Some(text);
}

// ── Tests ──
