//! Component-markup tolerance for the tokenizer.
//!
//! JSX, Vue, Svelte and Astro sources mix markup with script. [`prepare`]
//! returns a copy of the source with the same byte length in which
//! everything that would confuse an XML tokenizer is blanked out, so offsets
//! computed on the copy still point into the original. [`attributes`] then
//! reads attribute values from the original tag text, `{…}` expressions
//! included.

const FILL: u8 = b'_';

/// Elements whose content is raw text, never markup.
const RAW_TEXT: &[&str] = &["script", "style"];

/// Same-length copy of `source` that tokenizes as markup.
///
/// - `{…}` expressions inside tags have their contents filled, so a `>` in an
///   arrow function or comparison no longer ends the tag.
/// - A `<` not followed by a letter, `/`+letter, `!` or `?` (comparisons,
///   fragments) becomes a space.
/// - `<script>` and `<style>` bodies become spaces.
///
/// Comments are copied verbatim, so an unterminated comment still fails.
pub fn prepare(source: &str) -> String {
    let src = source.as_bytes();
    let mut out = src.to_vec();
    let mut i = 0;

    while i < src.len() {
        if src[i] != b'<' {
            i += 1;
            continue;
        }
        let next = src.get(i + 1).copied();
        let after = src.get(i + 2).copied();
        i = match next {
            Some(b'!') => declaration_end(src, i),
            Some(b'?') => find(src, i, b">").map_or(src.len(), |p| p + 1),
            Some(c) if c.is_ascii_alphabetic() => tag(src, &mut out, i, false),
            Some(b'/') if after.is_some_and(|c| c.is_ascii_alphabetic()) => tag(src, &mut out, i, true),
            Some(b'>') => {
                // `<>` fragment
                blank(&mut out, i, i + 2);
                i + 2
            }
            Some(b'/') if after == Some(b'>') => {
                // `</>` fragment
                blank(&mut out, i, i + 3);
                i + 3
            }
            _ => {
                out[i] = b' ';
                i + 1
            }
        };
    }

    // Only ASCII delimiters bound the replaced ranges, so whole characters are replaced.
    String::from_utf8(out).unwrap_or_else(|_| source.to_string())
}

/// `(name, value)` pairs of a start tag, read from its original text
/// (`<` through `>`). `None` means the attribute had no value.
/// Quoted values are entity-decoded; `{…}` values are returned with braces.
pub fn attributes(tag: &str) -> Vec<(String, Option<String>)> {
    let b = tag.as_bytes();
    let len = b.len();
    let mut out = Vec::new();

    let mut i = 1;
    while i < len && !is_space(b[i]) && b[i] != b'>' && b[i] != b'/' {
        i += 1;
    }

    loop {
        while i < len && (is_space(b[i]) || b[i] == b'/') {
            i += 1;
        }
        if i >= len || b[i] == b'>' {
            break;
        }
        // `{...props}` spread
        if b[i] == b'{' {
            i = brace_end(b, i).unwrap_or(len);
            continue;
        }

        let key_start = i;
        while i < len && !is_space(b[i]) && b[i] != b'=' && b[i] != b'>' && !(b[i] == b'/' && b.get(i + 1) == Some(&b'>')) {
            i += 1;
        }
        let key = tag[key_start..i].to_string();

        let mut j = i;
        while j < len && is_space(b[j]) {
            j += 1;
        }
        if j >= len || b[j] != b'=' {
            out.push((key, None));
            continue;
        }
        j += 1;
        while j < len && is_space(b[j]) {
            j += 1;
        }

        let (value, next) = match b.get(j) {
            Some(b'"') | Some(b'\'') => match quote_end(b, j) {
                Some(close) => (unescape(&tag[j + 1..close]), close + 1),
                None => (unescape(&tag[j + 1..]), len),
            },
            Some(b'{') => {
                let end = brace_end(b, j).unwrap_or(len);
                (tag[j..end].to_string(), end)
            }
            _ => {
                let start = j;
                while j < len && !is_space(b[j]) && b[j] != b'>' {
                    j += 1;
                }
                (tag[start..j].to_string(), j)
            }
        };
        out.push((key, Some(value)));
        i = next;
    }
    out
}

fn unescape(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace()
}

fn blank(out: &mut [u8], from: usize, to: usize) {
    let to = to.min(out.len());
    out[from..to].fill(b' ');
}

fn find(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    src.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// End of `<!-- -->`, `<![CDATA[ ]]>` or `<!DOCTYPE >`. Unterminated ones
/// run to the end and are left for the tokenizer to reject.
fn declaration_end(src: &[u8], i: usize) -> usize {
    let (open, close): (&[u8], &[u8]) = if src[i..].starts_with(b"<!--") {
        (b"<!--", b"-->")
    } else if src[i..].starts_with(b"<![CDATA[") {
        (b"<![CDATA[", b"]]>")
    } else {
        (b"<!", b">")
    };
    find(src, i + open.len(), close).map_or(src.len(), |p| p + close.len())
}

/// Scan one tag starting at `<`; returns the index after it (and after the
/// raw-text body for script/style).
fn tag(src: &[u8], out: &mut [u8], i: usize, closing: bool) -> usize {
    let len = src.len();
    let name_start = i + if closing { 2 } else { 1 };
    let mut j = name_start;
    while j < len && (src[j].is_ascii_alphanumeric() || matches!(src[j], b'-' | b'_' | b':' | b'.')) {
        j += 1;
    }
    let name = String::from_utf8_lossy(&src[name_start..j]).to_ascii_lowercase();

    loop {
        if j >= len {
            return len;
        }
        match src[j] {
            b'"' | b'\'' => j = quote_end(src, j).map_or(len, |p| p + 1),
            b'{' => match brace_end(src, j) {
                Some(end) => {
                    out[j + 1..end - 1].fill(FILL);
                    j = end;
                }
                None => j += 1,
            },
            b'>' => {
                j += 1;
                break;
            }
            _ => j += 1,
        }
    }

    let self_closing = src[..j].ends_with(b"/>");
    if closing || self_closing || !RAW_TEXT.contains(&name.as_str()) {
        return j;
    }
    let body_end = raw_text_end(src, j, &name);
    blank(out, j, body_end);
    body_end
}

fn raw_text_end(src: &[u8], from: usize, name: &str) -> usize {
    let name = name.as_bytes();
    (from..src.len())
        .find(|&k| {
            src[k..].starts_with(b"</")
                && src
                    .get(k + 2..k + 2 + name.len())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .unwrap_or(src.len())
}

/// Index of the quote closing the one at `open`, honoring backslash escapes.
fn quote_end(b: &[u8], open: usize) -> Option<usize> {
    let q = b[open];
    let mut k = open + 1;
    while k < b.len() {
        match b[k] {
            b'\\' => k += 2,
            c if c == q => return Some(k),
            _ => k += 1,
        }
    }
    None
}

/// Index after the `}` balancing the `{` at `open`. Strings and template
/// literals inside the expression are skipped.
fn brace_end(b: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut k = open;
    while k < b.len() {
        match b[k] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(k + 1);
                }
            }
            b'"' | b'\'' | b'`' => k = quote_end(b, k)?,
            _ => {}
        }
        k += 1;
    }
    None
}

// ── Tests ──
