use crate::parser::path::REPEATER_TOKEN;

/// Human label from an identifier: `heroTitle` → `Hero Title`, `cta_button-text` → `Cta Button Text`.
pub fn derive_label(ident: &str) -> String {
    split_words(ident)
        .iter()
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Label from the last non-placeholder segment of a dotted path.
pub fn label_for_path(path: &str) -> String {
    path.rsplit('.')
        .find(|s| !s.is_empty() && *s != REPEATER_TOKEN)
        .map(derive_label)
        .unwrap_or_default()
}

fn split_words(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == '.' || c == '$' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // fooBar, foo2Bar, and the `P` in `HTMLParser`
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn title_case(word: &str) -> String {
    let is_acronym = word.chars().count() > 1 && word.chars().all(|c| !c.is_lowercase());
    if is_acronym {
        return word.to_string();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

// ── Tests ──
