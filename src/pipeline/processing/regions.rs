use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Known spelling variants of state / UT names, keyed by their normalized
/// lookup form (see `lookup_key`). Extend as new variants show up in dumps.
static STATE_VARIANTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("andhra pradesh", "Andhra Pradesh"),
        ("west bengal", "West Bengal"),
        ("westbengal", "West Bengal"),
        ("west bangal", "West Bengal"),
        ("west bengli", "West Bengal"),
        ("odisha", "Odisha"),
        ("orissa", "Odisha"),
        ("puducherry", "Puducherry"),
        ("pondicherry", "Puducherry"),
    ])
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.,'"!?/\\;-]"#).expect("static regex"));

fn collapse_whitespace(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

/// Lowercased, whitespace-collapsed, punctuation-stripped form of a name
fn lookup_key(value: &str) -> String {
    let collapsed = collapse_whitespace(value);
    PUNCTUATION.replace_all(&collapsed, "").to_lowercase()
}

/// Uppercase the first letter after any non-letter, lowercase the rest
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_alpha = false;
    for c in value.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

/// Map a raw state value to its canonical representation.
///
/// Known variants resolve through the lookup table; anything else is
/// whitespace-collapsed and title-cased.
pub fn canonical_state_name(value: &str) -> String {
    match STATE_VARIANTS.get(lookup_key(value).as_str()) {
        Some(canonical) => canonical.to_string(),
        None => title_case(&collapse_whitespace(value)),
    }
}
