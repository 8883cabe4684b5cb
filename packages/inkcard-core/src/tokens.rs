/// Tag and image-path normalization shared by the codec and the metadata builder.
///
/// Both extractors are total: any input yields a (possibly empty) list.
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::types::MAX_IMAGES;

static DIRECT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#[^\s,#]+").unwrap());

/// Borrow the string items of a metadata value: a single string or a list of
/// strings. Anything else has no items.
pub fn string_items(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Extract canonical `#tag` tokens, deduplicated in first-seen order.
///
/// Each comma-separated segment is read on its own. A segment containing `#`
/// contributes every `#`-prefixed run in it; a bare segment becomes a single
/// tag when it has no internal whitespace.
pub fn extract_tag_tokens<'a, I>(raw_items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tokens = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |core: &str| {
        let core = core.trim();
        if core.is_empty() || core.chars().any(char::is_whitespace) {
            return;
        }
        let normalized = format!("#{}", core);
        if seen.insert(normalized.clone()) {
            tokens.push(normalized);
        }
    };

    for raw in raw_items {
        for segment in raw.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            if segment.contains('#') {
                for m in DIRECT_TAG_RE.find_iter(segment) {
                    push(&m.as_str()[1..]);
                }
            } else {
                push(segment);
            }
        }
    }
    tokens
}

/// Tag tokens from a metadata `tags` value.
pub fn tag_tokens_from_value(value: Option<&Value>) -> Vec<String> {
    extract_tag_tokens(string_items(value))
}

/// Display form of a token list: empty, or a leading space then the tokens.
pub fn format_tag_line(tokens: &[String]) -> String {
    if tokens.is_empty() {
        String::new()
    } else {
        format!(" {}", tokens.join(" "))
    }
}

/// Stored form of a token list, `None` when there are no tags.
pub fn format_tag_csv(tokens: &[String]) -> Option<String> {
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(","))
    }
}

/// Canonical display form of whatever the user typed into the tag editor.
pub fn normalize_tag_line(value: &str) -> String {
    format_tag_line(&extract_tag_tokens([value]))
}

/// Split comma-separated image paths, trim, dedupe and cap at [`MAX_IMAGES`].
pub fn extract_image_paths<'a, I>(raw_items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let paths: Vec<&str> = raw_items
        .into_iter()
        .flat_map(|item| item.split(','))
        .collect();
    normalize_image_paths(&paths)
}

/// Image paths from a metadata `images` value.
pub fn image_paths_from_value(value: Option<&Value>) -> Vec<String> {
    extract_image_paths(string_items(value))
}

/// Trim, drop empties and duplicates, keep at most [`MAX_IMAGES`] entries.
pub fn normalize_image_paths<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for raw in paths {
        let path = raw.as_ref().trim();
        if path.is_empty() || !seen.insert(path) {
            continue;
        }
        normalized.push(path.to_string());
        if normalized.len() >= MAX_IMAGES {
            break;
        }
    }
    normalized
}

/// Stored form of an image list, `None` when empty.
pub fn format_image_csv<S: AsRef<str>>(paths: &[S]) -> Option<String> {
    let normalized = normalize_image_paths(paths);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_dedup_and_prefix() {
        assert_eq!(extract_tag_tokens(["#a, #a, b"]), vec!["#a", "#b"]);
    }

    #[test]
    fn test_tags_space_separated_line() {
        assert_eq!(extract_tag_tokens([" #plot #character"]), vec!["#plot", "#character"]);
    }

    #[test]
    fn test_tags_reject_internal_whitespace() {
        assert_eq!(extract_tag_tokens(["two words, ok"]), vec!["#ok"]);
    }

    #[test]
    fn test_tags_glued_hashes_split() {
        assert_eq!(extract_tag_tokens(["#a#b"]), vec!["#a", "#b"]);
    }

    #[test]
    fn test_tags_from_list_value() {
        let value = json!(["#x", 5, "y,#x"]);
        assert_eq!(tag_tokens_from_value(Some(&value)), vec!["#x", "#y"]);
    }

    #[test]
    fn test_tags_from_non_string_value() {
        assert!(tag_tokens_from_value(Some(&json!(42))).is_empty());
        assert!(tag_tokens_from_value(None).is_empty());
    }

    #[test]
    fn test_tag_line_formats() {
        let tokens = vec!["#a".to_string(), "#b".to_string()];
        assert_eq!(format_tag_line(&tokens), " #a #b");
        assert_eq!(format_tag_csv(&tokens).as_deref(), Some("#a,#b"));
        assert_eq!(format_tag_line(&[]), "");
        assert_eq!(format_tag_csv(&[]), None);
        assert_eq!(normalize_tag_line("b, #a b"), " #b #a");
    }

    #[test]
    fn test_image_cap_keeps_first_eight() {
        let raw = (1..=10).map(|i| format!("img/{}.png", i)).collect::<Vec<_>>().join(",");
        let paths = extract_image_paths([raw.as_str()]);
        assert_eq!(paths.len(), MAX_IMAGES);
        assert_eq!(paths[0], "img/1.png");
        assert_eq!(paths[7], "img/8.png");
    }

    #[test]
    fn test_image_dedup_and_trim() {
        let value = json!(["a.png, b.png", " a.png ", ""]);
        assert_eq!(image_paths_from_value(Some(&value)), vec!["a.png", "b.png"]);
        assert_eq!(format_image_csv(&["a.png", "a.png"]).as_deref(), Some("a.png"));
        assert_eq!(format_image_csv::<&str>(&[]), None);
    }
}
