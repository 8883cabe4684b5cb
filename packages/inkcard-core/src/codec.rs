/// Card document codec.
///
/// A card document is at most three blocks, in this order:
///   ---            optional frontmatter, kept verbatim
///   ...
///   ---
///
///   <!---inkcard-data
///   { ...JSON metadata... }
///   --->
///
///   free-form body
///
/// Parsing never fails: a missing or corrupt metadata block reads as empty
/// metadata and the rest of the document still loads.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::tokens;
use crate::types::{FloatingGeometry, ParsedCard};

pub const FRONTMATTER_DELIMITER: &str = "---";
pub const METADATA_OPEN: &str = "<!---inkcard-data";
pub const METADATA_CLOSE: &str = "--->";

static METADATA_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!---inkcard-data\s*\n(.*?)\n--->").unwrap());

/// Bare `#RRGGBB` after a `"color":` key, a common hand-editing slip.
static BARE_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"("color"\s*:\s*)(#[0-9a-fA-F]{6})"#).unwrap());

/// Parse a raw document into a card.
pub fn parse_card_content(content: &str) -> ParsedCard {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");

    let (frontmatter, after_frontmatter) = match split_frontmatter(&normalized) {
        Some((fm, rest)) => (Some(fm.to_string()), rest),
        None => (None, normalized.as_str()),
    };

    let (metadata_body, body_with_gap) = match METADATA_BLOCK_RE.captures(after_frontmatter) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let interior = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let mut body = String::with_capacity(after_frontmatter.len());
            body.push_str(&after_frontmatter[..whole.start]);
            body.push_str(&after_frontmatter[whole.end..]);
            (Some(interior), body)
        }
        None => (None, after_frontmatter.to_string()),
    };

    let metadata = parse_metadata_object(metadata_body.as_deref());
    let tags = tokens::tag_tokens_from_value(metadata.get("tags"));

    ParsedCard {
        frontmatter,
        metadata_body,
        body: body_with_gap.trim_start_matches('\n').to_string(),
        tags_line: tokens::format_tag_line(&tags),
        images: tokens::image_paths_from_value(metadata.get("images")),
        color: color_from_value(metadata.get("color")),
        is_pinned: matches!(metadata.get("ispinned"), Some(Value::Bool(true))),
        is_floating: matches!(metadata.get("isfloating"), Some(Value::Bool(true))),
        geometry: geometry_from_metadata(&metadata),
    }
}

/// Assemble a document from its blocks. Empty blocks are omitted; the rest
/// lose trailing blank lines and are separated by one blank line.
pub fn compose_content(frontmatter: Option<&str>, metadata_body: Option<&str>, body: &str) -> String {
    let mut chunks: Vec<String> = Vec::with_capacity(3);
    if let Some(fm) = frontmatter.filter(|fm| !fm.trim().is_empty()) {
        chunks.push(format!(
            "{}\n{}\n{}",
            FRONTMATTER_DELIMITER,
            fm.trim_end_matches('\n'),
            FRONTMATTER_DELIMITER
        ));
    }
    if let Some(meta) = metadata_body.filter(|meta| !meta.trim().is_empty()) {
        chunks.push(format!(
            "{}\n{}\n{}",
            METADATA_OPEN,
            meta.trim_end_matches('\n'),
            METADATA_CLOSE
        ));
    }
    let body = body.trim_start_matches('\n').trim_end_matches('\n');
    if !body.is_empty() {
        chunks.push(body.to_string());
    }
    chunks.join("\n\n")
}

/// Parse the interior of a metadata block. Anything that is not a JSON
/// object, including unparsable text, yields an empty map.
pub fn parse_metadata_object(metadata_body: Option<&str>) -> Map<String, Value> {
    let trimmed = metadata_body.unwrap_or("").trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    let safe = BARE_COLOR_RE.replace_all(trimmed, r#"${1}"${2}""#);
    match serde_json::from_str::<Value>(&safe) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            log::debug!("[inkcard.codec.metadata] Metadata block is not an object, ignoring");
            Map::new()
        }
        Err(e) => {
            log::warn!("[inkcard.codec.metadata] Unparsable metadata block ignored: {}", e);
            Map::new()
        }
    }
}

/// `#RRGGBB` upper-cased, or `None` for anything else.
pub fn normalize_hex_color(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('#')?;
    if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

/// Color from a metadata value; non-strings are not colors.
pub fn color_from_value(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).and_then(normalize_hex_color)
}

/// Finite JSON numbers only. Numeric strings do not count.
pub fn normalize_finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

/// Persisted panel geometry; all four fields or nothing.
pub fn geometry_from_metadata(metadata: &Map<String, Value>) -> Option<FloatingGeometry> {
    Some(FloatingGeometry {
        left: normalize_finite_number(metadata.get("floatx"))?,
        top: normalize_finite_number(metadata.get("floaty"))?,
        width: normalize_finite_number(metadata.get("floatw"))?,
        height: normalize_finite_number(metadata.get("floath"))?,
    })
}

/// Split `---\n...\n---` off the front. Returns (interior, remainder).
///
/// A blank interior is not frontmatter: composing would drop it, so the
/// delimiters stay in the body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let inner = content.strip_prefix("---\n")?;
    let (frontmatter, rest) = match inner.find("\n---\n") {
        Some(end) => (&inner[..end], &inner[end + 5..]),
        None => (inner.strip_suffix("\n---")?, ""),
    };
    if frontmatter.trim().is_empty() {
        return None;
    }
    Some((frontmatter, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = "---\ntitle: Draft\n---\n\n<!---inkcard-data\n{\n  \"warning\": \"x\",\n  \"ispinned\": true,\n  \"color\": \"#4a86e9\",\n  \"tags\": \"#plot,#scene\",\n  \"images\": \"a.png,b.png\"\n}\n--->\n\nThe body.\nSecond line.\n";

    #[test]
    fn test_parse_full_document() {
        let card = parse_card_content(FULL_DOC);
        assert_eq!(card.frontmatter.as_deref(), Some("title: Draft"));
        assert_eq!(card.body, "The body.\nSecond line.\n");
        assert_eq!(card.tags_line, " #plot #scene");
        assert_eq!(card.images, vec!["a.png", "b.png"]);
        assert_eq!(card.color.as_deref(), Some("#4A86E9"));
        assert!(card.is_pinned);
        assert!(!card.is_floating);
        assert_eq!(card.geometry, None);
    }

    #[test]
    fn test_parse_plain_document() {
        let card = parse_card_content("\n\njust text");
        assert_eq!(card.frontmatter, None);
        assert_eq!(card.metadata_body, None);
        assert_eq!(card.body, "just text");
        assert_eq!(card.tags_line, "");
    }

    #[test]
    fn test_parse_crlf_normalized() {
        let card = parse_card_content("---\r\nk: v\r\n---\r\nbody\r\n");
        assert_eq!(card.frontmatter.as_deref(), Some("k: v"));
        assert_eq!(card.body, "body\n");
    }

    #[test]
    fn test_unclosed_frontmatter_is_body() {
        let card = parse_card_content("---\nnot closed\nbody");
        assert_eq!(card.frontmatter, None);
        assert_eq!(card.body, "---\nnot closed\nbody");
    }

    #[test]
    fn test_corrupt_metadata_degrades_to_empty() {
        let doc = "<!---inkcard-data\n{ \"ispinned\": true, \n--->\n\nrest of the note";
        let card = parse_card_content(doc);
        assert!(parse_metadata_object(card.metadata_body.as_deref()).is_empty());
        assert!(!card.is_pinned);
        assert_eq!(card.body, "rest of the note");
    }

    #[test]
    fn test_bare_color_is_quoted() {
        let doc = "<!---inkcard-data\n{\"color\": #f05d6c, \"ispinned\": false}\n--->\nbody";
        let card = parse_card_content(doc);
        assert_eq!(card.color.as_deref(), Some("#F05D6C"));
        assert_eq!(card.body, "body");
    }

    #[test]
    fn test_strict_booleans_and_numbers() {
        let doc = "<!---inkcard-data\n{\"ispinned\": \"true\", \"isfloating\": 1, \"floatx\": 1, \"floaty\": 2, \"floatw\": \"300\", \"floath\": 4}\n--->";
        let card = parse_card_content(doc);
        assert!(!card.is_pinned);
        assert!(!card.is_floating);
        assert_eq!(card.geometry, None);
    }

    #[test]
    fn test_full_geometry() {
        let doc = "<!---inkcard-data\n{\"isfloating\": true, \"floatx\": 10, \"floaty\": 20.5, \"floatw\": 300, \"floath\": 120}\n--->";
        let card = parse_card_content(doc);
        assert!(card.is_floating);
        assert_eq!(card.geometry, Some(FloatingGeometry::new(10.0, 20.5, 300.0, 120.0)));
    }

    #[test]
    fn test_normalize_hex_color() {
        assert_eq!(normalize_hex_color("4a86e9"), None);
        assert_eq!(normalize_hex_color("#4A86E9").as_deref(), Some("#4A86E9"));
        assert_eq!(normalize_hex_color(" #4a86e9 ").as_deref(), Some("#4A86E9"));
        assert_eq!(normalize_hex_color("#4A86E"), None);
        assert_eq!(normalize_hex_color("#4A86EZ"), None);
    }

    #[test]
    fn test_compose_omits_empty_blocks() {
        assert_eq!(compose_content(None, None, "\nbody\n\n"), "body");
        assert_eq!(compose_content(Some("  "), Some(""), "body"), "body");
        assert_eq!(
            compose_content(Some("a: 1\n"), Some("{}\n"), "body"),
            "---\na: 1\n---\n\n<!---inkcard-data\n{}\n--->\n\nbody"
        );
        assert_eq!(compose_content(Some("a: 1"), None, ""), "---\na: 1\n---");
    }

    #[test]
    fn test_compose_parse_is_idempotent() {
        let first = parse_card_content(FULL_DOC);
        let composed = compose_content(
            first.frontmatter.as_deref(),
            first.metadata_body.as_deref(),
            &first.body,
        );
        let second = parse_card_content(&composed);
        let recomposed = compose_content(
            second.frontmatter.as_deref(),
            second.metadata_body.as_deref(),
            &second.body,
        );
        assert_eq!(composed, recomposed);
        assert_eq!(parse_card_content(&recomposed), second);
    }

    #[test]
    fn test_frontmatter_only_round_trip() {
        let composed = compose_content(Some("a: 1"), None, "");
        let parsed = parse_card_content(&composed);
        assert_eq!(parsed.frontmatter.as_deref(), Some("a: 1"));
        assert_eq!(parsed.body, "");
    }

    #[test]
    fn test_blank_frontmatter_stays_in_body() {
        let card = parse_card_content("---\n\n---\nbody");
        assert_eq!(card.frontmatter, None);
        assert_eq!(card.body, "---\n\n---\nbody");
    }

    #[test]
    fn test_doubled_delimiter_survives_a_save() {
        let doc = "---\n---\n---\nx\n---\nbody";
        let first = parse_card_content(doc);
        assert_eq!(first.frontmatter.as_deref(), Some("---"));
        assert_eq!(first.body, "x\n---\nbody");

        let saved = compose_content(first.frontmatter.as_deref(), Some("{}"), &first.body);
        let second = parse_card_content(&saved);
        assert_eq!(second.frontmatter, first.frontmatter);
        assert_eq!(second.body, first.body);
    }

    #[test]
    fn test_metadata_block_in_middle_of_body() {
        let doc = "intro\n<!---inkcard-data\n{\"ispinned\": true}\n--->\noutro";
        let card = parse_card_content(doc);
        assert!(card.is_pinned);
        assert_eq!(card.body, "intro\n\noutro");
    }
}
