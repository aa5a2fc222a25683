//! Text cleanup primitives shared by the format detector and cleaning stages

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid script/style pattern")
});

static COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)</?[A-Za-z!][^>]*>").expect("valid tag pattern"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z]{2,8});")
        .expect("valid entity pattern")
});

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>"']+|www\.[^\s<>"']+"#).expect("valid url pattern")
});

static ZERO_WIDTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{200B}\x{200C}\x{200D}\x{FEFF}\x{00AD}]").expect("valid zero-width pattern")
});

static CONTROL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("valid control pattern")
});

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("valid space pattern"));

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline pattern"));

/// Remove markup, returning the visible text with tags replaced by spaces
///
/// Text without both `<` and `>` is returned unchanged.
pub fn strip_html(input: &str) -> Cow<'_, str> {
    if !(input.contains('<') && input.contains('>')) {
        return Cow::Borrowed(input);
    }
    let without_blocks = SCRIPT_STYLE.replace_all(input, " ");
    let without_comments = COMMENT.replace_all(&without_blocks, " ");
    let without_tags = TAG.replace_all(&without_comments, " ");
    Cow::Owned(decode_entities(&without_tags).into_owned())
}

/// Decode named and numeric character references
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }
    ENTITY.replace_all(input, |caps: &regex::Captures<'_>| {
        let body = &caps[1];
        let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            match body {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                "ndash" => Some('\u{2013}'),
                "mdash" => Some('\u{2014}'),
                "hellip" => Some('\u{2026}'),
                "copy" => Some('\u{a9}'),
                _ => None,
            }
        };
        decoded
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Remove http(s) and www URLs
pub fn strip_urls(input: &str) -> Cow<'_, str> {
    URL.replace_all(input, "")
}

/// Remove zero-width characters and soft hyphens
pub fn remove_zero_width(input: &str) -> Cow<'_, str> {
    ZERO_WIDTH.replace_all(input, "")
}

/// Remove ASCII control characters except newline, tab and carriage return
pub fn remove_control_chars(input: &str) -> Cow<'_, str> {
    CONTROL.replace_all(input, "")
}

/// Collapse runs of spaces/tabs, cap blank lines at one, trim the ends
pub fn normalize_whitespace(input: &str) -> String {
    let collapsed = HORIZONTAL_SPACE.replace_all(input, " ");
    BLANK_LINES
        .replace_all(&collapsed, "\n\n")
        .trim()
        .to_string()
}

/// Map a character back to the single byte cp1252 (or latin-1) would encode it as
fn cp1252_byte(c: char) -> Option<u8> {
    let cp = c as u32;
    if cp <= 0xFF {
        return Some(cp as u8);
    }
    let byte = match c {
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017d}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203a}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017e}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Undo UTF-8 text that was decoded as cp1252/latin-1 ("cafÃ©" -> "café")
///
/// Returns `None` when the text does not look like mojibake or cannot be
/// re-decoded cleanly.
pub fn repair_mojibake(input: &str) -> Option<String> {
    if !input.chars().any(|c| matches!(c, 'Ã' | 'Â' | 'â' | 'Ð' | 'Ñ' | 'Å')) {
        return None;
    }
    let bytes = input.chars().map(cp1252_byte).collect::<Option<Vec<u8>>>()?;
    let repaired = String::from_utf8(bytes).ok()?;
    (repaired.chars().count() < input.chars().count()).then_some(repaired)
}

/// Repair mojibake and drop replacement characters; returns `None` if unchanged
pub fn fix_encoding(input: &str) -> Option<String> {
    let repaired = repair_mojibake(input);
    let current = repaired.as_deref().unwrap_or(input);
    if current.contains('\u{fffd}') {
        return Some(current.replace('\u{fffd}', ""));
    }
    repaired
}

/// Split text into sentences on terminal punctuation
pub fn sentences(input: &str) -> Vec<&str> {
    input
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_removes_tags_and_scripts() {
        let html = "<p>Hello <b>world</b></p><script>alert(1)</script>";
        let stripped = strip_html(html);
        assert_eq!(normalize_whitespace(&stripped), "Hello world");
    }

    #[test]
    fn test_strip_html_leaves_plain_text() {
        assert!(matches!(strip_html("a < b"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &#65; &#x42; &bogus;"), "a & b A B &bogus;");
    }

    #[test]
    fn test_strip_urls() {
        assert_eq!(
            strip_urls("see https://example.com/x and www.test.org now"),
            "see  and  now"
        );
    }

    #[test]
    fn test_fix_encoding_repairs_mojibake() {
        assert_eq!(fix_encoding("cafÃ©").as_deref(), Some("café"));
        assert_eq!(fix_encoding("itâ€™s").as_deref(), Some("it\u{2019}s"));
        assert_eq!(fix_encoding("plain text"), None);
    }

    #[test]
    fn test_fix_encoding_leaves_real_accents() {
        assert_eq!(fix_encoding("café crème"), None);
    }

    #[test]
    fn test_fix_encoding_drops_replacement_chars() {
        assert_eq!(fix_encoding("bad\u{fffd}byte").as_deref(), Some("badbyte"));
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \t  b\n\n\n\nc  "), "a b\n\nc");
    }

    #[test]
    fn test_control_chars_keep_newlines() {
        assert_eq!(remove_control_chars("a\u{0}b\nc\td"), "ab\nc\td");
    }

    #[test]
    fn test_sentences() {
        assert_eq!(sentences("One. Two! Three?"), vec!["One", "Two", "Three"]);
    }
}
