//! Text-level parsing of report posts: HTML stripping, category and medium,
//! free-form notes and mention checks.

use std::sync::LazyLock;

use regex::Regex;

use heatmap_common::{Medium, UNKNOWN_CATEGORY};

use crate::traits::SocialPost;

/// Notes longer than this are cut.
pub const MAX_NOTE_CHARS: usize = 500;

static RE_PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</p>\s*<p[^>]*>").unwrap());
static RE_PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p>").unwrap());
static RE_BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_INLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\x0C\x0B]+").unwrap());
static RE_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());
static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[a-zA-Z]{2,8});").unwrap());

static RE_TYPE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*#(sticker|graffiti|grafitti)_(?:type|typ)\s*:?\s*([^\n#@]{1,200})").unwrap()
});
static RE_LOCATION_PREFIX_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\b(?:ort|location|place|standort)\s*:.*$").unwrap());
static RE_TRAILING_MEDIUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*([^\n#@,:]{1,80}?)\s+(sticker|graffiti|grafitti)\s*$").unwrap()
});
static RE_NOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)#note\s*:\s*([^#]*)").unwrap());

/// HTML body to plain text with one line per paragraph or `<br>`.
pub fn strip_html(html: &str) -> String {
    let s = RE_PARAGRAPH_BREAK.replace_all(html, "\n");
    let s = RE_PARAGRAPH_END.replace_all(&s, "\n");
    let s = RE_BR.replace_all(&s, "\n");
    let s = RE_TAG.replace_all(&s, "");
    let s = decode_entities(&s);
    let s = RE_INLINE_WS.replace_all(&s, " ");
    let s = RE_BLANK_LINES.replace_all(&s, "\n");
    s.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Decode the character references Mastodon emits. Unknown names are kept verbatim.
pub fn decode_entities(s: &str) -> String {
    RE_ENTITY
        .replace_all(s, |caps: &regex::Captures| {
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
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

/// What a post says about the thing it reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDetails {
    pub category: String,
    pub medium: Option<Medium>,
    pub note: String,
}

fn medium_word(word: &str) -> Option<Medium> {
    match word.to_ascii_lowercase().as_str() {
        "sticker" => Some(Medium::Sticker),
        "graffiti" | "grafitti" => Some(Medium::Graffiti),
        _ => None,
    }
}

/// Medium implied by the hashtag the post was found under.
pub fn medium_from_tag(tag: &str) -> Option<Medium> {
    let tag = tag.to_ascii_lowercase();
    if tag.starts_with("sticker") {
        Some(Medium::Sticker)
    } else if tag.starts_with("graffiti") || tag.starts_with("grafitti") {
        Some(Medium::Graffiti)
    } else {
        None
    }
}

/// Category and medium as stated by the post.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryParse {
    pub category: String,
    pub medium: Option<Medium>,
    /// Both sticker and graffiti type lines were present.
    pub conflict: bool,
}

/// Category and medium from `#sticker_type:` / `#graffiti_type:` lines.
///
/// Both kinds in one post is a conflict: category `unknown`, no medium.
/// Without type lines, a line like `AfD sticker` supplies both.
pub fn parse_category(text: &str) -> CategoryParse {
    let mut hits: Vec<(Medium, String)> = Vec::new();
    for caps in RE_TYPE_TAG.captures_iter(text) {
        let Some(medium) = medium_word(&caps[1]) else {
            continue;
        };
        let value = RE_LOCATION_PREFIX_TAIL.replace(&caps[2], "");
        let value = value.trim();
        if !value.is_empty() {
            hits.push((medium, value.to_string()));
        }
    }

    if let Some((medium, value)) = hits.first() {
        if hits.iter().any(|(m, _)| m != medium) {
            return CategoryParse {
                category: UNKNOWN_CATEGORY.to_string(),
                medium: None,
                conflict: true,
            };
        }
        return CategoryParse {
            category: value.clone(),
            medium: Some(*medium),
            conflict: false,
        };
    }

    if let Some(caps) = RE_TRAILING_MEDIUM.captures(text) {
        let value = caps[1].trim();
        if !value.is_empty() {
            return CategoryParse {
                category: value.to_string(),
                medium: medium_word(&caps[2]),
                conflict: false,
            };
        }
    }

    CategoryParse {
        category: UNKNOWN_CATEGORY.to_string(),
        medium: None,
        conflict: false,
    }
}

/// Text after `#note:` up to the next hashtag, capped at [`MAX_NOTE_CHARS`].
pub fn parse_note(text: &str) -> String {
    let Some(caps) = RE_NOTE.captures(text) else {
        return String::new();
    };
    caps[1].trim().chars().take(MAX_NOTE_CHARS).collect()
}

/// Category, medium (type line first, then hashtag) and note of a post.
pub fn parse_details(text: &str, tag: &str) -> ReportDetails {
    let parsed = parse_category(text);
    let medium = if parsed.conflict {
        None
    } else {
        parsed.medium.or_else(|| medium_from_tag(tag))
    };
    ReportDetails {
        category: parsed.category,
        medium,
        note: parse_note(text),
    }
}

/// Local part of an account handle: `@Heatmap@example.social` -> `heatmap`.
pub fn local_part(handle: &str) -> String {
    handle
        .trim()
        .trim_start_matches('@')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// `user@host`, lowercased, with a missing host filled in from `home_host`:
/// `@Heatmap` -> `heatmap@example.social`. None for an empty handle.
pub fn qualified_handle(handle: &str, home_host: &str) -> Option<String> {
    let handle = handle.trim().trim_start_matches('@').to_lowercase();
    let (user, host) = match handle.split_once('@') {
        Some((user, host)) => (user.to_string(), host.to_string()),
        None => (handle, home_host.to_ascii_lowercase()),
    };
    if user.is_empty() || host.is_empty() {
        return None;
    }
    Some(format!("{user}@{host}"))
}

/// Whether `text` contains `@name` as a whole handle.
fn text_mentions(text: &str, name: &str) -> bool {
    let needle = format!("@{name}");
    let lower = text.to_lowercase();
    lower.match_indices(&needle).any(|(i, _)| {
        let before_ok = lower[..i]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '@'));
        let after_ok = lower[i + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        before_ok && after_ok
    })
}

/// A post passes when no mentions are required, or it mentions one of them
/// in its mention list or its text.
pub fn has_required_mention(post: &SocialPost, text: &str, required: &[String]) -> bool {
    if required.is_empty() {
        return true;
    }
    required
        .iter()
        .map(|r| local_part(r))
        .filter(|name| !name.is_empty())
        .any(|name| {
            post.mentions.iter().any(|m| local_part(m) == name) || text_mentions(text, &name)
        })
}

pub fn has_image(post: &SocialPost) -> bool {
    post.images.iter().any(|u| !u.trim().is_empty())
}
