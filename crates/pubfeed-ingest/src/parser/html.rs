//! Body-walking helpers shared by the XML dialect parsers

use crate::model::{AuthorRef, AuthorSource, MediaReference, UserId};
use crate::parser::ParseContext;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

/// Style substring to CSS class
pub type StyleTable = &'static [(&'static str, &'static str)];

/// Classes whose style substring occurs in the lower-cased `style`.
pub fn classes_for(style: &str, table: StyleTable) -> Vec<&'static str> {
    let style = style.to_lowercase();
    let mut classes: Vec<&'static str> = Vec::new();
    for (candidate, class) in table {
        if style.contains(candidate) && !classes.contains(class) {
            classes.push(class);
        }
    }
    classes
}

/// Wrap `inner` in `tag` (default `p`) with optional classes.
pub fn wrap(tag: Option<&str>, classes: &[&str], inner: &str) -> String {
    let tag = tag.unwrap_or("p");
    if classes.is_empty() {
        format!("<{tag}>{inner}</{tag}>")
    } else {
        format!("<{tag} class=\"{}\">{inner}</{tag}>", classes.join(" "))
    }
}

/// Wrap only when a tag or class applies.
pub fn wrap_if(tag: Option<&str>, classes: &[&str], inner: String) -> String {
    if tag.is_none() && classes.is_empty() {
        inner
    } else {
        wrap(tag, classes, &inner)
    }
}

/// Separator after a block: a blank line after paragraphs and block markup,
/// a newline after list items.
pub fn block_separator(name: &str, html: &str) -> &'static str {
    let bytes = html.as_bytes();
    let block_markup = bytes.len() > 1
        && bytes[0] == b'<'
        && matches!(bytes[1], b'p' | b'o' | b'h' | b'u');
    if name == "p" || block_markup {
        "\n\n"
    } else if name == "li" {
        "\n"
    } else {
        ""
    }
}

/// Body placeholder for a media file, followed by a blank line
pub fn placeholder_block(basename: &str) -> String {
    format!("{}\n\n", crate::model::placeholder(basename))
}

#[allow(clippy::expect_used)]
fn score_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s+-\s+(.+?)\s+(\d+:\d+)$").expect("static pattern"))
}

/// `Home - Away 2:1` as club and score spans
pub fn sports_score(line: &str) -> String {
    score_line()
        .replace(
            line,
            r#"<span class="club">$1</span> <span class="score">$3</span> <span class="club">$2</span>"#,
        )
        .into_owned()
}

/// Strip one configured author prefix ("von ", "by "), ignoring case.
pub fn strip_author_prefix(name: &str, prefixes: &[String]) -> String {
    let trimmed = pubfeed_common::text::trim_ascii(name);
    for prefix in prefixes {
        let prefix = prefix.trim_end();
        if prefix.is_empty() || trimmed.len() <= prefix.len() {
            continue;
        }
        let Some(head) = trimmed.get(..prefix.len()) else {
            continue;
        };
        let rest = &trimmed[prefix.len()..];
        if head.eq_ignore_ascii_case(prefix) && rest.starts_with(' ') {
            return rest.trim_start_matches(' ').to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a local timestamp in the shapes the sources use.
pub fn parse_local_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = pubfeed_common::text::trim_ascii(value).replace('T', " ");
    // fractional seconds
    let value = match value.rfind('.') {
        Some(dot) if value[..dot].contains(':') => value[..dot].to_string(),
        _ => value,
    };
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y%m%d %H%M%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&value, format) {
            return Some(parsed);
        }
    }
    ["%Y-%m-%d", "%Y%m%d", "%d.%m.%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// `date.issue/@norm`; the zone offset is dropped and the wall-clock time kept.
pub fn issue_date(norm: &str) -> Option<NaiveDateTime> {
    let norm = pubfeed_common::text::trim_ascii(norm);
    let local = match norm.find('T') {
        Some(t) => {
            let time = &norm[t + 1..];
            let cut = time.find(['+', '-', 'Z']).map_or(norm.len(), |i| t + 1 + i);
            &norm[..cut]
        },
        None => norm,
    };
    parse_local_datetime(local)
}

/// Source system label: unsafe characters of the version become `-`.
pub fn system_label(system: &str, version: &str) -> String {
    let version: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}/{}", system, version)
}

// ============================================================================
// Caption credits
// ============================================================================

/// Splits a trailing credit ("Foto: Jane Doe") off image captions
#[derive(Debug, Clone)]
pub struct CreditSplitter {
    pattern: Option<Regex>,
}

impl CreditSplitter {
    pub fn new(markers: &[String]) -> Self {
        let mut markers: Vec<&String> = markers.iter().filter(|m| !m.trim().is_empty()).collect();
        if markers.is_empty() {
            return Self { pattern: None };
        }
        markers.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = markers
            .iter()
            .map(|m| regex::escape(m.trim()))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            pattern: Regex::new(&format!(r"([\s.!?])\s*(?:{}):\s*", alternation)).ok(),
        }
    }

    /// Caption and credit; the credit runs up to the next marker, if any.
    pub fn split(&self, caption: &str) -> (String, Option<String>) {
        let Some(pattern) = &self.pattern else {
            return (caption.to_string(), None);
        };

        let mut cuts = pattern.captures_iter(caption).filter_map(|caps| {
            let whole = caps.get(0)?;
            let lead = caps.get(1)?;
            // the preceding punctuation stays with the text before the marker
            let keep = if lead.as_str().trim().is_empty() { 0 } else { lead.len() };
            Some((whole.start() + keep, whole.end()))
        });

        let Some((first_start, first_end)) = cuts.next() else {
            return (caption.to_string(), None);
        };
        let credit_end = cuts.next().map_or(caption.len(), |(start, _)| start);

        let text = caption[..first_start].trim_end().to_string();
        let credit = caption[first_end..credit_end].trim().to_string();
        (text, Some(credit).filter(|c| !c.is_empty()))
    }
}

// ============================================================================
// Caption pairing
// ============================================================================

/// A caption collected from a separate caption stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCaption {
    pub text: String,
    pub credit: Option<String>,
    /// Media file that most recently preceded the caption
    pub last_filename: Option<String>,
}

fn apply_caption(media: &mut MediaReference, caption: &PendingCaption) {
    media.caption = Some(caption.text.clone());
    media.credit = caption.credit.clone();
}

/// Pair a separate caption stream with the collected media files.
///
/// Equal counts pair sequentially. Otherwise the first file takes the first
/// caption, every later caption goes to the file it followed when that file
/// is still uncaptioned, and whatever is left is handed out one-to-one to
/// uncaptioned files in order.
pub fn pair_captions(media: &mut IndexMap<String, MediaReference>, captions: Vec<PendingCaption>) {
    if media.is_empty() || captions.is_empty() {
        return;
    }

    if media.len() == captions.len() {
        for (file, caption) in media.values_mut().zip(captions.iter()) {
            apply_caption(file, caption);
        }
        return;
    }

    let mut captions = captions.into_iter();
    if let (Some(first_file), Some(first)) = (media.values_mut().next(), captions.next()) {
        apply_caption(first_file, &first);
    }

    let mut leftovers = Vec::new();
    for caption in captions {
        match caption.last_filename.as_deref().and_then(|f| media.get_mut(f)) {
            Some(file) => {
                if file.caption.is_none() {
                    apply_caption(file, &caption);
                }
            },
            None => leftovers.push(caption),
        }
    }

    let mut leftovers = leftovers.into_iter();
    for file in media.values_mut().filter(|f| f.caption.is_none()) {
        match leftovers.next() {
            Some(caption) => apply_caption(file, &caption),
            None => break,
        }
    }
}

// ============================================================================
// Authors
// ============================================================================

#[allow(clippy::expect_used)]
fn paraph() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z.]{2,5})\n").expect("static pattern"))
}

/// Display name of an author-capable user occurring in `text`
pub fn author_by_name(ctx: &ParseContext<'_>, text: &str) -> Option<AuthorRef> {
    ctx.lookups
        .match_author(text)
        .map(|id| AuthorRef::new(id, AuthorSource::Matched))
}

/// Paraph in the body matched against the initials registry.
///
/// The last registered paraph wins and that occurrence is removed from the body.
pub fn author_by_initials(ctx: &ParseContext<'_>, body: &mut String) -> Option<AuthorRef> {
    let found: Option<(usize, usize, UserId)> = paraph()
        .captures_iter(body)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            let user = ctx.lookups.user_by_initials(m.as_str())?;
            Some((m.start(), m.end(), user))
        })
        .last();

    let (start, end, user) = found?;
    body.replace_range(start..end, "");
    Some(AuthorRef::new(user, AuthorSource::Initials))
}
