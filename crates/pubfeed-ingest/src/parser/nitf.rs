//! dpa wire service articles (NITF 3)

use super::html::{
    block_separator, classes_for, issue_date, placeholder_block, CreditSplitter, StyleTable,
};
use super::{
    Identification, ParseContext, ParseOutcome, ParseResult, ParserKind, RawRecord, SourceParser,
};
use crate::model::{
    AuthorRef, AuthorSource, CanonicalDocument, DocumentStatus, EntityKind, MediaReference, TermRef,
};
use crate::xml::{Element, Node};
use pubfeed_common::text::{collapse_whitespace, is_blank, trim_ascii};

const STYLE_CLASSES: StyleTable = &[
    ("vorspann", "intro"),
    ("interview-frage", "interview"),
    ("info", "infobox"),
];

/// Wire account that signs every article
const WIRE_LOGIN: &str = "dpa";

/// Top-theme files duplicate regular articles, except for the background pieces.
const TOP_THEMES: (&str, &str) = ("topthemen", "hintergruende");

const INTERNAL_LINK_SCHEME: &str = "dpa-infocom:";

#[derive(Debug, Clone, Copy, Default)]
pub struct NitfParser;

/// Reason to skip a file whose name marks a noise feed
fn skip_reason(stem: &str, patterns: &[String]) -> Option<String> {
    patterns
        .iter()
        .filter(|p| !p.is_empty() && stem.contains(p.as_str()))
        .find(|p| !(p.as_str() == TOP_THEMES.0 && stem.contains(TOP_THEMES.1)))
        .map(|p| format!("'{}' feed", p))
}

impl SourceParser for NitfParser {
    fn kind(&self) -> ParserKind {
        ParserKind::WireNitf
    }

    fn identify(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        if record.stem.is_empty() {
            return Ok(Identification::Skip("no file name".to_string()));
        }
        Ok(match skip_reason(&record.stem, &ctx.type_config.skip_patterns) {
            Some(reason) => Identification::Skip(reason),
            None => Identification::Record(record.stem.clone()),
        })
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        let id = match self.identify(record, ctx)? {
            Identification::Record(id) => id,
            Identification::Skip(reason) => return Ok(ParseOutcome::Skip(reason)),
        };
        let root = Element::parse_bytes(&record.bytes)?;

        let mut doc = ctx.document(&id, EntityKind::Post, &record.bytes);
        doc.set_meta("_publishing_system", "NITF/3");
        doc.status = DocumentStatus::Publish;
        parse_meta(ctx, &root, &mut doc);

        if let Some(body) = root.child("body") {
            let mut walker = BodyWalker {
                ctx,
                credits: CreditSplitter::new(&ctx.publisher.credit_markers),
                doc: &mut doc,
            };
            let excerpt = body.find("abstract").map(|a| walker.walk(a));
            let content = body.find("body.content").map(|c| walker.walk(c));
            doc.excerpt = excerpt.map(|e| trim_ascii(&e).to_string()).unwrap_or_default();
            doc.body = content.unwrap_or_default();
        }

        // articles without pictures are reviewed before they go out
        if doc.media.is_empty() {
            doc.status = DocumentStatus::Pending;
        }

        if ctx.needs_fallback_author(&doc) {
            doc.author = ctx.default_author();
        }

        Ok(ParseOutcome::Document(Box::new(doc)))
    }
}

fn parse_meta(ctx: &ParseContext<'_>, root: &Element, doc: &mut CanonicalDocument) {
    if let Some(norm) = root.find("date.issue").and_then(|d| d.attr("norm")) {
        doc.published_at = issue_date(norm);
    }

    if let Some(user) = ctx.lookups.user_by_login(WIRE_LOGIN) {
        doc.author = Some(AuthorRef::new(user, AuthorSource::Explicit));
    }

    if let Some(hedline) = root.find("hedline") {
        doc.title = hedline.child("hl1").map(Element::text).unwrap_or_default();
        if let Some(subtitle) = hedline.child("hl2") {
            doc.set_meta("subtitle", subtitle.text());
        }
    }

    if let Some(scope) = root.find("doc-scope").and_then(|s| s.attr("scope")) {
        let name = ctx
            .type_config
            .scope_categories
            .get(scope)
            .map_or(scope, String::as_str);
        if let Some(term) = ctx.lookups.term("category", name) {
            doc.taxonomies.add("category", term);
        }
    }
    if doc.taxonomies.is_empty_for("category") {
        if let Some(term) = ctx
            .lookups
            .term_by_name_or_slug("category", &ctx.publisher.default_category)
        {
            doc.taxonomies.add("category", term);
        }
    }

    if let Some(keys) = root.find("keyword").and_then(|k| k.attr("key")) {
        for tag in keys.split('/').filter(|t| !t.is_empty()) {
            let term = ctx
                .lookups
                .term("post_tag", tag)
                .unwrap_or_else(|| TermRef::named(tag));
            doc.taxonomies.add("post_tag", term);
        }
    }

    if let Some(urgency) = root.find("urgency").and_then(|u| u.attr("ed-urg")) {
        doc.set_meta("urgency", urgency);
    }
}

struct BodyWalker<'a, 'c> {
    ctx: &'a ParseContext<'c>,
    credits: CreditSplitter,
    doc: &'a mut CanonicalDocument,
}

impl BodyWalker<'_, '_> {
    fn walk(&mut self, parent: &Element) -> String {
        let mut html = String::new();
        for node in &parent.children {
            let element = match node {
                Node::Text(text) => {
                    let inner = collapse_whitespace(text);
                    if !is_blank(&inner) {
                        let separator = block_separator("", &inner);
                        html.push_str(&inner);
                        html.push_str(separator);
                    }
                    continue;
                },
                Node::Element(element) => element,
            };
            let name = element.name.as_str();

            if name == "media" {
                self.media(element, &mut html);
                continue;
            }

            let mut inner = if element.children.is_empty() {
                String::new()
            } else {
                let inner = trim_ascii(&self.walk(element)).to_string();
                if name == "ul" || name == "ol" {
                    format!("\n{}\n", inner)
                } else {
                    inner
                }
            };
            if is_blank(&inner) {
                continue;
            }

            let mut tag: Option<&str> = None;
            let mut style = String::new();
            let mut classes: Vec<&str> = Vec::new();
            let mut attributes: Vec<(&str, &str)> = Vec::new();
            match name {
                "block" => {
                    tag = Some("div");
                    style = element.attr_or_empty("style").to_lowercase();
                    match style.as_str() {
                        "internal-links" => continue,
                        "external-links" => {
                            tag = Some("nav");
                            classes.push("related related--external");
                            inner = format!("<ul>{}</ul>", inner)
                                .replace("<a href", "<li><a class=\"external\" target=\"_blank\" href")
                                .replace("</a>", "</a></li>");
                        },
                        _ => {},
                    }
                },
                "hl1" => tag = Some("h3"),
                "ol" | "ul" | "li" | "strong" | "em" | "b" | "i" | "a" => tag = Some(name),
                _ => {},
            }
            if name == "a" {
                attributes = ["href", "target", "id"]
                    .into_iter()
                    .filter_map(|attr| element.attr(attr).map(|value| (attr, value)))
                    .collect();
                let internal = element
                    .attr("href")
                    .is_some_and(|href| href.starts_with(INTERNAL_LINK_SCHEME));
                if internal {
                    tag = None;
                    attributes.clear();
                }
            }
            if !style.is_empty() {
                classes.extend(classes_for(&style, STYLE_CLASSES));
            }

            if tag.is_some() || !classes.is_empty() || !attributes.is_empty() {
                inner = open_tag(tag.unwrap_or("p"), &attributes, &classes, &inner);
            }
            let separator = block_separator(name, &inner);
            html.push_str(&inner);
            html.push_str(separator);
        }
        html
    }

    fn media(&mut self, element: &Element, html: &mut String) {
        let mut widest: Option<(&Element, u32)> = None;
        for derivative in element.find_all("media-reference") {
            if !derivative.has_attr("source") {
                continue;
            }
            let width = derivative.attr_or_empty("width").trim().parse::<u32>().unwrap_or(0);
            if widest.map_or(true, |(_, w)| width > w) {
                widest = Some((derivative, width));
            }
        }
        let Some((image, _)) = widest else {
            return;
        };
        let source = image.attr_or_empty("source");
        if source.is_empty() || self.doc.media.contains_key(source) {
            return;
        }
        let basename = source.rsplit('/').next().unwrap_or(source);

        let mut media = MediaReference::new(source, self.ctx.target_name(basename));
        if let Some(caption) = element.find("media-caption") {
            let caption = trim_ascii(&caption.text()).to_string();
            if !caption.is_empty() {
                let (text, credit) = self.credits.split(&caption);
                media.caption = Some(text);
                media.credit = credit;
            }
        }
        let alt = trim_ascii(image.attr_or_empty("alternate-text"));
        if !alt.is_empty() {
            media.alt = Some(alt.to_string());
        }
        for meta in element.find_all("media-metadata") {
            let value = meta.attr_or_empty("value");
            if !value.is_empty() {
                media
                    .extra
                    .insert(meta.attr_or_empty("name").to_string(), value.to_string());
            }
        }

        html.push_str(&placeholder_block(basename));
        self.doc.media.insert(source.to_string(), media);
    }
}

/// Values are emitted as read; the tree already decoded them once.
fn open_tag(tag: &str, attributes: &[(&str, &str)], classes: &[&str], inner: &str) -> String {
    let mut open = format!("<{}", tag);
    for (name, value) in attributes {
        open.push_str(&format!(" {}=\"{}\"", name, value));
    }
    if !classes.is_empty() {
        open.push_str(&format!(" class=\"{}\"", classes.join(" ")));
    }
    format!("{}>{}</{}>", open, inner, tag)
}
