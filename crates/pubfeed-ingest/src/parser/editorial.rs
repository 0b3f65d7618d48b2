//! WoodWing 7 editorial suite exports

use super::html::{
    author_by_initials, author_by_name, classes_for, pair_captions, parse_local_datetime,
    placeholder_block, system_label, wrap, CreditSplitter, PendingCaption, StyleTable,
};
use super::{
    Identification, ParseContext, ParseOutcome, ParseResult, ParserError, ParserKind, RawRecord,
    SourceParser,
};
use crate::model::{
    AuthorRef, AuthorSource, CanonicalDocument, DocumentStatus, EntityKind, MediaReference,
};
use crate::xml::{Element, Node};
use pubfeed_common::text::{
    append_single_line, ensure_single_line, repair_double_utf8_runs, trim_ascii,
};
use tracing::debug;

const STYLE_CLASSES: StyleTable = &[
    ("fett", "intro"),
    ("interview", "interview"),
    ("vorspann", "intro"),
    ("nachspann", "outro"),
    ("frage", "question"),
    ("antwort", "answer"),
];

/// Headings that only occur in double-encoded exports
const DOUBLE_ENCODED_MARKERS: [&str; 2] = ["Ã\u{9c}berschrift", "ÃŒberschrift"];

const PUBLISHED_STATES: [&str; 2] = ["Artikel online sofort", "Artikel online morgen"];

/// Flag fields every export may carry: field, taxonomy, term slug
const FIXED_FLAGS: [(&str, &str, &str); 2] = [
    ("C_TOPARTIKEL", "category", "top-story"),
    ("C_NONNBAYERN", "post_tag", "nordbayern-export"),
];

const FLAG_SET: &str = "JA";

#[derive(Debug, Clone, Copy, Default)]
pub struct EditorialParser;

fn article_id(root: &Element) -> Option<&str> {
    root.find_with_attr("metadata", "name", "ArticleId")
        .and_then(|m| m.attr("value"))
        .map(trim_ascii)
        .filter(|id| !id.is_empty())
}

/// Text of `<CustomMetaData name="...">`
fn custom_field(root: &Element, name: &str) -> Option<String> {
    root.find_with_attr("CustomMetaData", "name", name)
        .map(Element::text)
        .filter(|value| !value.is_empty())
}

fn field(root: &Element, name: &str) -> Option<String> {
    root.find(name).map(Element::text).filter(|value| !value.is_empty())
}

impl SourceParser for EditorialParser {
    fn kind(&self) -> ParserKind {
        ParserKind::EditorialSuite
    }

    /// Some exports are partially double encoded; repair them once on read.
    fn prepare_raw(&self, raw: Vec<u8>) -> Vec<u8> {
        match std::str::from_utf8(&raw) {
            Ok(text) if DOUBLE_ENCODED_MARKERS.iter().any(|m| text.contains(m)) => {
                debug!("Repairing double-encoded export");
                repair_double_utf8_runs(text).into_bytes()
            },
            _ => raw,
        }
    }

    fn identify(&self, record: &RawRecord, _ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        let root = Element::parse_bytes(&record.bytes)?;
        Ok(match article_id(&root) {
            Some(id) => Identification::Record(id.to_string()),
            None => Identification::Skip("no ArticleId metadata".to_string()),
        })
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        let root = Element::parse_bytes(&record.bytes)?;
        let Some(id) = article_id(&root) else {
            return Ok(ParseOutcome::Skip("no ArticleId metadata".to_string()));
        };
        let article = root
            .path("articlelist/article")
            .ok_or_else(|| ParserError::missing("articlelist/article"))?;

        let mut doc = ctx.document(id, EntityKind::Post, &record.bytes);
        doc.set_meta(
            "_publishing_system",
            system_label(
                article.attr_or_empty("sourcesystem"),
                article.attr_or_empty("exportmoduleversion"),
            ),
        );
        parse_meta(ctx, &root, &mut doc);

        let body = article.child("body").ok_or_else(|| ParserError::missing("article body"))?;
        let mut walker = BodyWalker {
            ctx,
            doc: &mut doc,
            captions: Vec::new(),
            last_filename: None,
        };
        let html = walker.walk(body);
        let captions = std::mem::take(&mut walker.captions);
        doc.body = html;

        let credits = CreditSplitter::new(&ctx.publisher.credit_markers);
        let captions = captions
            .into_iter()
            .map(|mut caption| {
                let (text, credit) = credits.split(&caption.text);
                caption.text = text;
                caption.credit = credit;
                caption
            })
            .collect();
        pair_captions(&mut doc.media, captions);

        if ctx.needs_fallback_author(&doc) {
            let mut body = std::mem::take(&mut doc.body);
            doc.author = author_by_name(ctx, &body)
                .or_else(|| author_by_initials(ctx, &mut body))
                .or_else(|| ctx.default_author());
            doc.body = body;
        }

        Ok(ParseOutcome::Document(Box::new(doc)))
    }
}

fn parse_meta(ctx: &ParseContext<'_>, root: &Element, doc: &mut CanonicalDocument) {
    match field(root, "BasicMetaData_Type").as_deref() {
        Some("Article") | None => {},
        Some(other) => debug!(article_type = other, "Unknown article type, importing as post"),
    }

    let named = field(root, "Custom_Author").or_else(|| custom_field(root, "C_AUTOR"));
    if let Some(name) = named {
        if let Some(user) = ctx.lookups.user_by_name(&name) {
            doc.author = Some(AuthorRef::new(user, AuthorSource::Explicit));
        }
        doc.set_meta("author", name);
    }

    let status = root
        .find_with_attr("metadata", "name", "Status")
        .map(|m| m.attr_or_empty("value"))
        .unwrap_or_default();
    doc.status = if PUBLISHED_STATES.contains(&status) {
        DocumentStatus::Publish
    } else {
        DocumentStatus::Draft
    };

    if let Some(date) = field(root, "Custom_Publication_Date") {
        doc.published_at =
            parse_local_datetime(&format!("{} {}", trim_ascii(&date), ctx.type_config.publish_time));
    }

    for flag in &ctx.type_config.flags {
        if custom_field(root, &flag.field).as_deref() == Some(FLAG_SET) {
            if let Some(term) = ctx.lookups.term_by_slug(&flag.taxonomy, &flag.term) {
                doc.taxonomies.add(&flag.taxonomy, term);
            }
        }
    }

    if let Some(section) = field(root, "BasicMetaData_Section_Name") {
        if !ctx.type_config.excluded_sections.contains(&section) {
            if let Some(term) = ctx.lookups.term("category", &section) {
                doc.taxonomies.add("category", term);
            }
        }
    }
    for place in root.find_all_with_attr("CustomMetaData", "name", "C_ORTSNAME") {
        if let Some(term) = ctx.lookups.term("category", &place.text()) {
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

    if let Some(topic) = custom_field(root, "C_SERIENTHEMA") {
        if let Some(term) = ctx.lookups.term("topic", &topic) {
            doc.taxonomies.add("topic", term);
        }
    }

    for (name, taxonomy, slug) in FIXED_FLAGS {
        if custom_field(root, name).as_deref() == Some(FLAG_SET) {
            if let Some(term) = ctx.lookups.term_by_slug(taxonomy, slug) {
                doc.taxonomies.add(taxonomy, term);
            }
        }
    }

    if let Some(roof_line) = custom_field(root, "C_DACHZEILE") {
        doc.set_meta("subtitle", ensure_single_line(&roof_line));
    }
}

struct BodyWalker<'a, 'c> {
    ctx: &'a ParseContext<'c>,
    doc: &'a mut CanonicalDocument,
    captions: Vec<PendingCaption>,
    last_filename: Option<String>,
}

impl BodyWalker<'_, '_> {
    fn walk(&mut self, parent: &Element) -> String {
        let mut html = String::new();
        for node in &parent.children {
            let element = match node {
                // mixed content around inline styles; layout whitespace is dropped
                Node::Text(text) => {
                    if !text.trim().is_empty() {
                        html.push_str(text);
                    }
                    continue;
                },
                Node::Element(element) => element,
            };
            let name = element.name.as_str();

            if name == "box" && element.attr("type") == Some("picture") {
                self.picture(element, &mut html);
                continue;
            }
            if name == "geometrylist" {
                continue;
            }

            let mut inner = if element.has_element_children() {
                self.walk(element)
            } else {
                element.text()
            };
            if inner.is_empty() {
                continue;
            }

            if let Some(style) = element.attr("style") {
                let style = style.to_lowercase();
                if style.contains("kursiv") {
                    inner = format!("<em>{}</em>", inner);
                }
                if name == "paragraph" {
                    match self.paragraph(&style, inner) {
                        Some(block) => inner = block,
                        None => continue,
                    }
                }
            }

            html.push_str(&inner);
            if name == "paragraph" {
                html.push_str("\n\n");
            }
        }
        html
    }

    /// Paragraph block markup, or `None` when the paragraph feeds a field.
    fn paragraph(&mut self, style: &str, inner: String) -> Option<String> {
        // "Bildtext_x08" is body text, "Bildtext 8 Punkt_x12" a caption
        if style.contains("bildunterzeile") || style.contains("bildtext ") {
            self.captions.push(PendingCaption {
                text: inner,
                credit: None,
                last_filename: self.last_filename.clone(),
            });
            return None;
        }
        if style.contains("autorenzeile") {
            self.doc.set_meta("publishing_author", ensure_single_line(&inner));
            return None;
        }
        if style.contains("überschrift") || style.contains("kurzmeldung") {
            append_single_line(&mut self.doc.title, &inner);
            return None;
        }
        if style.contains("unterzeile") {
            // the roof line metadata takes precedence
            if self.doc.meta_str("subtitle").map_or(true, str::is_empty) {
                self.doc.set_meta("subtitle", ensure_single_line(&inner));
            }
            return None;
        }

        let tag = style.contains("zwischenzeile").then_some("h3");
        let classes = classes_for(style, STYLE_CLASSES);
        Some(if tag.is_some() || !classes.is_empty() {
            wrap(tag, &classes, &inner)
        } else {
            inner
        })
    }

    fn picture(&mut self, element: &Element, html: &mut String) {
        let filename = element
            .path("content/picture")
            .map(|p| trim_ascii(&p.text()).to_string())
            .unwrap_or_default();
        if filename.is_empty() || self.doc.media.contains_key(&filename) {
            return;
        }
        let media = MediaReference::new(filename.as_str(), self.ctx.target_name(&filename));
        html.push_str(&placeholder_block(&filename));
        self.doc.media.insert(filename.clone(), media);
        self.last_filename = Some(filename);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{FlagMapping, PublisherConfig};
    use crate::lookup::tests::{term, user};
    use crate::lookup::LookupCache;
    use crate::parser::tests::publisher;
    use crate::store::Role;
    use chrono::NaiveDate;

    const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<export>
  <metadata name="ArticleId" value="4711"/>
  <metadata name="Status" value="Artikel online morgen"/>
  <BasicMetaData_Type>Article</BasicMetaData_Type>
  <BasicMetaData_Section_Name>Sport</BasicMetaData_Section_Name>
  <Custom_Publication_Date>2019-03-02</Custom_Publication_Date>
  <CustomMetaData name="C_PZ">JA</CustomMetaData>
  <CustomMetaData name="C_BOTE">NEIN</CustomMetaData>
  <CustomMetaData name="C_ORTSNAME">Pegnitz</CustomMetaData>
  <CustomMetaData name="C_SERIENTHEMA">Kirchweih</CustomMetaData>
  <CustomMetaData name="C_TOPARTIKEL">JA</CustomMetaData>
  <CustomMetaData name="C_DACHZEILE">Kreisliga
 Nord</CustomMetaData>
  <articlelist>
    <article sourcesystem="WoodWing" exportmoduleversion="7.0 build 12">
      <body>
        <paragraph style="Überschrift_x12">Breaking </paragraph>
        <paragraph style="Überschrift_x12">News Today</paragraph>
        <paragraph style="Unterzeile">Wird ignoriert</paragraph>
        <box type="picture"><content><picture>a.jpg</picture></content><geometrylist/></box>
        <paragraph style="Bildunterzeile_x12">Der Anpfiff. Foto: Jane Doe</paragraph>
        <paragraph style="Vorspann fett">Ein Spiel.</paragraph>
        <box type="picture"><content><picture>b.jpg</picture></content></box>
        <box type="picture"><content><picture>c.jpg</picture></content></box>
        <paragraph style="Grundtext">Text mit <inline style="Kursiv">Betonung</inline> und Ende sb
</paragraph>
        <paragraph style="Bildtext 8 Punkt_x12">Zweites Bild</paragraph>
        <paragraph style="Zwischenzeile">Halbzeit</paragraph>
        <paragraph style="Interview-Frage">Wie lief es?</paragraph>
        <paragraph style="Autorenzeile">Max
 Muster</paragraph>
      </body>
    </article>
  </articlelist>
</export>"#;

    fn setup() -> (PublisherConfig, LookupCache) {
        let mut publisher = publisher("pz", "woodwing", "articles", ParserKind::EditorialSuite);
        publisher.default_author = Some("pegnitzzeitung".to_string());
        publisher.types["articles"].flags.push(FlagMapping {
            field: "C_PZ".to_string(),
            taxonomy: "publisher".to_string(),
            term: "pegnitz-zeitung".to_string(),
        });
        publisher.types["articles"].flags.push(FlagMapping {
            field: "C_BOTE".to_string(),
            taxonomy: "publisher".to_string(),
            term: "der-bote".to_string(),
        });

        let mut initials = user(7, "sbauer", "Sabine Bauer", &[Role::Author]);
        initials.initials = vec!["sb".to_string()];
        let lookups = LookupCache::from_parts(
            &[
                user(1, "pegnitzzeitung", "Pegnitz-Zeitung", &[Role::Editor]),
                user(2, "jschmidt", "Jana Schmidt", &[Role::Author]),
                initials,
            ],
            &[
                term(1, "category", "Sport", "sport", &[]),
                term(2, "category", "Pegnitz", "pegnitz", &[]),
                term(3, "category", "News", "news", &[]),
                term(4, "category", "Top-Story", "top-story", &[]),
                term(5, "topic", "Kirchweih", "kirchweih", &[]),
                term(6, "publisher", "Pegnitz-Zeitung", "pegnitz-zeitung", &[]),
                term(7, "publisher", "Der Bote", "der-bote", &[]),
                term(8, "post_tag", "nordbayern-export", "nordbayern-export", &[]),
            ],
        );
        (publisher, lookups)
    }

    fn document(xml: &str) -> CanonicalDocument {
        let (publisher, lookups) = setup();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        let raw = EditorialParser.prepare_raw(xml.as_bytes().to_vec());
        match EditorialParser.parse(&RawRecord::new(raw, "x"), &ctx).unwrap() {
            ParseOutcome::Document(doc) => *doc,
            ParseOutcome::Skip(reason) => panic!("skipped: {}", reason),
        }
    }

    #[test]
    fn test_parse_article_meta() {
        let doc = document(ARTICLE);

        assert_eq!(doc.guid.as_str(), "pz/woodwing/4711");
        assert_eq!(doc.meta_str("_publishing_system"), Some("WoodWing/7.0-build-12"));
        assert_eq!(doc.status, DocumentStatus::Publish);
        assert_eq!(
            doc.published_at,
            NaiveDate::from_ymd_opt(2019, 3, 2).unwrap().and_hms_opt(4, 0, 0)
        );
        assert_eq!(doc.title, "Breaking News Today");
        assert_eq!(doc.meta_str("subtitle"), Some("Kreisliga Nord"));
        assert_eq!(doc.meta_str("publishing_author"), Some("Max Muster"));
        assert_eq!(doc.taxonomies.names("category"), vec!["Sport", "Pegnitz", "Top-Story"]);
        assert_eq!(doc.taxonomies.names("topic"), vec!["Kirchweih"]);
        assert_eq!(doc.taxonomies.names("publisher"), vec!["Pegnitz-Zeitung"]);
        assert!(doc.taxonomies.is_empty_for("post_tag"));
    }

    #[test]
    fn test_parse_article_body_and_captions() {
        let doc = document(ARTICLE);

        assert_eq!(
            doc.body,
            "<!-- a.jpg -->\n\n\
             <p class=\"intro\">Ein Spiel.</p>\n\n\
             <!-- b.jpg -->\n\n\
             <!-- c.jpg -->\n\n\
             Text mit <em>Betonung</em> und Ende \n\n\n\
             <h3>Halbzeit</h3>\n\n\
             <p class=\"interview question\">Wie lief es?</p>\n\n"
        );

        // first caption to the thumbnail, the second to the image it followed
        assert_eq!(doc.media["a.jpg"].caption.as_deref(), Some("Der Anpfiff."));
        assert_eq!(doc.media["a.jpg"].credit.as_deref(), Some("Jane Doe"));
        assert_eq!(doc.media["c.jpg"].caption.as_deref(), Some("Zweites Bild"));
        assert_eq!(doc.media["b.jpg"].caption, None);
        assert_eq!(doc.media["b.jpg"].target_name, "pz-b.jpg");

        // paraph resolved and removed
        assert_eq!(doc.author, Some(AuthorRef::new(7, AuthorSource::Initials)));
    }

    #[test]
    fn test_author_fallback_chain() {
        let by_name = ARTICLE.replace("und Ende sb", "von Jana Schmidt");
        assert_eq!(document(&by_name).author, Some(AuthorRef::new(2, AuthorSource::Matched)));

        let default = ARTICLE.replace("und Ende sb", "ohne Kürzel");
        assert_eq!(document(&default).author, Some(AuthorRef::new(1, AuthorSource::Default)));

        let explicit = ARTICLE.replace(
            "<BasicMetaData_Type>",
            "<Custom_Author>Jana Schmidt</Custom_Author><BasicMetaData_Type>",
        );
        let doc = document(&explicit);
        assert_eq!(doc.author, Some(AuthorRef::new(2, AuthorSource::Explicit)));
        assert_eq!(doc.meta_str("author"), Some("Jana Schmidt"));
        assert!(doc.body.contains("und Ende sb"));
    }

    #[test]
    fn test_excluded_section_falls_back_to_default_category() {
        let xml = ARTICLE
            .replace(">Sport<", ">Lokales<")
            .replace(">Pegnitz<", ">Unbekannt<")
            .replace("name=\"C_TOPARTIKEL\">JA", "name=\"C_TOPARTIKEL\">NEIN");
        assert_eq!(document(&xml).taxonomies.names("category"), vec!["News"]);
    }

    #[test]
    fn test_draft_status_and_missing_id() {
        let draft = ARTICLE.replace("Artikel online morgen", "In Bearbeitung");
        assert_eq!(document(&draft).status, DocumentStatus::Draft);

        let (publisher, lookups) = setup();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        let record = RawRecord::new(ARTICLE.replace("ArticleId", "Other").into_bytes(), "x");
        assert!(matches!(EditorialParser.identify(&record, &ctx).unwrap(), Identification::Skip(_)));
    }

    #[test]
    fn test_prepare_raw_repairs_double_encoding() {
        let broken = ARTICLE.replace("Überschrift_x12", "Ã\u{9c}berschrift_x12");
        let repaired = EditorialParser.prepare_raw(broken.into_bytes());
        assert_eq!(String::from_utf8(repaired).unwrap(), ARTICLE);

        let clean = ARTICLE.as_bytes().to_vec();
        assert_eq!(EditorialParser.prepare_raw(clean.clone()), clean);
    }
}
