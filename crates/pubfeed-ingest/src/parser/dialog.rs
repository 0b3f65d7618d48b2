//! Legacy Dialog 4 exports (web stories and picture galleries)

use super::html::{
    author_by_name, block_separator, classes_for, parse_local_datetime, placeholder_block,
    sports_score, strip_author_prefix, system_label, wrap_if, CreditSplitter, StyleTable,
};
use super::{
    Identification, ParseContext, ParseOutcome, ParseResult, ParserError, ParserKind, RawRecord,
    SourceParser,
};
use crate::model::{
    AuthorRef, AuthorSource, CanonicalDocument, DocumentStatus, EntityKind, MediaReference, TermRef,
};
use crate::xml::{Element, Node};
use pubfeed_common::text::{
    append_single_line, collapse_whitespace, ensure_single_line, fold_accents, is_blank,
    sanitize_identifier, trim_ascii, truncate_bytes,
};

/// Dialog keeps file names to 56 bytes; ids are cut the same way.
const MAX_ID_BYTES: usize = 56;

const STYLE_CLASSES: StyleTable = &[
    ("vorspann", "intro"),
    ("interview-frage", "interview"),
    ("sportergebnis", "sportsresult"),
    ("pic-info", "infobox"),
];

const HEADS: [&str; 2] = ["WebStoryHead", "PictureGalleryHead"];

#[derive(Debug, Clone, Copy, Default)]
pub struct DialogParser;

/// The story or gallery head holding identity and attributes
fn head(root: &Element) -> Option<&Element> {
    root.descendants()
        .into_iter()
        .find(|e| HEADS.contains(&e.name.as_str()) && e.child("Ident").is_some())
}

fn external_id(head: &Element) -> Option<String> {
    let ident = head.child("Ident")?;
    let log_type = ident.attr_or_empty("eLogType");
    let id = format!(
        "{}_{:0>4}_{}_{}",
        ident.attr_or_empty("kLocationId"),
        log_type,
        ident.attr_or_empty("kId"),
        sanitize_identifier(&fold_accents(ident.attr_or_empty("strName"))),
    );
    Some(truncate_bytes(&id, MAX_ID_BYTES).to_string())
}

impl SourceParser for DialogParser {
    fn kind(&self) -> ParserKind {
        ParserKind::LegacyDialog
    }

    fn identify(&self, record: &RawRecord, _ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        let root = Element::parse_bytes(&record.bytes)?;
        Ok(match head(&root).and_then(external_id) {
            Some(id) => Identification::Record(id),
            None => Identification::Skip("no Ident in story or gallery head".to_string()),
        })
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        let root = Element::parse_bytes(&record.bytes)?;
        let Some(head) = head(&root) else {
            return Ok(ParseOutcome::Skip("no Ident in story or gallery head".to_string()));
        };
        let Some(id) = external_id(head) else {
            return Ok(ParseOutcome::Skip("no Ident in story or gallery head".to_string()));
        };

        let is_story = root.find("WebStory").is_some() || root.name == "WebStory";
        let kind = if is_story { EntityKind::Post } else { EntityKind::Gallery };
        let mut doc = ctx.document(&id, kind, &record.bytes);
        doc.set_meta(
            "_publishing_system",
            system_label("Dialog", root.attr_or_empty("strDialogVersion")),
        );

        parse_meta(ctx, &root, head, &mut doc);

        let content = if is_story {
            root.find("WebStoryContent")
                .ok_or_else(|| ParserError::missing("WebStoryContent"))?
        } else {
            if let Some(heading) = root.find("PictureGalleryHead").and_then(|h| h.attr("strHeading")) {
                doc.title = ensure_single_line(heading);
            }
            root.find("PictureGallery")
                .ok_or_else(|| ParserError::missing("PictureGallery"))?
        };

        let mut walker = BodyWalker {
            ctx,
            credits: CreditSplitter::new(&ctx.publisher.credit_markers),
            doc: &mut doc,
        };
        let body = walker.walk(content);
        doc.body = body;

        if ctx.needs_fallback_author(&doc) {
            doc.author = doc
                .meta_str("author")
                .and_then(|byline| author_by_name(ctx, byline))
                .or_else(|| ctx.default_author());
        }

        Ok(ParseOutcome::Document(Box::new(doc)))
    }
}

fn parse_meta(ctx: &ParseContext<'_>, root: &Element, head: &Element, doc: &mut CanonicalDocument) {
    if let Some(uuid) = head.child("OrigId").and_then(|o| o.attr("strDocId")) {
        doc.set_meta("_importer_uuid", uuid);
    }

    // explicit author: the author box of the story, else the gallery creator
    let named = root
        .find_with_attr("TBox", "strContentType", "Author")
        .and_then(|tbox| tbox.child("p"))
        .map(Element::text)
        .or_else(|| {
            root.find("PictureGalleryHead")
                .and_then(|h| h.attr("strCreatorLoginName"))
                .map(str::to_string)
        });
    if let Some(name) = named {
        let name = strip_author_prefix(&name, &ctx.publisher.author_prefixes);
        if let Some(user) = ctx.lookups.user_by_name(&name) {
            doc.author = Some(AuthorRef::new(user, AuthorSource::Explicit));
        }
    }

    // publication is scheduled by the store when the date lies ahead
    doc.status = DocumentStatus::Publish;

    let doc_attr = head.child("DocAttr");
    let web_attr = doc_attr.and_then(|d| d.child("WebAttr"));
    if let Some(begin) = web_attr.and_then(|w| w.attr("dtmWebBegin")) {
        doc.published_at = parse_local_datetime(begin);
    }

    if let Some(catchwords) = doc_attr.and_then(|d| d.attr("strCatchwords")) {
        for name in catchwords.split(';').map(trim_ascii).filter(|n| !n.is_empty()) {
            if let Some(term) = ctx.lookups.term("category", name) {
                doc.taxonomies.add("category", term);
            }
        }
    }

    if head.name == "WebStoryHead" {
        if let Some(location) = doc_attr.and_then(|d| d.attr("strLocation")) {
            doc.taxonomies.remove("category", location);
            if !location.is_empty() {
                doc.taxonomies.add("location", TermRef::named(location));
            }
        }
        if let Some(enabled) = web_attr.and_then(|w| w.attr("bEnableComments")) {
            doc.comments_open = Some(enabled == "true");
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
                        html.push_str(&block_separator_after("", inner));
                    }
                    continue;
                },
                Node::Element(element) => element,
            };
            let name = element.name.as_str();

            if name == "PicBox" || name == "PicGalleryItem" {
                self.image(element, &mut html);
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
            match name {
                "TBox" => {
                    let content_type = element.attr_or_empty("strContentType").to_lowercase();
                    style = element.attr_or_empty("strBoxName").to_lowercase();
                    match content_type.as_str() {
                        "location" => continue,
                        "author" => {
                            let byline = strip_author_prefix(&inner, &self.ctx.publisher.author_prefixes);
                            self.doc.set_meta("author", ensure_single_line(&byline));
                            continue;
                        },
                        "heading" => {
                            append_single_line(&mut self.doc.title, &inner);
                            continue;
                        },
                        "teaser" => {
                            self.doc.excerpt = inner.trim_start_matches(|c: char| c.is_ascii_whitespace()).to_string();
                            continue;
                        },
                        "headline" => {
                            let mut subtitle = self.doc.meta_str("subtitle").unwrap_or_default().to_string();
                            append_single_line(&mut subtitle, &inner);
                            self.doc.set_meta("subtitle", subtitle);
                            continue;
                        },
                        _ => {},
                    }
                },
                "IMTitle" => {
                    style = element.attr_or_empty("strName").to_lowercase();
                    match style.as_str() {
                        "zwischentitel" => tag = Some("h3"),
                        "zitat" => tag = Some("blockquote"),
                        "sportergebnis" => inner = sports_score(&inner),
                        _ => {},
                    }
                },
                "ol" | "ul" | "li" | "b" => tag = Some(name),
                _ => {},
            }

            let classes = if style.is_empty() {
                Vec::new()
            } else {
                classes_for(&style, STYLE_CLASSES)
            };
            let inner = wrap_if(tag, &classes, inner);
            html.push_str(&block_separator_after(name, inner));
        }
        html
    }

    fn image(&mut self, element: &Element, html: &mut String) {
        let Some(path) = element.find("Image").and_then(|i| i.attr("strPathName")) else {
            return;
        };
        let normalized = path.replace('\\', "/");
        let filename = normalized.rsplit('/').next().unwrap_or_default();
        if filename.is_empty() || self.doc.media.contains_key(filename) {
            return;
        }

        let mut media = MediaReference::new(filename, self.ctx.target_name(filename));
        let caption_box = element.find("TBox").or_else(|| element.find("Description"));
        if let Some(caption) = caption_box.map(|b| trim_ascii(&b.text()).to_string()) {
            if !caption.is_empty() {
                let (text, credit) = self.credits.split(&caption);
                media.caption = Some(text);
                media.credit = credit;
            }
        }
        self.doc.media.insert(filename.to_string(), media);
        html.push_str(&placeholder_block(filename));
    }
}

/// Block output followed by its separator
fn block_separator_after(name: &str, mut inner: String) -> String {
    let separator = block_separator(name, &inner);
    inner.push_str(separator);
    inner
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lookup::tests::{term, user};
    use crate::lookup::LookupCache;
    use crate::parser::tests::publisher;
    use crate::store::Role;

    const STORY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DialogExport strDialogVersion="4.1 (r2)">
  <WebStory>
    <WebStoryHead>
      <Ident kLocationId="12" eLogType="7" kId="3301" strName="Müller Straße: Umbau"/>
      <OrigId strDocId="abc-123"/>
      <DocAttr strCatchwords="Lokales; Pegnitz ;Unbekannt" strLocation="Pegnitz">
        <WebAttr dtmWebBegin="2019-03-01T06:30:00" bEnableComments="false"/>
      </DocAttr>
    </WebStoryHead>
    <WebStoryContent>
      <TBox strContentType="Heading"><p>Breaking </p></TBox>
      <TBox strContentType="Heading"><p>News Today</p></TBox>
      <TBox strContentType="Location"><p>Pegnitz</p></TBox>
      <TBox strContentType="Teaser"><p>  Kurz gesagt.</p></TBox>
      <TBox strContentType="Author"><p>von Jane Doe</p></TBox>
      <PicBox><Image strPathName="C:\bilder\markt.jpg"/><TBox><p>Der Markt. Foto: Max Muster</p></TBox></PicBox>
      <p>Erster   Absatz
      mit Umbruch.</p>
      <IMTitle strName="Zwischentitel">Neue Pläne</IMTitle>
      <IMTitle strName="Sportergebnis">FC Pegnitz - SV Auerbach 2:1</IMTitle>
      <ul><li>Eins</li><li>Zwei</li></ul>
      <PicBox><Image strPathName="C:\bilder\plan.jpg"/><Description>Der Plan</Description></PicBox>
      <PicBox><Image strPathName="C:\bilder\markt.jpg"/></PicBox>
    </WebStoryContent>
  </WebStory>
</DialogExport>"#;

    fn lookups() -> LookupCache {
        LookupCache::from_parts(
            &[
                user(1, "jdoe", "Jane Doe", &[Role::Author]),
                user(2, "redaktion", "Redaktion", &[Role::Editor]),
            ],
            &[
                term(10, "category", "Lokales", "lokales", &[]),
                term(11, "category", "Pegnitz", "pegnitz", &[]),
                term(12, "category", "News", "news", &[]),
            ],
        )
    }

    fn parse(xml: &str) -> CanonicalDocument {
        let publisher = publisher("nn", "dialog", "articles", ParserKind::LegacyDialog);
        let lookups = lookups();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        match DialogParser.parse(&RawRecord::new(xml.as_bytes().to_vec(), "x"), &ctx).unwrap() {
            ParseOutcome::Document(doc) => *doc,
            ParseOutcome::Skip(reason) => panic!("skipped: {}", reason),
        }
    }

    #[test]
    fn test_identify_builds_padded_sanitized_id() {
        let publisher = publisher("nn", "dialog", "articles", ParserKind::LegacyDialog);
        let lookups = LookupCache::default();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        let id = DialogParser
            .identify(&RawRecord::new(STORY.as_bytes().to_vec(), "x"), &ctx)
            .unwrap();
        assert_eq!(id, Identification::Record("12_0007_3301_Muller_Strasse_Umbau".to_string()));
    }

    #[test]
    fn test_missing_ident_is_skipped() {
        let publisher = publisher("nn", "dialog", "articles", ParserKind::LegacyDialog);
        let lookups = LookupCache::default();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        let record = RawRecord::new(b"<DialogExport><WebStory/></DialogExport>".to_vec(), "x");
        assert!(matches!(DialogParser.identify(&record, &ctx).unwrap(), Identification::Skip(_)));
    }

    #[test]
    fn test_parse_story() {
        let doc = parse(STORY);

        assert_eq!(doc.guid.as_str(), "nn/dialog/12_0007_3301_Muller_Strasse_Umbau");
        assert_eq!(doc.kind, EntityKind::Post);
        assert_eq!(doc.title, "Breaking News Today");
        assert_eq!(doc.excerpt, "Kurz gesagt.");
        assert_eq!(doc.meta_str("author"), Some("Jane Doe"));
        assert_eq!(doc.meta_str("_publishing_system"), Some("Dialog/4.1--r2-"));
        assert_eq!(doc.meta_str("_importer_uuid"), Some("abc-123"));
        assert_eq!(doc.author, Some(AuthorRef::new(1, AuthorSource::Explicit)));
        assert_eq!(doc.comments_open, Some(false));
        assert_eq!(doc.published_at, parse_local_datetime("2019-03-01 06:30:00"));

        // location moved out of the categories, unknown names dropped
        assert_eq!(doc.taxonomies.names("category"), vec!["Lokales"]);
        assert_eq!(doc.taxonomies.names("location"), vec!["Pegnitz"]);

        assert_eq!(doc.media.len(), 2);
        let markt = &doc.media["markt.jpg"];
        assert_eq!(markt.target_name, "nn-markt.jpg");
        assert_eq!(markt.caption.as_deref(), Some("Der Markt."));
        assert_eq!(markt.credit.as_deref(), Some("Max Muster"));
        assert_eq!(doc.media["plan.jpg"].caption.as_deref(), Some("Der Plan"));

        assert_eq!(
            doc.body,
            "<!-- markt.jpg -->\n\n\
             Erster Absatz mit Umbruch.\n\n\
             <h3>Neue Pläne</h3>\n\n\
             <p class=\"sportsresult\"><span class=\"club\">FC Pegnitz</span> <span class=\"score\">2:1</span> <span class=\"club\">SV Auerbach</span></p>\n\n\
             <ul>\n<li>Eins</li>\n<li>Zwei</li>\n</ul>\n\n\
             <!-- plan.jpg -->\n\n"
        );
    }

    #[test]
    fn test_default_category_and_author() {
        let xml = STORY
            .replace("Lokales; Pegnitz ;Unbekannt", "Unbekannt")
            .replace("<TBox strContentType=\"Author\"><p>von Jane Doe</p></TBox>", "");
        let mut publisher = publisher("nn", "dialog", "articles", ParserKind::LegacyDialog);
        publisher.default_author = Some("redaktion".to_string());
        let lookups = lookups();
        let ctx = ParseContext::new(&publisher, "articles", &publisher.types["articles"], &lookups);
        let ParseOutcome::Document(doc) = DialogParser
            .parse(&RawRecord::new(xml.into_bytes(), "x"), &ctx)
            .unwrap()
        else {
            panic!("skipped");
        };

        assert_eq!(doc.taxonomies.names("category"), vec!["News"]);
        assert_eq!(doc.author, Some(AuthorRef::new(2, AuthorSource::Default)));
    }

    #[test]
    fn test_parse_gallery() {
        let xml = r#"<DialogExport strDialogVersion="4">
  <PictureGalleryHead strHeading=" Bilder vom
   Fest " strCreatorLoginName="jdoe">
    <Ident kLocationId="1" eLogType="12" kId="9" strName="Fest"/>
  </PictureGalleryHead>
  <PictureGallery>
    <PicGalleryItem><Image strPathName="a.jpg"/><Description>Eins</Description></PicGalleryItem>
    <PicGalleryItem><Image strPathName="b.jpg"/></PicGalleryItem>
  </PictureGallery>
</DialogExport>"#;
        let doc = parse(xml);
        assert_eq!(doc.kind, EntityKind::Gallery);
        assert_eq!(doc.title, "Bilder vom Fest");
        assert_eq!(doc.external_id, "1_0012_9_Fest");
        assert_eq!(doc.author, Some(AuthorRef::new(1, AuthorSource::Explicit)));
        assert_eq!(doc.body, "<!-- a.jpg -->\n\n<!-- b.jpg -->\n\n");
    }

    #[test]
    fn test_parse_is_deterministic() {
        assert_eq!(parse(STORY), parse(STORY));
    }
}
