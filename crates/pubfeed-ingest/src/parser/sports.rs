//! Sports result tables exported by Dialog as NITF

use super::html::{issue_date, system_label};
use super::{
    Identification, ParseContext, ParseOutcome, ParseResult, ParserKind, RawRecord, SourceParser,
};
use crate::model::{DocumentStatus, EntityKind};
use crate::xml::Element;
use pubfeed_common::text::truncate_bytes;
use serde_json::{json, Map, Value};

/// Dialog keeps file names to 56 bytes; longer stems would never match again.
const MAX_ID_BYTES: usize = 56;

#[derive(Debug, Clone, Copy, Default)]
pub struct SportsParser;

impl SportsParser {
    fn external_id(record: &RawRecord) -> Option<String> {
        let id = truncate_bytes(&record.stem, MAX_ID_BYTES);
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Tables keyed by lower-cased class: `{ "table": [rows], "headings": {id: label} }`
fn sport_tables(root: &Element) -> Map<String, Value> {
    let mut tables = Map::new();
    for table in root.find_all("nitf-table") {
        let metadata = table.child("nitf-table-metadata");

        let mut headings = Map::new();
        let columns: Vec<&Element> = metadata
            .map(|m| m.children_named("nitf-col").collect())
            .unwrap_or_default();
        for column in columns {
            headings.insert(
                column.attr_or_empty("id").to_string(),
                Value::from(column.attr_or_empty("value")),
            );
        }

        let rows: Vec<Value> = table
            .path_all("table/tbody/tr")
            .into_iter()
            .map(|row| {
                let cells: Map<String, Value> = row
                    .elements()
                    .map(|cell| {
                        let idref = cell.attr_or_empty("idref");
                        let label = headings
                            .get(idref)
                            .and_then(Value::as_str)
                            .unwrap_or(idref)
                            .to_string();
                        (label, Value::from(cell.text()))
                    })
                    .collect();
                Value::Object(cells)
            })
            .collect();
        if rows.is_empty() {
            continue;
        }

        let class = metadata.map(|m| m.attr_or_empty("class")).unwrap_or_default().to_lowercase();
        tables.insert(class, json!({ "table": rows, "headings": headings }));
    }
    tables
}

impl SourceParser for SportsParser {
    fn kind(&self) -> ParserKind {
        ParserKind::SportsResults
    }

    fn identify(&self, record: &RawRecord, _ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        Ok(match Self::external_id(record) {
            Some(id) => Identification::Record(id),
            None => Identification::Skip("no file name".to_string()),
        })
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        let Some(id) = Self::external_id(record) else {
            return Ok(ParseOutcome::Skip("no file name".to_string()));
        };
        let root = Element::parse_bytes(&record.bytes)?;

        let mut doc = ctx.document(&id, EntityKind::SportsTable, &record.bytes);
        doc.set_meta(
            "_publishing_system",
            system_label("Dialog", root.attr_or_empty("strDialogVersion")),
        );
        if let Some(uuid) = root.find("doc-id").and_then(|d| d.attr("id-string")) {
            doc.set_meta("_importer_uuid", uuid);
        }
        doc.status = DocumentStatus::Publish;
        doc.comments_open = Some(false);
        if let Some(norm) = root.find("date.issue").and_then(|d| d.attr("norm")) {
            doc.published_at = issue_date(norm);
        }

        doc.title = root.find("hl1").map(Element::text).unwrap_or_default();
        // the store rejects empty content
        doc.body = " ".to_string();
        doc.set_meta("_sport_tables", Value::Object(sport_tables(&root)));
        doc.author = ctx.default_author();

        Ok(ParseOutcome::Document(Box::new(doc)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lookup::tests::user;
    use crate::lookup::LookupCache;
    use crate::model::{AuthorRef, AuthorSource};
    use crate::parser::tests::publisher;
    use crate::store::Role;

    const RESULTS: &str = r#"<nitf strDialogVersion="4.1">
  <head><docdata><doc-id id-string="uuid-77"/><date.issue norm="2019-03-02T18:00:00"/></docdata></head>
  <body>
    <body.head><hedline><hl1>Kreisliga Nord</hl1></hedline></body.head>
    <body.content>
      <nitf-table>
        <nitf-table-metadata class="Tabelle">
          <nitf-col id="c1" value="Platz"/>
          <nitf-col id="c2" value="Verein"/>
        </nitf-table-metadata>
        <table><tbody>
          <tr><td idref="c1">1</td><td idref="c2">FC Pegnitz</td></tr>
          <tr><td idref="c1">2</td><td idref="c2">SV Auerbach</td></tr>
        </tbody></table>
      </nitf-table>
      <nitf-table>
        <nitf-table-metadata class="Leer"><nitf-col id="c1" value="Platz"/></nitf-table-metadata>
        <table><tbody/></table>
      </nitf-table>
    </body.content>
  </body>
</nitf>"#;

    #[test]
    fn test_parse_tables() {
        let mut publisher = publisher("nn", "dialog", "tables", ParserKind::SportsResults);
        publisher.default_author = Some("sport".to_string());
        let lookups = LookupCache::from_parts(&[user(3, "sport", "Sportredaktion", &[Role::Author])], &[]);
        let ctx = ParseContext::new(&publisher, "tables", &publisher.types["tables"], &lookups);
        let stem = "kreisliga_nord_tabelle_mit_einem_sehr_langen_dateinamen_der_abgeschnitten_wird";

        let outcome = SportsParser
            .parse(&RawRecord::new(RESULTS.as_bytes().to_vec(), stem), &ctx)
            .unwrap();
        let ParseOutcome::Document(doc) = outcome else {
            panic!("skipped");
        };

        assert_eq!(doc.external_id.len(), 56);
        assert!(stem.starts_with(&doc.external_id));
        assert_eq!(doc.kind, EntityKind::SportsTable);
        assert_eq!(doc.title, "Kreisliga Nord");
        assert_eq!(doc.body, " ");
        assert_eq!(doc.comments_open, Some(false));
        assert_eq!(doc.status, DocumentStatus::Publish);
        assert_eq!(doc.author, Some(AuthorRef::new(3, AuthorSource::Default)));
        assert_eq!(doc.meta_str("_importer_uuid"), Some("uuid-77"));
        assert_eq!(doc.meta_str("_publishing_system"), Some("Dialog/4.1"));

        let tables = doc.meta["_sport_tables"].as_object().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables["tabelle"],
            json!({
                "table": [
                    {"Platz": "1", "Verein": "FC Pegnitz"},
                    {"Platz": "2", "Verein": "SV Auerbach"}
                ],
                "headings": {"c1": "Platz", "c2": "Verein"}
            })
        );
    }

    #[test]
    fn test_issue_date_with_zone_offset() {
        let publisher = publisher("nn", "dialog", "tables", ParserKind::SportsResults);
        let lookups = LookupCache::default();
        let ctx = ParseContext::new(&publisher, "tables", &publisher.types["tables"], &lookups);
        let source = RESULTS.replace("2019-03-02T18:00:00", "20190302T180000+0100");

        let outcome = SportsParser
            .parse(&RawRecord::new(source.into_bytes(), "tabelle"), &ctx)
            .unwrap();
        let ParseOutcome::Document(doc) = outcome else {
            panic!("skipped");
        };
        assert_eq!(
            doc.published_at,
            chrono::NaiveDate::from_ymd_opt(2019, 3, 2).unwrap().and_hms_opt(18, 0, 0)
        );
    }

    #[test]
    fn test_empty_stem_is_skipped() {
        let publisher = publisher("nn", "dialog", "tables", ParserKind::SportsResults);
        let lookups = LookupCache::default();
        let ctx = ParseContext::new(&publisher, "tables", &publisher.types["tables"], &lookups);
        let id = SportsParser.identify(&RawRecord::new(Vec::new(), ""), &ctx).unwrap();
        assert!(matches!(id, Identification::Skip(_)));
    }
}
