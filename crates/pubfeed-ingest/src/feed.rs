//! Multi-record feed files
//!
//! A [`FeedCursor`] walks one container file (CSV, JSON array or XML) and
//! yields one [`RawRecord`] per subscription. CSV exports carry one row per
//! edition; consecutive rows sharing a subscription number are folded into a
//! single record so every format reaches the parser in the same shape.

use crate::config::FeedFormat;
use crate::parser::subscription::{EditionRecord, SubscriptionRecord};
use crate::parser::{ParseResult, ParserError, RawRecord};
use crate::xml::Element;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One CSV row: account columns plus one edition
#[derive(Debug, Clone, Deserialize)]
struct CsvRow {
    #[serde(rename = "Abonummer")]
    number: String,
    #[serde(rename = "Email", default)]
    email: String,
    #[serde(rename = "Passwort", default)]
    password: String,
    #[serde(rename = "Name", default)]
    last_name: String,
    #[serde(rename = "Vorname", default)]
    first_name: String,
    #[serde(rename = "Ausgabe", default)]
    edition: String,
    #[serde(rename = "Beginn", default)]
    start: String,
    #[serde(rename = "Ende", default)]
    end: String,
}

impl CsvRow {
    fn edition(&self) -> EditionRecord {
        EditionRecord {
            edition: self.edition.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
        }
    }

    fn into_record(self) -> SubscriptionRecord {
        let edition = self.edition();
        SubscriptionRecord {
            number: self.number.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password,
            last_name: self.last_name,
            first_name: self.first_name,
            editions: vec![edition],
        }
    }
}

enum FeedSource {
    Csv {
        rows: csv::DeserializeRecordsIntoIter<File, CsvRow>,
        /// Row read past the end of the previous group
        pending: Option<csv::Result<CsvRow>>,
    },
    Items(std::vec::IntoIter<Vec<u8>>),
}

/// Streams the records of one feed file
pub struct FeedCursor {
    path: PathBuf,
    source: FeedSource,
    position: usize,
    exhausted: bool,
}

impl FeedCursor {
    pub fn open(path: &Path, format: FeedFormat) -> ParseResult<Self> {
        let source = match format {
            FeedFormat::Csv => {
                let delimiter = sniff_delimiter(path)?;
                let reader = csv::ReaderBuilder::new()
                    .delimiter(delimiter)
                    .trim(csv::Trim::Headers)
                    .flexible(true)
                    .from_path(path)?;
                FeedSource::Csv {
                    rows: reader.into_deserialize(),
                    pending: None,
                }
            },
            FeedFormat::Json => FeedSource::Items(json_items(&std::fs::read(path)?)?.into_iter()),
            FeedFormat::Xml => FeedSource::Items(xml_items(&std::fs::read(path)?)?.into_iter()),
        };
        debug!(path = %path.display(), ?format, "Opened feed");

        Ok(Self {
            path: path.to_path_buf(),
            source,
            position: 0,
            exhausted: false,
        })
    }

    /// Records handed out so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn record(&mut self, bytes: Vec<u8>) -> RawRecord {
        self.position += 1;
        RawRecord::new(bytes, "").with_path(self.path.clone())
    }

    /// Fold consecutive rows of the same subscription into one record. A bad
    /// row ends the group; its error is returned by the following call.
    fn next_csv_group(
        rows: &mut csv::DeserializeRecordsIntoIter<File, CsvRow>,
        pending: &mut Option<csv::Result<CsvRow>>,
    ) -> Option<ParseResult<SubscriptionRecord>> {
        let first = match pending.take().or_else(|| rows.next())? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };
        let mut record = first.into_record();

        for row in rows.by_ref() {
            match row {
                Ok(row) if row.number.trim() == record.number => record.editions.push(row.edition()),
                other => {
                    *pending = Some(other);
                    break;
                },
            }
        }
        Some(Ok(record))
    }
}

impl Iterator for FeedCursor {
    type Item = ParseResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let bytes = match &mut self.source {
            FeedSource::Csv { rows, pending } => match Self::next_csv_group(rows, pending) {
                Some(Ok(record)) => serde_json::to_vec(&record).map_err(ParserError::from),
                Some(Err(e)) => Err(e),
                None => {
                    self.exhausted = true;
                    return None;
                },
            },
            FeedSource::Items(items) => match items.next() {
                Some(bytes) => Ok(bytes),
                None => {
                    self.exhausted = true;
                    return None;
                },
            },
        };
        Some(bytes.map(|bytes| self.record(bytes)))
    }
}

/// `;` when the header row uses it and has no commas, else `,`
fn sniff_delimiter(path: &Path) -> ParseResult<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    Ok(if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    })
}

fn json_items(raw: &[u8]) -> ParseResult<Vec<Vec<u8>>> {
    match serde_json::from_slice::<Value>(raw)? {
        Value::Array(items) => items
            .iter()
            .map(|item| serde_json::to_vec(item).map_err(ParserError::from))
            .collect(),
        _ => Err(ParserError::invalid("feed", "expected a JSON array of records")),
    }
}

fn xml_items(raw: &[u8]) -> ParseResult<Vec<Vec<u8>>> {
    let root = Element::parse_bytes(raw)?;
    Ok(root.elements().map(|e| e.to_xml().into_bytes()).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn records(path: &Path, format: FeedFormat) -> Vec<SubscriptionRecord> {
        FeedCursor::open(path, format)
            .unwrap()
            .map(|r| SubscriptionRecord::from_raw(&r.unwrap().bytes).unwrap())
            .collect()
    }

    #[test]
    fn test_csv_rows_grouped_by_subscription() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "abos.csv",
            "Abonummer;Email;Passwort;Name;Vorname;Ausgabe;Beginn;Ende\n\
             100;a@example.org;pw;Muster;Erika;PZ;2019-01-01;\n\
             100;a@example.org;pw;Muster;Erika;NN;2019-02-01;2019-12-31\n\
             200;b@example.org;;Beispiel;;HZ;2020-01-01;\n",
        );

        let mut cursor = FeedCursor::open(&path, FeedFormat::Csv).unwrap();
        let first = SubscriptionRecord::from_raw(&cursor.next().unwrap().unwrap().bytes).unwrap();
        assert_eq!(first.number, "100");
        assert_eq!(first.editions.len(), 2);
        assert_eq!(first.editions[1].end, "2019-12-31");
        assert_eq!(cursor.position(), 1);

        let second = cursor.next().unwrap().unwrap();
        assert_eq!(second.path.as_deref(), Some(path.as_path()));
        assert!(cursor.next().is_none());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_csv_bad_row_keeps_collected_editions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abos.csv");
        let mut content = b"Abonummer;Email;Passwort;Name;Vorname;Ausgabe;Beginn;Ende\n\
            100;a@example.org;pw;Muster;Erika;PZ;2019-01-01;\n"
            .to_vec();
        content.extend_from_slice(b"100;a@example.org;pw;M\xfcster;Erika;NN;2019-02-01;\n");
        content.extend_from_slice(b"200;b@example.org;;Beispiel;;HZ;2020-01-01;\n");
        std::fs::write(&path, content).unwrap();

        let mut cursor = FeedCursor::open(&path, FeedFormat::Csv).unwrap();
        let first = SubscriptionRecord::from_raw(&cursor.next().unwrap().unwrap().bytes).unwrap();
        assert_eq!(first.number, "100");
        assert_eq!(first.editions.len(), 1);
        assert!(cursor.next().unwrap().is_err());
        let last = SubscriptionRecord::from_raw(&cursor.next().unwrap().unwrap().bytes).unwrap();
        assert_eq!(last.number, "200");
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_csv_grouping_is_stable_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "abos.csv",
            "Abonummer,Email,Passwort,Name,Vorname,Ausgabe,Beginn,Ende\n7,c@example.org,x,Y,Z,PZ,2020-01-01,\n",
        );
        let once: Vec<Vec<u8>> = FeedCursor::open(&path, FeedFormat::Csv)
            .unwrap()
            .map(|r| r.unwrap().bytes)
            .collect();
        let twice: Vec<Vec<u8>> = FeedCursor::open(&path, FeedFormat::Csv)
            .unwrap()
            .map(|r| r.unwrap().bytes)
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_json_array_feed() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "abos.json",
            r#"[{"Abonummer": "1", "Email": "a@example.org", "Bezug": []}, {"Abonummer": 2, "Email": "b@example.org"}]"#,
        );
        let parsed = records(&path, FeedFormat::Json);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].number, "2");
    }

    #[test]
    fn test_json_object_feed_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "abos.json", r#"{"Abonummer": "1"}"#);
        assert!(matches!(
            FeedCursor::open(&path, FeedFormat::Json),
            Err(ParserError::Invalid { .. })
        ));
    }

    #[test]
    fn test_xml_feed() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "abos.xml",
            r#"<Abonnements>
  <Abonnement Abonummer="1" Email="a@example.org"><Bezug Ausgabe="PZ" Beginn="2019-01-01"/></Abonnement>
  <Abonnement Abonummer="2" Email="b@example.org"/>
</Abonnements>"#,
        );
        let parsed = records(&path, FeedFormat::Xml);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].editions[0].edition, "PZ");
        assert_eq!(parsed[1].email, "b@example.org");
    }
}
