//! Alfa subscriber exports
//!
//! One record per subscription. XML feeds carry one element per subscription
//! with a `Bezug` child per edition; JSON feeds carry the same shape as
//! objects. CSV rows are grouped into that shape by the feed cursor before
//! they reach the parser.

use super::html::parse_local_datetime;
use super::{
    Identification, ParseContext, ParseOutcome, ParseResult, ParserKind, RawRecord, SourceParser,
};
use crate::model::{CanonicalDocument, DocumentStatus, EntityKind, SubscriberAccount};
use crate::xml::Element;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// One edition a subscription grants access to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionRecord {
    #[serde(rename = "Ausgabe", default)]
    pub edition: String,
    #[serde(rename = "Beginn", default)]
    pub start: String,
    #[serde(rename = "Ende", default)]
    pub end: String,
}

/// A subscription as exported, independent of the feed format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "Abonummer", default, deserialize_with = "string_or_number")]
    pub number: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Passwort", default)]
    pub password: String,
    #[serde(rename = "Name", default)]
    pub last_name: String,
    #[serde(rename = "Vorname", default)]
    pub first_name: String,
    #[serde(rename = "Bezug", default)]
    pub editions: Vec<EditionRecord>,
}

/// Subscription numbers arrive as strings or bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected subscription number, got {}",
            other
        ))),
    }
}

impl SubscriptionRecord {
    pub fn from_xml(element: &Element) -> Self {
        Self {
            number: element.attr_or_empty("Abonummer").trim().to_string(),
            email: element.attr_or_empty("Email").trim().to_string(),
            password: element.attr_or_empty("Passwort").to_string(),
            last_name: element.attr_or_empty("Name").to_string(),
            first_name: element.attr_or_empty("Vorname").to_string(),
            editions: element
                .children_named("Bezug")
                .map(|bezug| EditionRecord {
                    edition: bezug.attr_or_empty("Ausgabe").to_string(),
                    start: bezug.attr_or_empty("Beginn").to_string(),
                    end: bezug.attr_or_empty("Ende").to_string(),
                })
                .collect(),
        }
    }

    /// Decode a record from its raw feed bytes, XML or JSON.
    pub fn from_raw(raw: &[u8]) -> ParseResult<Self> {
        let first = raw.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'<') {
            Ok(Self::from_xml(&Element::parse_bytes(raw)?))
        } else {
            let mut record: Self = serde_json::from_slice(raw)?;
            record.number = record.number.trim().to_string();
            record.email = record.email.trim().to_string();
            Ok(record)
        }
    }

    /// Earliest start and latest end over all editions
    pub fn term(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let date = |value: &str| parse_local_datetime(value).map(|at| at.date());
        let start = self.editions.iter().filter_map(|e| date(&e.start)).min();
        let end = self.editions.iter().filter_map(|e| date(&e.end)).max();
        (start, end)
    }
}

#[allow(clippy::expect_used)]
fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
            .expect("static pattern")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionParser;

impl SourceParser for SubscriptionParser {
    fn kind(&self) -> ParserKind {
        ParserKind::TabularSubscriber
    }

    /// Subscriptions are owned by the subscriber system; edits are overwritten.
    fn tracks_manual_edits(&self) -> bool {
        false
    }

    fn reconciles(&self) -> bool {
        true
    }

    fn identify(&self, record: &RawRecord, _ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        let subscription = SubscriptionRecord::from_raw(&record.bytes)?;
        Ok(if subscription.number.is_empty() {
            Identification::Skip("no subscription number".to_string())
        } else {
            Identification::Record(subscription.number)
        })
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        let subscription = SubscriptionRecord::from_raw(&record.bytes)?;
        if subscription.number.is_empty() {
            return Ok(ParseOutcome::Skip("no subscription number".to_string()));
        }
        if !is_valid_email(&subscription.email) {
            return Ok(ParseOutcome::Skip(format!(
                "invalid email address '{}'",
                subscription.email
            )));
        }

        let number = subscription.number.as_str();
        let mut doc = ctx.document(number, EntityKind::Subscription, &record.bytes);
        doc.title = format!("Subscription {}", number);
        doc.status = DocumentStatus::Active;
        doc.set_meta("_subscription_id", number);
        doc.set_meta("_created_via", ctx.publisher.id.as_str());

        if let Some(product) = ctx.type_config.sku.as_deref().and_then(|sku| ctx.lookups.product(sku)) {
            doc.set_meta("_product_id", product.id);
            doc.set_meta("_billing_period", product.billing_period.as_str());
            doc.set_meta("_billing_interval", product.billing_interval.as_str());
        }

        schedule(ctx, &subscription, &mut doc);

        doc.subscriber = Some(SubscriberAccount {
            login: number.to_string(),
            email: subscription.email.clone(),
            password: Some(subscription.password.clone()).filter(|p| !p.is_empty()),
            last_name: subscription.last_name.clone(),
            first_name: Some(subscription.first_name.clone()).filter(|n| !n.is_empty()),
            editions: subscription.editions.iter().map(|e| e.edition.clone()).collect(),
        });

        Ok(ParseOutcome::Document(Box::new(doc)))
    }
}

/// Editions and the subscription term
fn schedule(ctx: &ParseContext<'_>, subscription: &SubscriptionRecord, doc: &mut CanonicalDocument) {
    let editions: Vec<Value> = subscription
        .editions
        .iter()
        .map(|e| Value::from(e.edition.as_str()))
        .collect();
    doc.set_meta("_editions", editions);

    let timezone = ctx.type_config.timezone.as_str();
    let (start, end) = subscription.term();
    if let Some(start) = start {
        doc.published_at = start.and_hms_opt(0, 0, 0);
        doc.set_meta(
            "_schedule_start",
            format!("{} 00:00:00 {}", start.format("%Y-%m-%d"), timezone),
        );
    }
    let end = end
        .map(|end| format!("{} 23:59:00 {}", end.format("%Y-%m-%d"), timezone))
        .unwrap_or_default();
    doc.set_meta("_schedule_end", end);

    // a previous term of the same subscription must not linger
    doc.set_meta("_schedule_next_payment", 0);
    doc.set_meta("_schedule_cancelled", 0);
}
