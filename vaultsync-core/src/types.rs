//! Domain types for remote items.
//!
//! Items arrive from the upstream API as JSON; [`ItemSummary::from_api`] and
//! [`PropertyValue::from_api`] decode them into owned, strongly-typed values.
//! Unknown property types are preserved verbatim instead of being dropped.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a remote item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque upstream value that changes whenever the item changes.
///
/// The upstream API exposes the last-edited timestamp for this purpose; it is
/// compared for equality only, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionToken(pub String);

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RevisionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RevisionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Start/end pair of a date property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: Option<String>,
}

/// A single typed property value attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Number(Option<f64>),
    Select(Option<String>),
    MultiSelect(Vec<String>),
    Status(Option<String>),
    Date(Option<DateRange>),
    Checkbox(bool),
    Url(Option<String>),
    Email(Option<String>),
    PhoneNumber(Option<String>),
    People(Vec<String>),
    Relation(Vec<String>),
    Files(Vec<String>),
    Timestamp(Option<String>),
    Formula(Value),
    Unknown { kind: String, raw: Value },
}

impl PropertyValue {
    /// Decode one entry of the upstream `properties` object.
    pub fn from_api(prop: &Value) -> Self {
        let kind = prop.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let body = prop.get(kind).unwrap_or(&Value::Null);
        match kind {
            "title" => Self::Title(plain_text(body)),
            "rich_text" => Self::RichText(plain_text(body)),
            "number" => Self::Number(body.as_f64()),
            "select" => Self::Select(name_of(body)),
            "status" => Self::Status(name_of(body)),
            "multi_select" => Self::MultiSelect(names_of(body, "name")),
            "date" => Self::Date(body.get("start").and_then(Value::as_str).map(|start| {
                DateRange {
                    start: start.to_string(),
                    end: body.get("end").and_then(Value::as_str).map(str::to_string),
                }
            })),
            "checkbox" => Self::Checkbox(body.as_bool().unwrap_or(false)),
            "url" => Self::Url(body.as_str().map(str::to_string)),
            "email" => Self::Email(body.as_str().map(str::to_string)),
            "phone_number" => Self::PhoneNumber(body.as_str().map(str::to_string)),
            "people" => Self::People(names_of(body, "name")),
            "relation" => Self::Relation(names_of(body, "id")),
            "files" => Self::Files(names_of(body, "name")),
            "created_time" | "last_edited_time" => {
                Self::Timestamp(body.as_str().map(str::to_string))
            }
            "formula" => {
                let inner = body.get("type").and_then(Value::as_str).unwrap_or("");
                Self::Formula(body.get(inner).cloned().unwrap_or(Value::Null))
            }
            other => Self::Unknown {
                kind: other.to_string(),
                raw: body.clone(),
            },
        }
    }

    /// The untagged JSON rendition used for frontmatter and hashing.
    pub fn to_plain(&self) -> Value {
        match self {
            Self::Title(s) | Self::RichText(s) => Value::String(s.clone()),
            Self::Number(n) => n.map(Value::from).unwrap_or(Value::Null),
            Self::Select(s)
            | Self::Status(s)
            | Self::Url(s)
            | Self::Email(s)
            | Self::PhoneNumber(s)
            | Self::Timestamp(s) => s.clone().map(Value::String).unwrap_or(Value::Null),
            Self::MultiSelect(v) | Self::People(v) | Self::Relation(v) | Self::Files(v) => {
                Value::Array(v.iter().cloned().map(Value::String).collect())
            }
            Self::Date(None) => Value::Null,
            Self::Date(Some(range)) => match &range.end {
                Some(end) => serde_json::json!({ "start": range.start, "end": end }),
                None => Value::String(range.start.clone()),
            },
            Self::Checkbox(b) => Value::Bool(*b),
            Self::Formula(v) => v.clone(),
            Self::Unknown { raw, .. } => raw.clone(),
        }
    }
}

fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn name_of(v: &Value) -> Option<String> {
    v.get("name").and_then(Value::as_str).map(str::to_string)
}

fn names_of(v: &Value, key: &str) -> Vec<String> {
    v.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get(key).and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Item summary
// ---------------------------------------------------------------------------

/// Title used when an item has no title property or an empty one.
pub const UNTITLED: &str = "Untitled";

/// Listing-level metadata for one remote item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub title: String,
    pub revision: RevisionToken,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ItemSummary {
    /// Decode an upstream page object.
    pub fn from_api(page: &Value) -> Result<Self, ParseError> {
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField {
                object: "page",
                field: "id",
            })?;
        let created_time = timestamp_field(page, "created_time")?;
        let edited_raw = page
            .get("last_edited_time")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField {
                object: "page",
                field: "last_edited_time",
            })?;
        let last_edited_time = timestamp_field(page, "last_edited_time")?;

        let properties: BTreeMap<String, PropertyValue> = page
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, v)| (name.clone(), PropertyValue::from_api(v)))
                    .collect()
            })
            .unwrap_or_default();

        let title = properties
            .values()
            .find_map(|p| match p {
                PropertyValue::Title(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
                _ => None,
            })
            .unwrap_or_else(|| UNTITLED.to_string());

        Ok(Self {
            id: ItemId::from(id),
            title,
            revision: RevisionToken::from(edited_raw),
            created_time,
            last_edited_time,
            archived: page.get("archived").and_then(Value::as_bool).unwrap_or(false),
            url: page.get("url").and_then(Value::as_str).map(str::to_string),
            properties,
        })
    }

    /// Properties as a sorted JSON object, the canonical form for hashing.
    pub fn properties_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_plain()))
            .collect();
        Value::Object(map)
    }
}

fn timestamp_field(obj: &Value, field: &'static str) -> Result<DateTime<Utc>, ParseError> {
    let raw = obj
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField {
            object: "page",
            field,
        })?;
    parse_timestamp(raw).ok_or_else(|| ParseError::InvalidTimestamp {
        object: "page",
        field,
        value: raw.to_string(),
    })
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Value {
        json!({
            "object": "page",
            "id": "5f1b-page",
            "created_time": "2024-03-01T10:00:00.000Z",
            "last_edited_time": "2024-03-02T11:30:00.000Z",
            "archived": false,
            "url": "https://www.notion.so/5f1b",
            "properties": {
                "Name": { "type": "title", "title": [
                    { "plain_text": "Weekly " }, { "plain_text": "Notes" }
                ]},
                "Tags": { "type": "multi_select", "multi_select": [
                    { "name": "work" }, { "name": "review" }
                ]},
                "Done": { "type": "checkbox", "checkbox": true },
                "Due": { "type": "date", "date": { "start": "2024-03-08", "end": null } },
                "Score": { "type": "formula", "formula": { "type": "number", "number": 4 } },
                "Mystery": { "type": "verification", "verification": { "state": "verified" } }
            }
        })
    }

    #[test]
    fn decodes_page_summary() {
        let item = ItemSummary::from_api(&page()).unwrap();
        assert_eq!(item.id, ItemId::from("5f1b-page"));
        assert_eq!(item.title, "Weekly Notes");
        assert_eq!(item.revision.0, "2024-03-02T11:30:00.000Z");
        assert_eq!(item.url.as_deref(), Some("https://www.notion.so/5f1b"));
        assert_eq!(
            item.properties.get("Tags"),
            Some(&PropertyValue::MultiSelect(vec![
                "work".into(),
                "review".into()
            ]))
        );
        assert_eq!(
            item.properties.get("Score").map(PropertyValue::to_plain),
            Some(json!(4))
        );
    }

    #[test]
    fn unknown_property_kind_is_preserved() {
        let item = ItemSummary::from_api(&page()).unwrap();
        match item.properties.get("Mystery") {
            Some(PropertyValue::Unknown { kind, raw }) => {
                assert_eq!(kind, "verification");
                assert_eq!(raw["state"], "verified");
            }
            other => panic!("expected unknown property, got {other:?}"),
        }
    }

    #[test]
    fn missing_title_falls_back_to_untitled() {
        let mut p = page();
        p["properties"]["Name"]["title"] = json!([]);
        let item = ItemSummary::from_api(&p).unwrap();
        assert_eq!(item.title, UNTITLED);
    }

    #[test]
    fn missing_id_is_an_error() {
        let mut p = page();
        p.as_object_mut().unwrap().remove("id");
        let err = ItemSummary::from_api(&p).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingField {
                object: "page",
                field: "id"
            }
        );
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let mut p = page();
        p["created_time"] = json!("yesterday");
        assert!(matches!(
            ItemSummary::from_api(&p),
            Err(ParseError::InvalidTimestamp { field: "created_time", .. })
        ));
    }

    #[test]
    fn properties_json_is_key_sorted() {
        let item = ItemSummary::from_api(&page()).unwrap();
        let rendered = serde_json::to_string(&item.properties_json()).unwrap();
        let done = rendered.find("\"Done\"").unwrap();
        let tags = rendered.find("\"Tags\"").unwrap();
        assert!(done < tags);
    }
}
