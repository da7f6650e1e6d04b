//! Typed metadata values.
//!
//! Exiftool reports everything as JSON scalars; date-like strings are promoted
//! to [`time`] values so templates can reformat them. Parsing tries each known
//! textual format in order and the first match wins. Anything else stays
//! [`Value::Text`].

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::collections::btree_map::Iter;
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// The exif form is tried before the offset-aware formats, the day-first one after.
const NAIVE_FORMATS: [&[BorrowedFormatItem<'_>]; 2] = [
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second]"),
    format_description!("[day]/[month]/[year] [hour]:[minute]:[second]"),
];
const OFFSET_FORMATS: [&[BorrowedFormatItem<'_>]; 2] = [
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"),
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"),
];
const DISPLAY_NAIVE: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DISPLAY_OFFSET: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]");

/// A single metadata value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    /// A date-time without timezone information.
    DateTime(PrimitiveDateTime),
    /// A date-time with a known UTC offset.
    OffsetDateTime(OffsetDateTime),
}
impl Value {
    /// Promotes a string to a date-time when it matches one of the known
    /// formats, otherwise keeps it as text.
    ///
    /// The `YYYY:MM:DD HH:MM:SS` form is checked before its offset variants
    /// since that's what exiftool reports for most tags; `DD/MM/YYYY` comes
    /// last.
    pub fn parse_text(s: impl Into<String>) -> Self {
        let s = s.into();
        if let Ok(dt) = PrimitiveDateTime::parse(&s, NAIVE_FORMATS[0]) {
            return Self::DateTime(dt);
        }
        for format in OFFSET_FORMATS {
            if let Ok(dt) = OffsetDateTime::parse(&s, format) {
                return Self::OffsetDateTime(dt);
            }
        }
        match PrimitiveDateTime::parse(&s, NAIVE_FORMATS[1]) {
            Ok(dt) => Self::DateTime(dt),
            Err(_) => Self::Text(s),
        }
    }
}
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Text(String::new()),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::parse_text(s),
            serde_json::Value::Array(list) => Self::List(list.into_iter().map(Self::from).collect()),
            // Nested structures only show up with `-struct`, which we never pass.
            object @ serde_json::Value::Object(_) => Self::Text(object.to_string()),
        }
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::parse_text(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::parse_text(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(list) => {
                for (i, value) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            },
            Self::DateTime(dt) => f.write_str(&dt.format(DISPLAY_NAIVE).map_err(|_| std::fmt::Error)?),
            Self::OffsetDateTime(dt) => f.write_str(&dt.format(DISPLAY_OFFSET).map_err(|_| std::fmt::Error)?),
        }
    }
}
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(n) => serializer.serialize_f64(*n),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for value in list {
                    seq.serialize_element(value)?;
                }
                seq.end()
            },
            dt @ (Self::DateTime(_) | Self::OffsetDateTime(_)) => serializer.collect_str(dt),
        }
    }
}

/// A point-in-time snapshot of a file's tags, ordered by tag name.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);
impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses exiftool's `-json` output: a list with one object per file.
    /// Only the first object is used.
    pub fn from_json_slice(json: &[u8]) -> Result<Self> {
        let mut files: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_slice(json).or_raise(|| ErrorKind::Parse)?;
        files.truncate(1);
        let tags = files.pop().ok_or_raise(|| ErrorKind::Parse)?;
        Ok(tags.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
    }

    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.0.get(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(tag.into(), value.into())
    }

    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Value);
    type IntoIter = Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
