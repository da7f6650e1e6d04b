//! Text formatting of destination fragments and command lines.
//!
//! Two dialects share one entry point, [`render`]:
//!
//! - **[`Dialect::Simple`]**: `{key}` substitution against the metadata, with
//!   `{{` and `}}` for literal braces. Every referenced key must exist. The
//!   same engine, [`substitute`], fills in shell command templates.
//! - **[`Dialect::Template`]**: an [upon] template (`{{ key }}`,
//!   `{{ value|formatter }}`) evaluated in a sandbox. The metadata is bound
//!   both under `metadata` and under each tag name directly. Only the helpers
//!   registered in [`addons`] are available:
//!   - **`len`**: length of a string, list or map.
//!   - **`str`**: string cast.
//!   - **`fraction`**: zero-padding for track/disc style numbers, see
//!     [`format_fraction`].
//!   - **`date`**: reformats a date-time with a [`time` format description],
//!     e.g. `{{ CreateDate|date: "[year]/[month]" }}`.
//!
//! [`time` format description]: https://time-rs.github.io/book/api/format-description.html

use crate::error::{ErrorKind, Result};
use derive_more::{Display, Error};
use exn::ResultExt;
use metatask_metadata::{Metadata, Value as MetadataValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use upon::{Engine, Value};

/// Name under which the whole metadata map is bound in [`Dialect::Template`].
pub const METADATA_BINDING: &str = "metadata";

/// Template dialect of a rename or metadata-write template.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Simple,
    Template,
}

/// Renders `template` against `metadata`.
///
/// Returns [`ErrorKind::Template`] when a key is missing (simple dialect) or
/// the template fails to compile or evaluate (template dialect).
pub fn render(template: &str, metadata: &Metadata, dialect: Dialect) -> Result<String> {
    match dialect {
        Dialect::Simple => {
            substitute(template, |key| metadata.get(key).map(ToString::to_string)).or_raise(|| ErrorKind::Template)
        },
        Dialect::Template => ENGINE.with(|engine| {
            let compiled = engine.compile(template.to_string()).or_raise(|| ErrorKind::Template)?;
            compiled.render(engine, bindings(metadata)).to_string().or_raise(|| ErrorKind::Template)
        }),
    }
}

/// Why a [`substitute`] call failed.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum SubstituteError {
    #[display("missing key '{_0}'")]
    MissingKey(#[error(not(source))] String),
    #[display("single '{{' or '}}' encountered in format string")]
    Unbalanced,
}

/// Replaces every `{key}` in `template` with `lookup(key)`.
///
/// `{{` and `}}` produce literal braces. A key for which `lookup` returns
/// `None`, or an unmatched brace, is an error.
pub fn substitute<F>(template: &str, mut lookup: F) -> std::result::Result<String, SubstituteError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(position) = rest.find(['{', '}']) {
        output.push_str(&rest[..position]);
        let tail = &rest[position..];
        if let Some(after) = tail.strip_prefix("{{") {
            output.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            output.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            return Err(SubstituteError::Unbalanced);
        } else {
            let close = tail.find('}').ok_or(SubstituteError::Unbalanced)?;
            let key = &tail[1..close];
            let value = lookup(key).ok_or_else(|| SubstituteError::MissingKey(key.to_string()))?;
            output.push_str(&value);
            rest = &tail[close + 1..];
        }
    }
    output.push_str(rest);
    Ok(output)
}

/// Zero-pads a "number of total" value.
///
/// - an integer `n` renders as `n` padded to two digits;
/// - a string `"n/d"` renders `n` padded to the digit width of `d`;
/// - a string holding a plain integer behaves like the integer;
/// - an empty string or no value renders as an empty string.
///
/// ```
/// use metatask_pipeline::format::format_fraction;
/// use upon::Value;
///
/// assert_eq!(format_fraction(&Value::Integer(5)).unwrap(), "05");
/// assert_eq!(format_fraction(&Value::String("3/100".into())).unwrap(), "003");
/// assert_eq!(format_fraction(&Value::None).unwrap(), "");
/// ```
pub fn format_fraction(value: &Value) -> std::result::Result<String, String> {
    let pad = |n: i64, width: usize| format!("{n:0width$}");
    match value {
        Value::None => Ok(String::new()),
        Value::Integer(n) => Ok(pad(*n, 2)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(String::new());
            }
            let parse = |n: &str| n.trim().parse::<i64>().map_err(|_| format!("expected a number, found \"{s}\""));
            match s.split_once('/') {
                Some((n, d)) => {
                    let width = parse(d)?.unsigned_abs().to_string().len();
                    Ok(pad(parse(n)?, width))
                },
                None => Ok(pad(parse(s)?, 2)),
            }
        },
        _ => Err("expected an integer or a \"n/d\" string".to_string()),
    }
}

/// Converts a metadata value to the [`upon`] data model. Date-times become
/// their display string; the `date` helper parses them back.
fn to_value(value: &MetadataValue) -> Value {
    match value {
        MetadataValue::Text(s) => Value::String(s.clone()),
        MetadataValue::Integer(i) => Value::Integer(*i),
        MetadataValue::Float(f) => Value::Float(*f),
        MetadataValue::Bool(b) => Value::Bool(*b),
        MetadataValue::List(list) => Value::List(list.iter().map(to_value).collect()),
        dt @ (MetadataValue::DateTime(_) | MetadataValue::OffsetDateTime(_)) => Value::String(dt.to_string()),
    }
}

/// Builds the variables exposed to [`Dialect::Template`] templates.
fn bindings(metadata: &Metadata) -> Value {
    let tags: BTreeMap<String, Value> = metadata.iter().map(|(k, v)| (k.clone(), to_value(v))).collect();
    let mut root = tags.clone();
    root.insert(METADATA_BINDING.to_string(), Value::Map(tags));
    Value::Map(root)
}

thread_local! {
    static ENGINE: Engine<'static> = {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        engine
    };
}

/// Sandboxed helpers available to [`Dialect::Template`] templates.
mod addons {
    use super::format_fraction;
    use metatask_metadata::Value as MetadataValue;
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};
    use upon::{Engine, Value};

    /// Display forms of date-time values, as produced by `to_value`.
    const DISPLAY_NAIVE: &[BorrowedFormatItem<'_>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    const DISPLAY_OFFSET: &[BorrowedFormatItem<'_>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]");

    fn length(value: &Value) -> i64 {
        let len = match value {
            Value::None => 0,
            Value::String(s) => s.chars().count(),
            Value::List(list) => list.len(),
            Value::Map(map) => map.len(),
            other => stringify(other).map_or(0, |s| s.chars().count()),
        };
        i64::try_from(len).unwrap_or(i64::MAX)
    }

    fn stringify(value: &Value) -> Result<String, String> {
        Ok(match value {
            Value::None => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(list) => list.iter().map(stringify).collect::<Result<Vec<_>, _>>()?.join(", "),
            Value::Map(_) => return Err("cannot convert a map to a string".to_string()),
        })
    }

    fn date(value: &Value, format: &str) -> Result<String, String> {
        let Value::String(s) = value else {
            return Err("expected a date-time string".to_string());
        };
        let items = time::format_description::parse(format).map_err(|e| e.to_string())?;
        if let Ok(dt) = OffsetDateTime::parse(s, DISPLAY_OFFSET) {
            return dt.format(&items).map_err(|e| e.to_string());
        }
        if let Ok(dt) = PrimitiveDateTime::parse(s, DISPLAY_NAIVE) {
            return dt.format(&items).map_err(|e| e.to_string());
        }
        match MetadataValue::parse_text(s.as_str()) {
            MetadataValue::DateTime(dt) => dt.format(&items).map_err(|e| e.to_string()),
            MetadataValue::OffsetDateTime(dt) => dt.format(&items).map_err(|e| e.to_string()),
            _ => Err(format!("not a date-time: \"{s}\"")),
        }
    }

    /// Registers every helper on the given engine.
    pub(super) fn configure(engine: &mut Engine<'_>) {
        engine.add_function("len", length);
        engine.add_function("str", stringify);
        engine.add_function("fraction", format_fraction);
        engine.add_function("date", date);
    }
}
