//! Wire encoding of web-service call parameters.
//!
//! The REST dialect flattens structured arguments into bracketed query keys:
//!
//! - a sequence `v` under name `n` becomes `n[0]=..&n[1]=..`,
//! - a map becomes `n[key]=..`,
//! - both rules recurse, so `options=[{name: "userfields", value: "id"}]`
//!   becomes `options[0][name]=userfields&options[0][value]=id`,
//! - timestamps are emitted as integral seconds since the epoch in the
//!   server's configured time zone, booleans as `1`/`0`.

use chrono::{DateTime, FixedOffset, Utc};

/// One parameter value, possibly structured.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Time(DateTime<Utc>),
    Seq(Vec<ParamValue>),
    Map(Vec<(String, ParamValue)>),
}

impl ParamValue {
    /// Flatten this value under `name` into `out`, applying the bracket
    /// rules recursively.
    fn flatten(&self, name: &str, tz: FixedOffset, out: &mut Vec<(String, String)>) {
        match self {
            ParamValue::Int(v) => out.push((name.to_string(), v.to_string())),
            ParamValue::Float(v) => out.push((name.to_string(), v.to_string())),
            ParamValue::Bool(v) => out.push((name.to_string(), if *v { "1" } else { "0" }.to_string())),
            ParamValue::Str(v) => out.push((name.to_string(), v.clone())),
            ParamValue::Time(v) => out.push((
                name.to_string(),
                v.with_timezone(&tz).timestamp().to_string(),
            )),
            ParamValue::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.flatten(&format!("{name}[{i}]"), tz, out);
                }
            }
            ParamValue::Map(entries) => {
                for (key, value) in entries {
                    value.flatten(&format!("{name}[{key}]"), tz, out);
                }
            }
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered set of named call parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Consumes and returns `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.0.push((name.to_string(), value.into()));
        self
    }

    /// Append a parameter only when `value` is present.
    #[must_use]
    pub fn with_opt(self, name: &str, value: Option<impl Into<ParamValue>>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    /// Encode into flat `(key, value)` pairs ready for the query string.
    pub fn encode(&self, tz: FixedOffset) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, value) in &self.0 {
            value.flatten(name, tz, &mut out);
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn scalars_are_rendered_verbatim() {
        let pairs = Params::new()
            .with("courseid", 17)
            .with("classification", "inprogress")
            .with("ratio", 0.5)
            .encode(utc_offset());
        assert_eq!(
            pairs,
            vec![
                ("courseid".into(), "17".into()),
                ("classification".into(), "inprogress".into()),
                ("ratio".into(), "0.5".into()),
            ]
        );
    }

    #[test]
    fn booleans_become_integers() {
        let pairs = Params::new()
            .with("includenotenrolledcourses", false)
            .with("onlyactive", true)
            .encode(utc_offset());
        assert_eq!(
            pairs,
            vec![
                ("includenotenrolledcourses".into(), "0".into()),
                ("onlyactive".into(), "1".into()),
            ]
        );
    }

    #[test]
    fn sequences_use_indexed_brackets() {
        let pairs = Params::new()
            .with("courseids", vec![4i64, 9, 25])
            .encode(utc_offset());
        assert_eq!(
            pairs,
            vec![
                ("courseids[0]".into(), "4".into()),
                ("courseids[1]".into(), "9".into()),
                ("courseids[2]".into(), "25".into()),
            ]
        );
    }

    #[test]
    fn nested_maps_recurse() {
        let options = ParamValue::Seq(vec![ParamValue::Map(vec![
            ("name".to_string(), "userfields".into()),
            ("value".to_string(), "id, fullname".into()),
        ])]);
        let pairs = Params::new().with("options", options).encode(utc_offset());
        assert_eq!(
            pairs,
            vec![
                ("options[0][name]".into(), "userfields".into()),
                ("options[0][value]".into(), "id, fullname".into()),
            ]
        );
    }

    #[test]
    fn timestamps_become_epoch_seconds() {
        let when = Utc.with_ymd_and_hms(2025, 5, 25, 10, 0, 0).unwrap();
        let pairs = Params::new().with("since", when).encode(utc_offset());
        assert_eq!(pairs, vec![("since".into(), "1748167200".into())]);

        // The epoch does not shift with the server's zone.
        let moscow = FixedOffset::east_opt(3 * 3600).unwrap();
        let pairs = Params::new().with("since", when).encode(moscow);
        assert_eq!(pairs, vec![("since".into(), "1748167200".into())]);
    }

    /// Minimal decoder for the bracket syntax, used to check the encoding is
    /// invertible: scalars, sequences and maps all survive a round trip.
    fn decode(pairs: &[(String, String)]) -> BTreeMap<String, serde_json::Value> {
        use serde_json::Value;
        let mut root: BTreeMap<String, Value> = BTreeMap::new();
        for (key, raw) in pairs {
            let mut segments: Vec<&str> = Vec::new();
            let (head, rest) = key.split_once('[').map_or((key.as_str(), ""), |(h, r)| (h, r));
            segments.push(head);
            for part in rest.split('[') {
                if let Some(stripped) = part.strip_suffix(']') {
                    segments.push(stripped);
                }
            }
            let top = root
                .entry(segments[0].to_string())
                .or_insert(Value::Null);
            let mut slot = top;
            for segment in &segments[1..] {
                if segment.bytes().all(|b| b.is_ascii_digit()) {
                    let idx: usize = segment.parse().unwrap();
                    if !slot.is_array() {
                        *slot = Value::Array(Vec::new());
                    }
                    let arr = slot.as_array_mut().unwrap();
                    while arr.len() <= idx {
                        arr.push(Value::Null);
                    }
                    slot = &mut arr[idx];
                } else {
                    if !slot.is_object() {
                        *slot = Value::Object(serde_json::Map::new());
                    }
                    slot = slot
                        .as_object_mut()
                        .unwrap()
                        .entry(segment.to_string())
                        .or_insert(Value::Null);
                }
            }
            *slot = Value::String(raw.clone());
        }
        root
    }

    #[test]
    fn encoding_round_trips_through_the_bracket_syntax() {
        let options = ParamValue::Seq(vec![
            ParamValue::Map(vec![
                ("name".to_string(), "limitfrom".into()),
                ("value".to_string(), 50i64.into()),
            ]),
            ParamValue::Map(vec![
                ("name".to_string(), "limitnumber".into()),
                ("value".to_string(), 25i64.into()),
            ]),
        ]);
        let pairs = Params::new()
            .with("courseid", 3)
            .with("options", options)
            .encode(utc_offset());

        let decoded = decode(&pairs);
        assert_eq!(decoded["courseid"], serde_json::json!("3"));
        assert_eq!(
            decoded["options"],
            serde_json::json!([
                {"name": "limitfrom", "value": "50"},
                {"name": "limitnumber", "value": "25"},
            ])
        );
    }
}
