//! Tagged annotations attached to cartridges and file infos.
use std::collections::BTreeMap;

use serde::Serialize;

/// Health bookkeeping while shadowing a hardware drive.
pub const HEALTH_SECTORS: &str = "health.sectors";
pub const HEALTH_SECTORS_BAD: &str = "health.sectors.bad";
pub const HEALTH_HEADERS_BAD: &str = "health.headers.bad";
pub const HEALTH_RECORDS_BAD: &str = "health.records.bad";
/// Highest sector index ever received from real hardware.
pub const TOP_SECTOR: &str = "top.sector";

/// A tagged annotation value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Annotation {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Annotation {
    pub fn as_bool(&self) -> bool {
        matches!(self, Annotation::Bool(true))
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Annotation::Int(v) => *v,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Annotation::Str(v) => v,
            _ => "",
        }
    }
}

impl From<bool> for Annotation {
    fn from(v: bool) -> Self {
        Annotation::Bool(v)
    }
}

impl From<i64> for Annotation {
    fn from(v: i64) -> Self {
        Annotation::Int(v)
    }
}

impl From<&str> for Annotation {
    fn from(v: &str) -> Self {
        Annotation::Str(v.to_string())
    }
}

impl From<String> for Annotation {
    fn from(v: String) -> Self {
        Annotation::Str(v)
    }
}

/// A string keyed annotation map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Annotations(BTreeMap<String, Annotation>);

impl Annotations {
    pub fn new() -> Self {
        Annotations::default()
    }

    pub fn annotate(&mut self, key: &str, value: impl Into<Annotation>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Annotation> {
        self.0.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Integer value of `key`, zero when absent or differently typed.
    pub fn int(&self, key: &str) -> i64 {
        self.get(key).map(Annotation::as_int).unwrap_or(0)
    }

    /// Adds `delta` to the integer annotation at `key`.
    pub fn adjust(&mut self, key: &str, delta: i64) {
        let v = self.int(key) + delta;
        self.annotate(key, v);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Annotation)> {
        self.0.iter()
    }
}
