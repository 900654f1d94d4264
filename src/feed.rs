// src/feed.rs
//! Feed artifact model (GeoJSON feature collection) and the stateless readers
//! behind `ReadFeed` / `ReadStatus`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::marker::RunMarker;

/// Stable identity as written by the enrichment job (string or number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Text(String),
    Number(serde_json::Number),
}

impl FeatureId {
    pub fn as_key(&self) -> Option<String> {
        match self {
            FeatureId::Text(s) if s.trim().is_empty() => None,
            FeatureId::Text(s) => Some(s.clone()),
            FeatureId::Number(n) => Some(n.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    /// GeoJSON order: `[lon, lat]`. Numeric strings are accepted.
    #[serde(default, deserialize_with = "lenient_coordinates")]
    pub coordinates: Vec<f64>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl Geometry {
    pub fn point(lat: f64, lon: f64) -> Self {
        Self {
            kind: point_type(),
            coordinates: vec![lon, lat],
        }
    }

    pub fn lon(&self) -> Option<f64> {
        self.coordinates.first().copied()
    }

    pub fn lat(&self) -> Option<f64> {
        self.coordinates.get(1).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub id: Option<FeatureId>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    /// Narrative text.
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub place: String,
    /// Sentence the geocoder based the location on. The job sometimes writes
    /// a structured place object here instead; that reads as `None`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub llm_sentence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub event_links: Vec<String>,
    #[serde(default, alias = "headlines", deserialize_with = "lenient_strings")]
    pub related_headlines: Vec<String>,
    /// Everything else the job emits (debug prompts, decision source, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub id: Option<FeatureId>,
    #[serde(default, deserialize_with = "lenient")]
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "lenient")]
    pub properties: FeatureProperties,
}

// The artifact is written by an LLM-driven job, so field shapes drift. These
// readers never fail: a value of the wrong shape becomes the field default.

fn lenient<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let v = Value::deserialize(d)?;
    Ok(serde_json::from_value(v).unwrap_or_default())
}

fn scalar_text(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(scalar_text(Value::deserialize(d)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(scalar_text(Value::deserialize(d)?))
}

fn lenient_strings<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
        _ => Vec::new(),
    })
}

fn lenient_coordinates<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
    let Value::Array(items) = Value::deserialize(d)? else {
        return Ok(Vec::new());
    };
    let coords: Option<Vec<f64>> = items
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect();
    Ok(coords.unwrap_or_default())
}

fn lenient_features<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<Feature>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn feature_type() -> String {
    "Feature".to_string()
}

impl Feature {
    pub fn new(id: Option<&str>, title: &str, lat: f64, lon: f64) -> Self {
        Self {
            kind: feature_type(),
            id: id.map(|s| FeatureId::Text(s.to_string())),
            geometry: Some(Geometry::point(lat, lon)),
            properties: FeatureProperties {
                title: title.to_string(),
                ..Default::default()
            },
        }
    }

    /// Identity used for incremental rendering. `None` means "always treat as new".
    pub fn identity(&self) -> Option<String> {
        self.id
            .as_ref()
            .and_then(FeatureId::as_key)
            .or_else(|| self.properties.id.as_ref().and_then(FeatureId::as_key))
    }
}

/// Full contents of the feed artifact at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_features")]
    pub features: Vec<Feature>,
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl FeedSnapshot {
    pub fn empty() -> Self {
        Self {
            kind: collection_type(),
            features: Vec::new(),
        }
    }

    pub fn with_features(features: Vec<Feature>) -> Self {
        Self {
            kind: collection_type(),
            features,
        }
    }

    /// `None` unless `bytes` is a complete JSON object carrying a `features` array.
    /// Individual features are read leniently and never reject the snapshot.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if !is_feature_collection(bytes) {
            return None;
        }
        serde_json::from_slice(bytes).ok()
    }
}

/// Shape check used to decide between serving the artifact and the placeholder.
/// Nothing below the `features` array is inspected.
pub fn is_feature_collection(bytes: &[u8]) -> bool {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return false;
    }
    serde_json::from_slice::<Value>(bytes)
        .is_ok_and(|v| v.get("features").is_some_and(Value::is_array))
}

/// Serialized placeholder served whenever the artifact is absent, empty or unreadable.
pub const EMPTY_FEED_JSON: &str = r#"{"type":"FeatureCollection","features":[]}"#;

/// Stateless reader over the artifact + marker pair. Safe to share across requests.
#[derive(Clone)]
pub struct FeedStore {
    artifact: PathBuf,
    marker: Arc<dyn RunMarker>,
}

impl FeedStore {
    pub fn new(artifact: impl Into<PathBuf>, marker: Arc<dyn RunMarker>) -> Self {
        Self {
            artifact: artifact.into(),
            marker,
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    pub fn marker(&self) -> Arc<dyn RunMarker> {
        Arc::clone(&self.marker)
    }

    /// Raw bytes of the last fully written snapshot, or the empty placeholder.
    ///
    /// A torn read of a file mid-rewrite fails to parse and lands in the
    /// placeholder branch too; the caller's next poll retries.
    pub fn read_feed_bytes(&self) -> Vec<u8> {
        counter!("feed_reads_total").increment(1);
        match fs::read(&self.artifact) {
            Ok(bytes) if is_feature_collection(&bytes) => bytes,
            Ok(bytes) => {
                counter!("feed_placeholder_total").increment(1);
                tracing::debug!(
                    target: "feed",
                    path = %self.artifact.display(),
                    len = bytes.len(),
                    "feed artifact empty or unparseable, serving placeholder"
                );
                EMPTY_FEED_JSON.as_bytes().to_vec()
            }
            Err(e) => {
                counter!("feed_placeholder_total").increment(1);
                tracing::debug!(
                    target: "feed",
                    path = %self.artifact.display(),
                    error = %e,
                    "feed artifact unavailable, serving placeholder"
                );
                EMPTY_FEED_JSON.as_bytes().to_vec()
            }
        }
    }

    pub fn read_feed(&self) -> FeedSnapshot {
        FeedSnapshot::parse(&self.read_feed_bytes()).unwrap_or_default()
    }

    pub fn read_status(&self) -> bool {
        counter!("status_reads_total").increment(1);
        self.marker.is_running()
    }
}
