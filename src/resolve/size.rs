//! Compressed/uncompressed byte counts from whatever shape the inspector
//! produced.
//!
//! Each extractor is total: it looks at one document shape and returns
//! `None` when that shape is absent or sums to nothing. [`resolve`] chains
//! them in priority order and the first hit wins.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// `uncompressed ≈ compressed × 1.7`, expressed in tenths so rounding is exact.
const ESTIMATE_RATIO_TENTHS: u128 = 17;

/// Which extractor produced the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    LayersData,
    Manifest,
    TopLevel,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeRecord {
    pub compressed_bytes: u64,
    pub uncompressed_bytes: Option<u64>,
    /// `uncompressed_bytes` was derived with [`estimate_uncompressed`], not reported.
    pub uncompressed_is_estimate: bool,
    pub source: SizeSource,
}

impl SizeRecord {
    pub fn empty() -> Self {
        Self {
            compressed_bytes: 0,
            uncompressed_bytes: None,
            uncompressed_is_estimate: false,
            source: SizeSource::None,
        }
    }

    fn from_totals(totals: LayerTotals) -> Self {
        let (uncompressed_bytes, uncompressed_is_estimate) = match totals.uncompressed {
            Some(bytes) => (Some(bytes), false),
            None if totals.compressed > 0 => (Some(estimate_uncompressed(totals.compressed)), true),
            None => (None, false),
        };
        Self {
            compressed_bytes: totals.compressed,
            uncompressed_bytes,
            uncompressed_is_estimate,
            source: totals.source,
        }
    }
}

/// `round(compressed × 1.7)`, half rounding up, computed in integers.
pub fn estimate_uncompressed(compressed: u64) -> u64 {
    let tenths = compressed as u128 * ESTIMATE_RATIO_TENTHS;
    u64::try_from((tenths + 5) / 10).unwrap_or(u64::MAX)
}

/// Shape of an `inspect --raw` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestShape {
    /// Docker v2 schema 2 or OCI manifest: `config` + `layers` descriptors.
    Descriptors,
    /// Docker v2 schema 1: `fsLayers` + `history`, no sizes.
    LegacyV1,
    /// Multi-platform index / manifest list.
    Index,
    Unknown,
}

pub fn manifest_shape(raw: &Value) -> ManifestShape {
    if raw.get("schemaVersion").and_then(Value::as_u64) == Some(1) || raw.get("fsLayers").is_some()
    {
        ManifestShape::LegacyV1
    } else if raw.get("manifests").is_some_and(Value::is_array) {
        ManifestShape::Index
    } else if raw.get("layers").is_some_and(Value::is_array) {
        ManifestShape::Descriptors
    } else {
        ManifestShape::Unknown
    }
}

/// True when the standard document has no per-layer size list but does list
/// layers, i.e. the raw manifest is the only place sizes can come from.
pub fn needs_raw_manifest(doc: &Value) -> bool {
    non_empty_array(doc, "LayersData").is_none() && non_empty_array(doc, "Layers").is_some()
}

/// Run the extractor chain. `raw_manifest` is only consulted when
/// [`needs_raw_manifest`] said so and the caller managed to fetch it.
pub fn resolve(doc: &Value, raw_manifest: Option<&Value>) -> SizeRecord {
    from_layers_data(doc)
        .or_else(|| raw_manifest.and_then(from_manifest))
        .or_else(|| from_top_level(doc))
        .map(SizeRecord::from_totals)
        .unwrap_or_else(SizeRecord::empty)
}

struct LayerTotals {
    compressed: u64,
    uncompressed: Option<u64>,
    source: SizeSource,
}

/// `LayersData[].Size`, plus `UncompressedSize` summed over the layers that
/// report it. A zero uncompressed sum counts as unknown.
fn from_layers_data(doc: &Value) -> Option<LayerTotals> {
    let layers = non_empty_array(doc, "LayersData")?;
    let total = |field: &str| {
        layers
            .iter()
            .filter_map(|l| l.get(field).and_then(byte_count))
            .fold(0u64, u64::saturating_add)
    };

    let compressed = total("Size");
    let uncompressed = Some(total("UncompressedSize")).filter(|&sum| sum > 0);

    if compressed == 0 && uncompressed.is_none() {
        return None;
    }
    Some(LayerTotals {
        compressed,
        uncompressed,
        source: SizeSource::LayersData,
    })
}

/// `layers[].size` from a descriptor manifest. Never authoritative for
/// uncompressed size.
fn from_manifest(raw: &Value) -> Option<LayerTotals> {
    match manifest_shape(raw) {
        ManifestShape::Descriptors => {}
        shape => {
            debug!(?shape, "raw manifest has no summable layer descriptors");
            return None;
        }
    }

    let compressed = non_empty_array(raw, "layers")?
        .iter()
        .filter_map(|l| l.get("size").and_then(byte_count))
        .fold(0u64, u64::saturating_add);

    (compressed > 0).then_some(LayerTotals {
        compressed,
        uncompressed: None,
        source: SizeSource::Manifest,
    })
}

fn from_top_level(doc: &Value) -> Option<LayerTotals> {
    let compressed = doc.get("Size").and_then(byte_count).filter(|&s| s > 0)?;
    Some(LayerTotals {
        compressed,
        uncompressed: None,
        source: SizeSource::TopLevel,
    })
}

fn non_empty_array<'a>(doc: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    doc.get(key)
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
}

/// Accept integers, and non-negative floats some inspectors emit.
fn byte_count(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| {
        v.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}
