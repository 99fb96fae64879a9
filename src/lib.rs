//! A [sans-I/O](https://sans-io.readthedocs.io/how-to-sans-io.html)
//! translator core for an indoor asset-tracking telemetry pipeline.
//!
//! Raw measurement messages published by the data-collection layer are fed
//! into a [`Translator`], which normalizes the heterogeneous LoLaN payload
//! encodings into typed attribute [`Patch`]es and, for time-series payloads,
//! windows the per-sample results into [`HistoryChunk`]s for a long-term
//! store. The core never performs I/O and never reads the system clock:
//! every time-dependent operation takes the current local wall-clock time
//! (`now`, in seconds) as an argument, so the caller (the `translatord`
//! executable, or a test) stays in full control of time.
//!
//! Common abbreviations:
//!
//! - BDCL: base data-collection layer, the upstream bus publisher;
//! - DCM: document-cache manager, the downstream patch consumer;
//! - LoLaN: the upstream variable naming scheme (`status.battery.level`);
//! - SCL: the positioning service publishing computed position vectors;
//! - TSD: time-series data, an ordered array of timestamped samples;
//! - T-tick: the internal measurement time unit (1 µs).
//!
//! Usage is simple:
//! ```
//! use lolan_translator::Translator;
//!
//! let mut translator = Translator::new();
//! let message = r#"{"header": {"uniqId": 1, "measTs": 1000, "serverTs": 900},
//!                   "data": {"status.temperature": 21.5}}"#;
//! let output = translator.process_bdcl(message, 1.0).unwrap();
//! assert_eq!(output.patches.len(), 1);
//! ```

#[deny(rustdoc::broken_intra_doc_links)]
pub mod clock;
pub mod history;
mod inbound;
mod translators;
mod tsd;

pub use history::{DeviceChanges, HistoryChunk, HistoryEntry};
pub use inbound::{BdclHeader, BdclMessage, SclMessage, SclPosition};
pub use tsd::{TimestampKind, TimestampUnit, TsdPayload, TsdSample, TsdTimestamp};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use clock::ClockSync;
use history::{ChunkBuffer, DedupWindow, LatestTimes};
use translators::scanner::TickAnchors;

/// The DCM collections patches can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    GeneralTags,
    Locations,
    Pairings,
    Extras,
    Twr,
    SclPositions,
}

impl Collection {
    /// Every collection the DCM serves a patch websocket for.
    pub const ALL: [Collection; 6] = [
        Collection::GeneralTags,
        Collection::Locations,
        Collection::Pairings,
        Collection::Extras,
        Collection::Twr,
        Collection::SclPositions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::GeneralTags => "generalTags",
            Collection::Locations => "locations",
            Collection::Pairings => "pairings",
            Collection::Extras => "extras",
            Collection::Twr => "twr",
            Collection::SclPositions => "sclpositions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The times record carried alongside every value through the pipeline.
///
/// Passed by value everywhere, so a derivation for one sample can never
/// leak back into the record of another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Times {
    /// Measurement time in T-ticks, if known.
    pub measurement: Option<i64>,

    /// Sensor-set-buffer (server receive) time in T-ticks, if known.
    pub sensorsetbuffer: Option<i64>,
}

/// Key for per-stream state: one device, one attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompoundId {
    pub device: u64,
    pub field: &'static str,
}

impl CompoundId {
    pub fn new(device: u64, field: &'static str) -> Self {
        CompoundId { device, field }
    }
}

impl fmt::Display for CompoundId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.device, self.field)
    }
}

/// A single attribute update addressed to one DCM collection.
///
/// Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub coll: Collection,
    pub id: String,
    pub attr: String,
    pub value: Value,
    pub times: Times,
}

impl Patch {
    /// The wire form sent over a DCM patch websocket: a single-element
    /// JSON array holding one `replace` operation.
    pub fn to_message(&self) -> String {
        serde_json::json!([{
            "op": "replace",
            "path": format!("/{}/{}", self.id, self.attr),
            "value": self.value,
            "times": self.times,
        }])
        .to_string()
    }
}

/// Everything one inbound message produced: live-attribute patches in
/// emission order, plus any history chunks whose close policy the message
/// satisfied.
#[derive(Debug, Default)]
pub struct Translated {
    pub patches: Vec<Patch>,
    pub chunks: Vec<HistoryChunk>,
}

/// An inbound bus message failed to parse.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON from the bus: {0}")]
    Json(#[from] serde_json::Error),
}

/// A recognized LoLaN key carried a payload its decoder cannot handle.
///
/// Reported per decoder at the registry boundary; other decoders of the
/// same message still run.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("required key '{0}' is missing")]
    MissingKey(&'static str),

    #[error("unexpected payload shape under '{0}'")]
    BadShape(&'static str),

    #[error("invalid time-series payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("sample carries no timestamp but the payload declares a timestamp encoding")]
    MissingSampleTimestamp,
}

/// The translator engine.
///
/// Owns all mutable pipeline state: the clock-synchronization anchor, the
/// per-stream latest-time registry, the duplicate-suppression window, the
/// history chunk buffer and the per-device tick-count anchors. Feed it raw
/// bus payloads with [`Translator::process_bdcl`] and
/// [`Translator::process_scl`]; it returns the patches and history chunks
/// to forward.
pub struct Translator {
    pub(crate) clock: ClockSync,
    pub(crate) latest: LatestTimes,
    pub(crate) dedup: DedupWindow,
    pub(crate) chunks: ChunkBuffer,
    pub(crate) ticks: HashMap<u64, TickAnchors>,

    /// Synthetic scan counter for BLE scan data (wraps at 256).
    pub(crate) scan_counter: u8,
}

impl Translator {
    pub fn new() -> Self {
        Translator {
            clock: ClockSync::new(),
            latest: LatestTimes::new(),
            dedup: DedupWindow::new(),
            chunks: ChunkBuffer::new(),
            ticks: HashMap::new(),
            scan_counter: 0,
        }
    }
}

impl Default for Translator {
    fn default() -> Self {
        Translator::new()
    }
}
