//! Per-stream latest-time tracking, duplicate suppression and the chunk
//! buffer feeding the long-term history store.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::clock::ClockSync;
use crate::{CompoundId, Times};

/// Minimum target chunk size for the long-term store.
pub const CHUNK_SIZE_MIN: usize = 10;

/// Chunk close timeout once the record count has reached
/// [`CHUNK_SIZE_MIN`].
pub const CHUNK_CLOSE_TIMEOUT_NORMAL_SEC: f64 = 60.0;

/// Hard chunk close limit: close after this long even with fewer records.
pub const CHUNK_CLOSE_TIME_LIMIT_SEC: f64 = 600.0;

/// Interval for trimming aged-out entries from the dedup window.
pub const DEDUP_CLEANUP_INTERVAL_SEC: f64 = 60.0;

/// Largest measurement time ever admitted per stream.
///
/// Gates the live-attribute path: only strictly newer samples are emitted.
/// Entries are never evicted (bounded by the device population).
#[derive(Debug, Default)]
pub(crate) struct LatestTimes {
    latest: HashMap<CompoundId, i64>,
}

impl LatestTimes {
    pub fn new() -> Self {
        LatestTimes::default()
    }

    /// Returns `true` iff `meas_time` is strictly newer than anything seen
    /// for this stream, recording it if so.
    pub fn check_and_update(&mut self, id: CompoundId, meas_time: i64) -> bool {
        match self.latest.get(&id) {
            Some(stored) if *stored >= meas_time => false,
            _ => {
                self.latest.insert(id, meas_time);
                true
            }
        }
    }
}

/// Recently buffered (stream, measurement time) pairs.
///
/// Bounds duplicate history records across retries and replays from the
/// BDCL; aged-out pairs are trimmed periodically.
#[derive(Debug)]
pub(crate) struct DedupWindow {
    seen: HashSet<(CompoundId, i64)>,
    last_cleanup: f64,
}

impl DedupWindow {
    pub fn new() -> Self {
        DedupWindow {
            seen: HashSet::new(),
            last_cleanup: 0.0,
        }
    }

    /// Returns `true` if the pair was absent, inserting it.
    pub fn try_insert(&mut self, id: CompoundId, meas_time: i64) -> bool {
        self.seen.insert((id, meas_time))
    }

    /// Drop pairs that no longer fit the buffering window. Runs at most
    /// once per [`DEDUP_CLEANUP_INTERVAL_SEC`].
    pub fn maybe_trim(&mut self, clock: &ClockSync, now: f64) {
        if now - self.last_cleanup >= DEDUP_CLEANUP_INTERVAL_SEC {
            self.seen.retain(|(_, meas_time)| clock.not_too_old(*meas_time, now));
            self.last_cleanup = now;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Debug)]
struct ChunkRecord {
    device: u64,
    field: &'static str,
    value: Value,
    times: Times,
}

/// One history entry: a buffered sample with its timing context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub dcm_time: i64,
    pub measurement_time: i64,
    pub sensorsetbuffer_time: Option<i64>,
    pub value: Value,
}

/// All buffered changes of one device within a chunk, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceChanges {
    pub id: u64,
    pub changes: Vec<HistoryEntry>,
}

/// One field's worth of a closed chunk, ready for the history store.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryChunk {
    /// The attribute field all grouped records share.
    pub field: &'static str,

    /// Per-device change lists, in first-appearance order.
    pub groups: Vec<DeviceChanges>,
}

/// Accumulates accepted samples and closes them into chunks under a
/// size-or-age policy.
///
/// Admission is independent of the live-attribute latest-time gate, so the
/// history may contain out-of-order samples that were never emitted live.
#[derive(Debug)]
pub(crate) struct ChunkBuffer {
    records: Vec<ChunkRecord>,
    window_start: f64,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        ChunkBuffer {
            records: Vec::new(),
            window_start: f64::INFINITY,
        }
    }

    /// Admit a sample unless it is too old or already buffered within the
    /// dedup window. Opens a collection window when the buffer was empty.
    pub fn add(
        &mut self,
        dedup: &mut DedupWindow,
        clock: &ClockSync,
        id: CompoundId,
        value: Value,
        times: Times,
        now: f64,
    ) {
        let meas_time = match times.measurement {
            Some(m) => m,
            None => return,
        };
        if !clock.not_too_old(meas_time, now) {
            return;
        }
        if !dedup.try_insert(id, meas_time) {
            return;
        }
        if self.records.is_empty() {
            self.window_start = now;
        }
        self.records.push(ChunkRecord {
            device: id.device,
            field: id.field,
            value,
            times,
        });
    }

    /// Close the current window if its policy is satisfied.
    ///
    /// Triggered once records exist and the normal timeout has elapsed;
    /// actually emits when the record count has reached the minimum chunk
    /// size, or unconditionally once the hard limit has elapsed. Grouping
    /// is by field, then by device, preserving insertion order within each
    /// group.
    pub fn maybe_flush(&mut self, now: f64) -> Vec<HistoryChunk> {
        if self.records.is_empty() || now < self.window_start + CHUNK_CLOSE_TIMEOUT_NORMAL_SEC {
            return Vec::new();
        }
        if self.records.len() < CHUNK_SIZE_MIN && now < self.window_start + CHUNK_CLOSE_TIME_LIMIT_SEC
        {
            return Vec::new();
        }

        let mut grouped: IndexMap<&'static str, IndexMap<u64, Vec<HistoryEntry>>> = IndexMap::new();
        for record in self.records.drain(..) {
            let meas_time = record.times.measurement.unwrap_or(0);
            grouped
                .entry(record.field)
                .or_default()
                .entry(record.device)
                .or_default()
                .push(HistoryEntry {
                    dcm_time: meas_time,
                    measurement_time: meas_time,
                    sensorsetbuffer_time: record.times.sensorsetbuffer,
                    value: record.value,
                });
        }
        self.window_start = f64::INFINITY;

        grouped
            .into_iter()
            .map(|(field, devices)| HistoryChunk {
                field,
                groups: devices
                    .into_iter()
                    .map(|(id, changes)| DeviceChanges { id, changes })
                    .collect(),
            })
            .collect()
    }
}
