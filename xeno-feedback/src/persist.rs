//! Binary snapshot format for feedback data.
//!
//! Layout (little-endian): `version: u32`, last-update seconds `u64` +
//! nanos `u32`, outcome count `u32` followed by outcome records, series
//! count `u32` followed by named series. Optionally zlib-compressed;
//! compression is detected by the `0x78 01/9C/DA` magic.

use crate::error::FeedbackError;
use crate::store::PersistenceConfig;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xeno_transport::CommunicationOutcome;
use xeno_wire::{Reader, Writer};

pub const SNAPSHOT_VERSION: u32 = 1;
const DATA_FILE: &str = "feedback.bin";

type MetricSeries = BTreeMap<String, Vec<(SystemTime, f64)>>;

fn put_system_time(w: &mut Writer, at: SystemTime) {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    w.put_u64(since_epoch.as_secs());
    w.put_u32(since_epoch.subsec_nanos());
}

fn read_system_time(r: &mut Reader<'_>) -> Result<SystemTime, FeedbackError> {
    let secs = r.read_u64().map_err(|e| FeedbackError::Format(e.to_string()))?;
    let nanos = r.read_u32().map_err(|e| FeedbackError::Format(e.to_string()))?;
    Ok(UNIX_EPOCH + Duration::new(secs, nanos))
}

pub fn encode_snapshot(
    outcomes: &VecDeque<CommunicationOutcome>,
    metrics: &BTreeMap<String, VecDeque<(SystemTime, f64)>>,
    last_update: SystemTime,
) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(SNAPSHOT_VERSION);
    put_system_time(&mut w, last_update);

    w.put_u32(outcomes.len() as u32);
    for outcome in outcomes {
        w.put_u8(outcome.success as u8);
        w.put_u64(outcome.latency.as_micros() as u64);
        w.put_u32(outcome.bytes_transferred);
        w.put_u32(outcome.retry_count);
        w.put_u32(outcome.error_count);
        match &outcome.error_type {
            Some(error_type) => {
                w.put_u8(1);
                w.put_string(error_type);
            }
            None => w.put_u8(0),
        }
        put_system_time(&mut w, outcome.timestamp);
    }

    w.put_u32(metrics.len() as u32);
    for (name, series) in metrics {
        w.put_string(name);
        w.put_u32(series.len() as u32);
        for (at, value) in series {
            put_system_time(&mut w, *at);
            w.put_f64(*value);
        }
    }
    w.into_inner()
}

pub fn decode_snapshot(
    bytes: &[u8],
) -> Result<(Vec<CommunicationOutcome>, MetricSeries, SystemTime), FeedbackError> {
    let format = |e: xeno_wire::WireError| FeedbackError::Format(e.to_string());
    let mut r = Reader::new(bytes);
    let version = r.read_u32().map_err(format)?;
    if version != SNAPSHOT_VERSION {
        return Err(FeedbackError::Format(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let last_update = read_system_time(&mut r)?;

    let outcome_count = r.read_u32().map_err(format)? as usize;
    let mut outcomes = Vec::with_capacity(outcome_count.min(1 << 20));
    for _ in 0..outcome_count {
        let success = r.read_u8().map_err(format)? != 0;
        let latency = Duration::from_micros(r.read_u64().map_err(format)?);
        let bytes_transferred = r.read_u32().map_err(format)?;
        let retry_count = r.read_u32().map_err(format)?;
        let error_count = r.read_u32().map_err(format)?;
        let error_type = if r.read_u8().map_err(format)? != 0 {
            Some(r.read_string("error type").map_err(format)?)
        } else {
            None
        };
        let timestamp = read_system_time(&mut r)?;
        outcomes.push(CommunicationOutcome {
            success,
            latency,
            bytes_transferred,
            retry_count,
            error_count,
            error_type,
            timestamp,
        });
    }

    let series_count = r.read_u32().map_err(format)? as usize;
    let mut metrics = BTreeMap::new();
    for _ in 0..series_count {
        let name = r.read_string("metric name").map_err(format)?;
        let point_count = r.read_u32().map_err(format)? as usize;
        let mut series = Vec::with_capacity(point_count.min(1 << 20));
        for _ in 0..point_count {
            let at = read_system_time(&mut r)?;
            let value = r.read_f64().map_err(format)?;
            series.push((at, value));
        }
        metrics.insert(name, series);
    }
    r.expect_end().map_err(format)?;
    Ok((outcomes, metrics, last_update))
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, FeedbackError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// True when the buffer starts with a zlib stream header.
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x78 && matches!(bytes[1], 0x01 | 0x9C | 0xDA)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, FeedbackError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn data_path(config: &PersistenceConfig) -> PathBuf {
    config.data_dir.join(DATA_FILE)
}

pub fn write_snapshot(
    config: &PersistenceConfig,
    snapshot: &[u8],
) -> Result<(), FeedbackError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let bytes = if config.compress {
        compress(snapshot)?
    } else {
        snapshot.to_vec()
    };
    if bytes.len() as u64 > config.max_storage_bytes {
        return Err(FeedbackError::Format(format!(
            "snapshot of {} bytes exceeds the {} byte storage bound",
            bytes.len(),
            config.max_storage_bytes
        )));
    }
    std::fs::write(data_path(config), bytes)?;
    Ok(())
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, FeedbackError> {
    let raw = std::fs::read(path)?;
    if is_compressed(&raw) {
        decompress(&raw)
    } else {
        Ok(raw)
    }
}

pub fn read_snapshot(
    config: &PersistenceConfig,
) -> Result<(Vec<CommunicationOutcome>, MetricSeries, SystemTime), FeedbackError> {
    let bytes = read_file(&data_path(config))?;
    decode_snapshot(&bytes)
}

pub fn create_backup(
    config: &PersistenceConfig,
    now: SystemTime,
) -> Result<String, FeedbackError> {
    let source = data_path(config);
    if !source.exists() {
        return Err(FeedbackError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no snapshot to back up",
        )));
    }
    let stamp = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let mut name = format!("feedback-{stamp}.bak");
    let mut counter = 1;
    while config.data_dir.join(&name).exists() {
        name = format!("feedback-{stamp}-{counter}.bak");
        counter += 1;
    }
    std::fs::copy(&source, config.data_dir.join(&name))?;
    prune_backups(config)?;
    Ok(name)
}

pub fn list_backups(config: &PersistenceConfig) -> Result<Vec<String>, FeedbackError> {
    let mut backups = Vec::new();
    if !config.data_dir.exists() {
        return Ok(backups);
    }
    for entry in std::fs::read_dir(&config.data_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("feedback-") && name.ends_with(".bak") {
            backups.push(name);
        }
    }
    backups.sort();
    Ok(backups)
}

pub fn read_backup(
    config: &PersistenceConfig,
    name: &str,
) -> Result<(Vec<CommunicationOutcome>, MetricSeries, SystemTime), FeedbackError> {
    let path = config.data_dir.join(name);
    if !path.exists() {
        return Err(FeedbackError::BackupNotFound(name.to_string()));
    }
    let bytes = read_file(&path)?;
    decode_snapshot(&bytes)
}

/// Deletes the oldest backups beyond `max_backups`. Returns how many
/// were removed.
pub fn prune_backups(config: &PersistenceConfig) -> Result<usize, FeedbackError> {
    let backups = list_backups(config)?;
    if backups.len() <= config.max_backups {
        return Ok(0);
    }
    let excess = backups.len() - config.max_backups;
    for name in backups.iter().take(excess) {
        std::fs::remove_file(config.data_dir.join(name))?;
        tracing::debug!("pruned feedback backup {name}");
    }
    Ok(excess)
}

pub fn storage_size(config: &PersistenceConfig) -> Result<u64, FeedbackError> {
    let mut total = 0;
    if !config.data_dir.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(&config.data_dir)? {
        total += entry?.metadata()?.len();
    }
    Ok(total)
}
