//! Structured per-packet event log parsing.
//!
//! The simulation writes one JSON object per line. RTP send/receive events
//! are correlated on the unwrapped sequence number to derive per-packet
//! latency and loss tables. All tables are read-only after construction.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

/// One line of the structured log as written by the transport under test.
/// Fields not present on a given message kind stay `None`; unknown fields
/// are ignored.
#[derive(Debug, Deserialize)]
struct RawEvent {
    time: String,
    msg: String,
    #[serde(rename = "vantage-point")]
    vantage_point: Option<String>,
    #[serde(rename = "payload-size")]
    payload_size: Option<u64>,
    #[serde(rename = "unwrapped-sequence-number")]
    sequence: Option<i64>,
    rate: Option<u64>,
}

/// One observed network event.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub time: NaiveDateTime,
    pub msg: String,
    pub vantage_point: Option<String>,
    pub payload_size: Option<u64>,
    /// `payload-size * 8`, present whenever the payload size is.
    pub bits: Option<u64>,
    pub sequence: Option<i64>,
    /// Target bitrate in bits/s, present on codec-target messages only.
    pub rate: Option<u64>,
}

/// An RTP packet observation reduced to the fields RTP rows populate.
#[derive(Debug, Clone, Copy)]
pub struct RtpEvent {
    pub time: NaiveDateTime,
    pub sequence: i64,
    pub bits: u64,
}

/// A sender/receiver event pair matched on sequence number.
#[derive(Debug, Clone, Copy)]
pub struct LatencyRecord {
    pub send_time: NaiveDateTime,
    pub recv_time: NaiveDateTime,
    /// One-way delay in seconds.
    pub delay: f64,
}

/// Per-sent-packet delivery flag. Every sent sequence number yields exactly
/// one record; `lost` is set iff no receiver event shares the sequence.
#[derive(Debug, Clone, Copy)]
pub struct LossRecord {
    pub time: NaiveDateTime,
    pub sequence: i64,
    pub lost: bool,
}

/// Parsed structured log with its RTP subsets and derived join tables.
#[derive(Debug)]
pub struct EventLog {
    /// File stem; names the run and its output image.
    pub name: String,
    pub events: Vec<PacketEvent>,
    pub rtp_tx: Vec<RtpEvent>,
    pub rtp_rx: Vec<RtpEvent>,
    pub latency: Vec<LatencyRecord>,
    pub loss: Vec<LossRecord>,
}

/// Parse a structured log file. A malformed line fails the whole file.
pub fn read_event_log(path: &Path) -> Result<EventLog> {
    let name = path
        .file_stem()
        .and_then(OsStr::to_str)
        .with_context(|| format!("no usable file stem in {}", path.display()))?
        .to_owned();

    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut events = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed event", path.display(), lineno + 1))?;
        let event = raw
            .into_event()
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        events.push(event);
    }

    let rtp_tx = rtp_subset(&events, "sender")?;
    let rtp_rx = rtp_subset(&events, "receiver")?;
    let (latency, loss) = join_rtp(&rtp_tx, &rtp_rx);

    Ok(EventLog {
        name,
        events,
        rtp_tx,
        rtp_rx,
        latency,
        loss,
    })
}

impl RawEvent {
    fn into_event(self) -> Result<PacketEvent> {
        let time = parse_mixed_time(&self.time)?;
        Ok(PacketEvent {
            time,
            msg: self.msg,
            vantage_point: self.vantage_point,
            payload_size: self.payload_size,
            bits: self.payload_size.map(|size| size * 8),
            sequence: self.sequence,
            rate: self.rate,
        })
    }
}

/// The simulator mixes RFC 3339 stamps and bare date-times within one file.
/// Offsets are dropped keeping wall-clock time, so every row lands on the
/// same timezone-naive axis.
pub fn parse_mixed_time(s: &str) -> Result<NaiveDateTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t);
        }
    }
    bail!("unrecognized timestamp format: {s:?}")
}

/// Signed seconds from `earlier` to `later`.
pub fn seconds_between(later: NaiveDateTime, earlier: NaiveDateTime) -> f64 {
    let delta = later - earlier;
    delta
        .num_microseconds()
        .map(|us| us as f64 * 1e-6)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 * 1e-3)
}

fn rtp_subset(events: &[PacketEvent], vantage: &str) -> Result<Vec<RtpEvent>> {
    events
        .iter()
        .filter(|e| e.msg == "rtp" && e.vantage_point.as_deref() == Some(vantage))
        .map(|e| {
            let sequence = e.sequence.with_context(|| {
                format!("rtp event at {} missing unwrapped-sequence-number", e.time)
            })?;
            let bits = e
                .bits
                .with_context(|| format!("rtp event at {} missing payload-size", e.time))?;
            Ok(RtpEvent {
                time: e.time,
                sequence,
                bits,
            })
        })
        .collect()
}

/// Inner-join sender onto receiver for latency, left-join for loss.
fn join_rtp(tx: &[RtpEvent], rx: &[RtpEvent]) -> (Vec<LatencyRecord>, Vec<LossRecord>) {
    let rx_by_seq: HashMap<i64, NaiveDateTime> =
        rx.iter().map(|e| (e.sequence, e.time)).collect();

    let mut latency = Vec::new();
    let mut loss = Vec::with_capacity(tx.len());
    for sent in tx {
        match rx_by_seq.get(&sent.sequence) {
            Some(&recv_time) => {
                latency.push(LatencyRecord {
                    send_time: sent.time,
                    recv_time,
                    delay: seconds_between(recv_time, sent.time),
                });
                loss.push(LossRecord {
                    time: sent.time,
                    sequence: sent.sequence,
                    lost: false,
                });
            }
            None => loss.push(LossRecord {
                time: sent.time,
                sequence: sent.sequence,
                lost: true,
            }),
        }
    }
    (latency, loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dt(s: &str) -> NaiveDateTime {
        parse_mixed_time(s).unwrap()
    }

    fn rtp(time: &str, sequence: i64, bits: u64) -> RtpEvent {
        RtpEvent {
            time: dt(time),
            sequence,
            bits,
        }
    }

    #[test]
    fn test_mixed_time_formats() {
        let plain = dt("2024-03-01T10:00:00.250");
        let spaced = dt("2024-03-01 10:00:00.250");
        let rfc3339 = dt("2024-03-01T10:00:00.250+00:00");
        assert_eq!(plain, spaced);
        assert_eq!(plain, rfc3339);
        assert!(parse_mixed_time("yesterday").is_err());
    }

    #[test]
    fn test_matched_pairs_yield_latency_and_no_loss() {
        let tx = vec![rtp("2024-03-01T10:00:00", 1, 800), rtp("2024-03-01T10:00:01", 2, 800)];
        let rx = vec![
            rtp("2024-03-01T10:00:00.050", 1, 800),
            rtp("2024-03-01T10:00:01.070", 2, 800),
        ];
        let (latency, loss) = join_rtp(&tx, &rx);
        assert_eq!(latency.len(), 2);
        assert!((latency[0].delay - 0.050).abs() < 1e-9);
        assert!((latency[1].delay - 0.070).abs() < 1e-9);
        assert_eq!(loss.len(), 2);
        assert!(loss.iter().all(|l| !l.lost));
    }

    #[test]
    fn test_sender_only_sequence_is_lost() {
        let tx = vec![rtp("2024-03-01T10:00:00", 1, 800), rtp("2024-03-01T10:00:01", 2, 800)];
        let rx = vec![rtp("2024-03-01T10:00:00.050", 1, 800)];
        let (latency, loss) = join_rtp(&tx, &rx);
        assert_eq!(latency.len(), 1);
        assert_eq!(loss.len(), 2);
        assert!(!loss[0].lost);
        assert!(loss[1].lost);
        assert_eq!(loss[1].sequence, 2);
    }

    #[test]
    fn test_read_event_log_partitions_and_joins() {
        let mut file = tempfile::Builder::new()
            .suffix(".jsonl")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"{{"time":"2024-03-01T10:00:00.000","msg":"rtp","vantage-point":"sender","payload-size":100,"unwrapped-sequence-number":1}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"time":"2024-03-01T10:00:00.040","msg":"rtp","vantage-point":"receiver","payload-size":100,"unwrapped-sequence-number":1}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"time":"2024-03-01T10:00:00.100","msg":"setting codec target bitrate","rate":300000}}"#
        )
        .unwrap();

        let log = read_event_log(file.path()).unwrap();
        assert_eq!(log.events.len(), 3);
        assert_eq!(log.rtp_tx.len(), 1);
        assert_eq!(log.rtp_rx.len(), 1);
        assert_eq!(log.rtp_tx[0].bits, 800);
        assert_eq!(log.latency.len(), 1);
        assert_eq!(log.loss.len(), 1);
        assert!(!log.loss[0].lost);
    }

    #[test]
    fn test_malformed_line_fails_the_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".jsonl")
            .tempfile()
            .unwrap();
        writeln!(file, "{{not json").unwrap();
        assert!(read_event_log(file.path()).is_err());
    }
}
