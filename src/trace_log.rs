//! Congestion-control trace log parsing.
//!
//! The GCC module logs free-form text on stderr. Two line shapes carry
//! data: the delay-rate-controller state dump and the send-side bandwidth
//! estimator target dump. Each line is matched against the state pattern
//! first, then the target pattern; everything else is skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use tracing::debug;

/// Trace lines log only a time of day; samples are anchored to this date,
/// so chronological comparisons are meaningful within a single run only.
static REFERENCE_DATE: LazyLock<NaiveDate> =
    LazyLock::new(|| NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid reference date"));

/// Delay-rate-controller state line. Compiled once at first use.
static ESTIMATOR_STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"TRACE: (\d{2}:\d{2}:\d{2}\.\d{6}).* ts=(\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\.\d{6}), seq=(\d+), size=(\d+), interArrivalTime=(\d+), interDepartureTime=(\d+), interGroupDelay=(-?\d+), estimate=(-?\d+\.\d+), threshold=(\d+\.\d+), usage=(-?\d+), state=(-?\d+)",
    )
    .expect("invalid estimator state pattern")
});

/// Send-side bandwidth estimator target line. Compiled once at first use.
static RATE_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"TRACE: (\d{2}:\d{2}:\d{2}\.\d{6}).* rtt=(\d+), delivered=(\d+), lossTarget=(\d+), delayTarget=(\d+), target=(\d+)",
    )
    .expect("invalid rate target pattern")
});

/// One delay-rate-controller internal-state observation.
#[derive(Debug, Clone)]
pub struct EstimatorStateSample {
    pub time: NaiveDateTime,
    /// Secondary timestamp embedded in the message, kept as raw text.
    pub ts: String,
    pub seq: u64,
    pub size: u64,
    pub inter_arrival_time: i64,
    pub inter_departure_time: i64,
    pub inter_group_delay: i64,
    pub estimate: f64,
    pub threshold: f64,
    /// Ternary overuse signal, raw from the log (-1/0/1).
    pub usage: i64,
    /// Ternary controller state, raw from the log (-1/0/1).
    pub state: i64,
}

/// One send-side bandwidth estimator output.
#[derive(Debug, Clone)]
pub struct RateTargetSample {
    pub time: NaiveDateTime,
    pub rtt_ns: u64,
    pub delivered: u64,
    pub loss_target: u64,
    pub delay_target: u64,
    pub target: u64,
}

/// A trace line successfully matched to one of the known shapes.
#[derive(Debug)]
pub enum TraceRecord {
    EstimatorState(EstimatorStateSample),
    RateTarget(RateTargetSample),
}

/// Both sample tables accumulated from one trace log, in file order.
#[derive(Debug, Default)]
pub struct TraceLog {
    pub estimator: Vec<EstimatorStateSample>,
    pub targets: Vec<RateTargetSample>,
}

/// Parse a trace log. Lines matching neither pattern contribute nothing.
pub fn read_trace_log(path: &Path) -> Result<TraceLog> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut log = TraceLog::default();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        match parse_line(&line) {
            Some(TraceRecord::EstimatorState(sample)) => log.estimator.push(sample),
            Some(TraceRecord::RateTarget(sample)) => log.targets.push(sample),
            None => {}
        }
    }

    debug!(
        path = %path.display(),
        estimator = log.estimator.len(),
        targets = log.targets.len(),
        "parsed trace log"
    );
    Ok(log)
}

/// Try the state pattern, then the target pattern, else skip the line.
pub fn parse_line(line: &str) -> Option<TraceRecord> {
    if let Some(caps) = ESTIMATOR_STATE_RE.captures(line) {
        return Some(TraceRecord::EstimatorState(EstimatorStateSample {
            time: time_of_day(&caps[1])?,
            ts: caps[2].to_string(),
            seq: caps[3].parse().ok()?,
            size: caps[4].parse().ok()?,
            inter_arrival_time: caps[5].parse().ok()?,
            inter_departure_time: caps[6].parse().ok()?,
            inter_group_delay: caps[7].parse().ok()?,
            estimate: caps[8].parse().ok()?,
            threshold: caps[9].parse().ok()?,
            usage: caps[10].parse().ok()?,
            state: caps[11].parse().ok()?,
        }));
    }
    if let Some(caps) = RATE_TARGET_RE.captures(line) {
        return Some(TraceRecord::RateTarget(RateTargetSample {
            time: time_of_day(&caps[1])?,
            rtt_ns: caps[2].parse().ok()?,
            delivered: caps[3].parse().ok()?,
            loss_target: caps[4].parse().ok()?,
            delay_target: caps[5].parse().ok()?,
            target: caps[6].parse().ok()?,
        }));
    }
    None
}

fn time_of_day(tod: &str) -> Option<NaiveDateTime> {
    let time = NaiveTime::parse_from_str(tod, "%H:%M:%S%.f").ok()?;
    Some(REFERENCE_DATE.and_time(time))
}
