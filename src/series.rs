//! Metric derivation.
//!
//! Pure, stateless transforms from parsed tables to the time series the
//! chart panels draw. Empty inputs yield empty series without error.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime};

use crate::event_log::{EventLog, LatencyRecord, LossRecord, PacketEvent, RtpEvent};
use crate::trace_log::{EstimatorStateSample, RateTargetSample, TraceLog};

/// A derived time series of (timestamp, value) points.
pub type Series = Vec<(NaiveDateTime, f64)>;

/// The source instrumentation logs one in five RTP packets; derived rates
/// multiply observed bits back up to compensate.
pub const RATE_SAMPLING_COMPENSATION: f64 = 5.0;

/// Converts the delay estimator's native per-unit-time basis to the
/// per-minute curve drawn for visual comparison against the threshold band.
pub const ESTIMATE_DISPLAY_SCALE: f64 = 60.0;

/// Resampling window for send/receive rates, in milliseconds.
pub const RATE_BUCKET_MS: i64 = 200;

/// Resampling window for the loss ratio, in milliseconds.
pub const LOSS_BUCKET_MS: i64 = 1_000;

/// Message marking a codec target-bitrate change in the structured log.
const CODEC_TARGET_MSG: &str = "setting codec target bitrate";

/// Ternary estimator signal. The mapping is total over {-1, 0, 1}; any
/// other logged value is an error rather than a blank label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    OverDecrease,
    HoldNormal,
    UnderIncrease,
}

impl Signal {
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(Signal::OverDecrease),
            0 => Ok(Signal::HoldNormal),
            1 => Ok(Signal::UnderIncrease),
            other => bail!("unexpected ternary signal value {other}"),
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Signal::OverDecrease => -1.0,
            Signal::HoldNormal => 0.0,
            Signal::UnderIncrease => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Signal::OverDecrease => "over / decrease",
            Signal::HoldNormal => "hold / normal",
            Signal::UnderIncrease => "under / increase",
        }
    }

    /// Axis-tick label for a numeric position. Ticks between the ternary
    /// levels stay unlabeled.
    pub fn label_at(value: f64) -> &'static str {
        for signal in [Signal::OverDecrease, Signal::HoldNormal, Signal::UnderIncrease] {
            if (value - signal.value()).abs() < 1e-6 {
                return signal.label();
            }
        }
        ""
    }
}

/// Loss-target / delay-target / combined target, all in bits/s.
#[derive(Debug, Default)]
pub struct TargetRateSeries {
    pub loss_target: Series,
    pub delay_target: Series,
    pub target: Series,
}

/// The delay estimator's raw internals, all on a seconds axis.
#[derive(Debug, Default)]
pub struct EstimateSeries {
    pub inter_group_delay: Series,
    pub estimate: Series,
    pub scaled_estimate: Series,
    pub threshold: Series,
    pub neg_threshold: Series,
}

/// Everything one run's panels draw.
#[derive(Debug)]
pub struct RunSeries {
    pub send_rate: Series,
    pub recv_rate: Series,
    pub codec_target: Series,
    pub gcc_targets: TargetRateSeries,
    pub latency: Series,
    pub estimates: EstimateSeries,
    pub usage: Series,
    pub state: Series,
    pub rtt: Series,
    pub loss_ratio: Series,
}

impl RunSeries {
    pub fn derive(events: &EventLog, trace: &TraceLog) -> Result<RunSeries> {
        Ok(RunSeries {
            send_rate: rate_series(&events.rtp_tx),
            recv_rate: rate_series(&events.rtp_rx),
            codec_target: target_bitrate_series(&events.events),
            gcc_targets: target_rate_series(&trace.targets),
            latency: latency_series(&events.latency),
            estimates: estimate_series(&trace.estimator),
            usage: usage_series(&trace.estimator)?,
            state: state_series(&trace.estimator)?,
            rtt: rtt_series(&trace.targets),
            loss_ratio: loss_ratio_series(&events.loss),
        })
    }
}

/// Observed bits summed into fixed windows, compensated for sub-sampling.
/// Empty windows inside the observed span count as zero.
pub fn rate_series(events: &[RtpEvent]) -> Series {
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for event in events {
        let bucket = floor_to_bucket(event.time, RATE_BUCKET_MS);
        *buckets.entry(bucket).or_default() += event.bits as f64 * RATE_SAMPLING_COMPENSATION;
    }

    let (Some((&first, _)), Some((&last, _))) =
        (buckets.first_key_value(), buckets.last_key_value())
    else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut ms = first;
    while ms <= last {
        series.push((bucket_start(ms), buckets.get(&ms).copied().unwrap_or(0.0)));
        ms += RATE_BUCKET_MS;
    }
    series
}

/// Codec target-bitrate changes, unresampled.
pub fn target_bitrate_series(events: &[PacketEvent]) -> Series {
    events
        .iter()
        .filter(|e| e.msg == CODEC_TARGET_MSG)
        .filter_map(|e| e.rate.map(|rate| (e.time, rate as f64)))
        .collect()
}

/// Lost / total per window. Windows with no observations yield no point.
pub fn loss_ratio_series(loss: &[LossRecord]) -> Series {
    let mut buckets: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    for record in loss {
        let bucket = floor_to_bucket(record.time, LOSS_BUCKET_MS);
        let (lost, total) = buckets.entry(bucket).or_insert((0, 0));
        if record.lost {
            *lost += 1;
        }
        *total += 1;
    }
    buckets
        .into_iter()
        .map(|(ms, (lost, total))| (bucket_start(ms), lost as f64 / total as f64))
        .collect()
}

/// Raw (send time, one-way delay) pairs.
pub fn latency_series(latency: &[LatencyRecord]) -> Series {
    latency.iter().map(|l| (l.send_time, l.delay)).collect()
}

/// Usage sign is negated: the estimator logs positive usage for a decrease
/// signal, which is displayed negative.
pub fn usage_series(samples: &[EstimatorStateSample]) -> Result<Series> {
    samples
        .iter()
        .map(|s| Ok((s.time, -Signal::from_raw(s.usage)?.value())))
        .collect()
}

pub fn state_series(samples: &[EstimatorStateSample]) -> Result<Series> {
    samples
        .iter()
        .map(|s| Ok((s.time, Signal::from_raw(s.state)?.value())))
        .collect()
}

/// Round-trip time in seconds.
pub fn rtt_series(samples: &[RateTargetSample]) -> Series {
    samples
        .iter()
        .map(|s| (s.time, s.rtt_ns as f64 * 1e-9))
        .collect()
}

pub fn target_rate_series(samples: &[RateTargetSample]) -> TargetRateSeries {
    let mut series = TargetRateSeries::default();
    for sample in samples {
        series.loss_target.push((sample.time, sample.loss_target as f64));
        series
            .delay_target
            .push((sample.time, sample.delay_target as f64));
        series.target.push((sample.time, sample.target as f64));
    }
    series
}

/// Inter-group delay is logged in milliseconds and scaled to seconds; the
/// estimate is kept as-is and also drawn scaled for threshold comparison.
pub fn estimate_series(samples: &[EstimatorStateSample]) -> EstimateSeries {
    let mut series = EstimateSeries::default();
    for sample in samples {
        series
            .inter_group_delay
            .push((sample.time, sample.inter_group_delay as f64 * 1e-3));
        series.estimate.push((sample.time, sample.estimate));
        series
            .scaled_estimate
            .push((sample.time, sample.estimate * ESTIMATE_DISPLAY_SCALE));
        series.threshold.push((sample.time, sample.threshold));
        series.neg_threshold.push((sample.time, -sample.threshold));
    }
    series
}

/// Expand a sampled series into post-step points, holding each value until
/// the next sample.
pub fn step_points(series: &[(NaiveDateTime, f64)]) -> Series {
    let mut points = Vec::with_capacity(series.len() * 2);
    for window in series.windows(2) {
        points.push(window[0]);
        points.push((window[1].0, window[0].1));
    }
    if let Some(&last) = series.last() {
        points.push(last);
    }
    points
}

fn floor_to_bucket(time: NaiveDateTime, width_ms: i64) -> i64 {
    let ms = time.and_utc().timestamp_millis();
    ms - ms.rem_euclid(width_ms)
}

fn bucket_start(ms: i64) -> NaiveDateTime {
    DateTime::from_timestamp_millis(ms)
        .expect("bucket start within datetime range")
        .naive_utc()
}
