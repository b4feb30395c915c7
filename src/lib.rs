//! Offline chart generation for RTP bandwidth-estimation simulations.
//!
//! A run pairs a structured `.jsonl` packet-event log with the GCC
//! `.stderr` trace log sharing its filename stem. Each run is parsed into
//! tables, derived into panel series, and rendered as one seven-panel PNG;
//! runs are independent and processed in parallel on a worker pool.

pub mod chart;
pub mod event_log;
pub mod runs;
pub mod series;
pub mod trace_log;
