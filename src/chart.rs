//! Chart rendering.
//!
//! Composes one run's derived series into a fixed seven-panel figure and
//! writes it as a single PNG. Panels share an elapsed-time axis: the event
//! log carries real dates while trace lines carry only a time of day, so
//! each time base is anchored at its own first sample.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::event_log::seconds_between;
use crate::series::{step_points, RunSeries, Series, Signal};

/// The canvas is 10x10 inches rasterized at 450 DPI.
const DPI: u32 = 450;
const CANVAS_INCHES: u32 = 10;
const CANVAS_PX: u32 = DPI * CANVAS_INCHES;

const PANELS: usize = 7;
const STROKE_WIDTH: u32 = 1;

const SERIES_COLORS: [RGBColor; 5] = [BLUE, RED, GREEN, MAGENTA, BLACK];

/// Y-axis value formatting for a panel.
enum AxisUnit {
    /// Engineering notation with an SI prefix and the given unit suffix.
    Eng(&'static str),
    /// Dimensionless ratio shown as a percentage.
    Percent,
    /// Categorical labels on the ternary signal band.
    Ternary,
}

struct Curve {
    label: Option<&'static str>,
    points: Vec<(f64, f64)>,
}

struct PanelSpec {
    title: &'static str,
    unit: AxisUnit,
    /// Fixed y-range override; data-driven when absent.
    y_range: Option<(f64, f64)>,
    curves: Vec<Curve>,
}

/// Draw one run's figure to `{output_dir}/{name}.png`, overwriting any
/// existing file of that name.
pub fn render_chart(name: &str, series: &RunSeries, output_dir: &Path) -> Result<PathBuf> {
    let out_path = output_dir.join(format!("{name}.png"));

    let event_origin = min_time([
        &series.send_rate,
        &series.recv_rate,
        &series.codec_target,
        &series.latency,
        &series.loss_ratio,
    ]);
    let trace_origin = min_time([
        &series.gcc_targets.loss_target,
        &series.gcc_targets.delay_target,
        &series.gcc_targets.target,
        &series.estimates.inter_group_delay,
        &series.estimates.estimate,
        &series.estimates.scaled_estimate,
        &series.estimates.threshold,
        &series.estimates.neg_threshold,
        &series.usage,
        &series.state,
        &series.rtt,
    ]);

    let ev = |s: &Series| elapsed(s, event_origin);
    let tr = |s: &Series| elapsed(s, trace_origin);

    let panels = [
        PanelSpec {
            title: "RTP Rates",
            unit: AxisUnit::Eng("b/s"),
            y_range: None,
            curves: vec![
                curve("send rate", ev(&series.send_rate)),
                curve("receive rate", ev(&series.recv_rate)),
                curve("target rate", ev(&series.codec_target)),
            ],
        },
        PanelSpec {
            title: "GCC Target Rates",
            unit: AxisUnit::Eng("b/s"),
            y_range: None,
            curves: vec![
                curve("loss-target", tr(&series.gcc_targets.loss_target)),
                curve("delay-target", tr(&series.gcc_targets.delay_target)),
                curve("target", tr(&series.gcc_targets.target)),
            ],
        },
        PanelSpec {
            title: "E2E Delay",
            unit: AxisUnit::Eng("s"),
            y_range: None,
            curves: vec![unlabeled(ev(&series.latency))],
        },
        PanelSpec {
            title: "GCC Estimates",
            unit: AxisUnit::Eng("s"),
            y_range: None,
            curves: vec![
                curve("inter_group_delay", tr(&series.estimates.inter_group_delay)),
                curve("estimate", tr(&series.estimates.estimate)),
                curve("scaled_estimate", tr(&series.estimates.scaled_estimate)),
                curve("threshold", tr(&series.estimates.threshold)),
                curve("-threshold", tr(&series.estimates.neg_threshold)),
            ],
        },
        PanelSpec {
            title: "GCC Usage and State",
            unit: AxisUnit::Ternary,
            y_range: Some((-1.5, 1.5)),
            curves: vec![
                curve("usage", tr(&step_points(&series.usage))),
                curve("state", tr(&step_points(&series.state))),
            ],
        },
        PanelSpec {
            title: "GCC RTT",
            unit: AxisUnit::Eng("s"),
            y_range: None,
            curves: vec![curve("RTT", tr(&series.rtt))],
        },
        PanelSpec {
            title: "Packet Loss",
            unit: AxisUnit::Percent,
            y_range: None,
            curves: vec![unlabeled(ev(&series.loss_ratio))],
        },
    ];

    let x_max = panels
        .iter()
        .flat_map(|p| p.curves.iter())
        .flat_map(|c| c.points.iter())
        .map(|&(x, _)| x)
        .fold(0.0_f64, f64::max)
        .max(1.0);

    {
        let root = BitMapBackend::new(&out_path, (CANVAS_PX, CANVAS_PX)).into_drawing_area();
        root.fill(&WHITE)?;
        let titled = root.titled(name, ("sans-serif", 50))?;
        let areas = titled.split_evenly((PANELS, 1));

        for (index, (area, panel)) in areas.iter().zip(panels).enumerate() {
            draw_panel(area, panel, x_max, index == PANELS - 1)
                .with_context(|| format!("failed to draw panel {}", index + 1))?;
        }

        root.present()
            .with_context(|| format!("failed to write {}", out_path.display()))?;
    }
    Ok(out_path)
}

fn curve(label: &'static str, points: Vec<(f64, f64)>) -> Curve {
    Curve {
        label: Some(label),
        points,
    }
}

fn unlabeled(points: Vec<(f64, f64)>) -> Curve {
    Curve {
        label: None,
        points,
    }
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: PanelSpec,
    x_max: f64,
    bottom: bool,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let (y_min, y_max) = panel.y_range.unwrap_or_else(|| value_range(&panel.curves));

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(panel.title, ("sans-serif", 42))
        .x_label_area_size(if bottom { 70 } else { 30 })
        .y_label_area_size(150)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    let y_fmt = |v: &f64| format_value(*v, &panel.unit);
    let x_blank = |_: &f64| String::new();

    let mut mesh = chart.configure_mesh();
    mesh.disable_mesh()
        .label_style(("sans-serif", 28))
        .y_label_formatter(&y_fmt);
    if bottom {
        mesh.x_desc("Time [s]");
    } else {
        mesh.x_label_formatter(&x_blank);
    }
    mesh.draw()?;

    let mut has_labels = false;
    for (index, curve) in panel.curves.iter().enumerate() {
        if curve.points.is_empty() {
            continue;
        }
        let color = SERIES_COLORS[index % SERIES_COLORS.len()];
        let drawn = chart.draw_series(LineSeries::new(
            curve.points.iter().copied(),
            color.stroke_width(STROKE_WIDTH),
        ))?;
        if let Some(label) = curve.label {
            drawn.label(label).legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(2))
            });
            has_labels = true;
        }
    }

    if has_labels {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", 28))
            .draw()?;
    }

    Ok(())
}

/// Convert a series to seconds elapsed since its time base's first sample.
fn elapsed(series: &Series, origin: Option<NaiveDateTime>) -> Vec<(f64, f64)> {
    let origin = origin.unwrap_or_else(epoch);
    series
        .iter()
        .map(|&(time, value)| (seconds_between(time, origin), value))
        .collect()
}

fn min_time<'a>(groups: impl IntoIterator<Item = &'a Series>) -> Option<NaiveDateTime> {
    groups
        .into_iter()
        .flatten()
        .map(|&(time, _)| time)
        .min()
}

fn epoch() -> NaiveDateTime {
    DateTime::from_timestamp_millis(0)
        .expect("epoch within datetime range")
        .naive_utc()
}

/// Data-driven y-range with a small margin; flat or empty data gets a unit
/// band so axes still render.
fn value_range(curves: &[Curve]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for curve in curves {
        for &(_, value) in &curve.points {
            min = min.min(value);
            max = max.max(value);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if min == max {
        return (min - 0.5, max + 0.5);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn format_value(value: f64, unit: &AxisUnit) -> String {
    match unit {
        AxisUnit::Eng(suffix) => eng_format(value, suffix),
        AxisUnit::Percent => format!("{}%", trim_decimals(value * 100.0)),
        AxisUnit::Ternary => Signal::label_at(value).to_string(),
    }
}

/// Engineering notation with SI prefixes, e.g. `1.2 Mb/s` or `250 ms`.
pub fn eng_format(value: f64, unit: &str) -> String {
    const PREFIXES: [(f64, &str); 7] = [
        (1e9, "G"),
        (1e6, "M"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "\u{b5}"),
        (1e-9, "n"),
    ];

    if value == 0.0 {
        return format!("0 {unit}");
    }
    let magnitude = value.abs();
    for (scale, prefix) in PREFIXES {
        if magnitude >= scale {
            return format!("{} {}{}", trim_decimals(value / scale), prefix, unit);
        }
    }
    format!("{} n{}", trim_decimals(value / 1e-9), unit)
}

fn trim_decimals(value: f64) -> String {
    let formatted = format!("{value:.3}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
