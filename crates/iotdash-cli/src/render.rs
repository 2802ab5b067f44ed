//! Terminal rendering of store snapshots: status badge, metric lines with
//! sparklines, and the debug pane.

use colored::{ColoredString, Colorize};
use iotdash_middleware::{ChannelView, StoreSnapshot};
use iotdash_types::ConnectionState;

/// Display metadata for a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLabel {
    pub title: &'static str,
    pub unit: &'static str,
    /// Decimal places shown for the latest value.
    pub precision: usize,
}

/// Label for `channel`; unknown channels are shown by name without a unit.
pub fn label_for(channel: &str) -> ChannelLabel {
    match channel {
        "temp" => ChannelLabel {
            title: "Temperature",
            unit: "°C",
            precision: 2,
        },
        "hum" => ChannelLabel {
            title: "Humidity",
            unit: "%",
            precision: 1,
        },
        "prox" => ChannelLabel {
            title: "Proximity",
            unit: "cm",
            precision: 1,
        },
        _ => ChannelLabel {
            title: "",
            unit: "",
            precision: 2,
        },
    }
}

const SPARK_TICKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render the last `width` values as a unicode sparkline.
///
/// A flat series renders at mid height.
pub fn sparkline(values: &[f64], width: usize) -> String {
    let window = &values[values.len().saturating_sub(width)..];
    let (lo, hi) = window
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = hi - lo;
    window
        .iter()
        .map(|v| {
            if span <= f64::EPSILON {
                SPARK_TICKS[SPARK_TICKS.len() / 2]
            } else {
                let idx = ((v - lo) / span * (SPARK_TICKS.len() - 1) as f64).round() as usize;
                SPARK_TICKS[idx.min(SPARK_TICKS.len() - 1)]
            }
        })
        .collect()
}

/// Coloured connection badge.
pub fn badge(state: ConnectionState) -> ColoredString {
    let text = format!(" {} ", state.to_string().to_uppercase());
    match state {
        ConnectionState::Connected => text.black().on_green().bold(),
        ConnectionState::Connecting => text.black().on_yellow().bold(),
        ConnectionState::Disconnected => text.white().on_bright_black().bold(),
        ConnectionState::Error(_) => text.white().on_red().bold(),
    }
}

/// One metric line: title, latest value with unit, sample count, sparkline.
pub fn metric_line(view: &ChannelView, spark_width: usize) -> String {
    let label = label_for(&view.name);
    let title = if label.title.is_empty() { view.name.as_str() } else { label.title };
    let latest = match view.latest() {
        Some(v) => format!("{:.*} {}", label.precision, v, label.unit),
        None => "--".to_string(),
    };
    format!(
        "{:<12} {:>12}  {:>4} pts  {}",
        title,
        latest,
        view.values.len(),
        sparkline(&view.values, spark_width)
    )
}

/// Full dashboard frame as printable lines.
pub fn dashboard(snapshot: &StoreSnapshot, spark_width: usize, debug_lines: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(snapshot.channels.len() + debug_lines + 4);
    lines.push(format!("  Status {}", badge(snapshot.connection)));
    lines.push(String::new());
    for view in &snapshot.channels {
        lines.push(format!("  {}", metric_line(view, spark_width)));
    }
    if debug_lines > 0 {
        lines.push(String::new());
        lines.push(format!("  {}", "Debug (newest first)".bold().underline()));
        for line in snapshot.debug.iter().take(debug_lines) {
            lines.push(format!("  {}", line.dimmed()));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_channels_have_units() {
        assert_eq!(label_for("temp").unit, "°C");
        assert_eq!(label_for("hum").unit, "%");
        assert_eq!(label_for("prox").unit, "cm");
        assert_eq!(label_for("pressure").unit, "");
    }

    #[test]
    fn sparkline_spans_lowest_to_highest_tick() {
        let s = sparkline(&[0.0, 5.0, 10.0], 10);
        let chars: Vec<char> = s.chars().collect();
        assert_eq!(chars, vec!['▁', '▅', '█']);
    }

    #[test]
    fn sparkline_uses_only_the_newest_window() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        assert_eq!(sparkline(&values, 20).chars().count(), 20);
    }

    #[test]
    fn sparkline_of_flat_or_empty_series() {
        assert_eq!(sparkline(&[], 10), "");
        assert_eq!(sparkline(&[3.0, 3.0], 10), "▅▅");
    }

    #[test]
    fn metric_line_shows_latest_value_with_unit() {
        let view = ChannelView {
            name: "temp".to_string(),
            values: vec![21.0, 23.456],
        };
        let line = metric_line(&view, 10);
        assert!(line.contains("Temperature"));
        assert!(line.contains("23.46 °C"));
        assert!(line.contains("2 pts"));
    }

    #[test]
    fn metric_line_for_empty_channel() {
        let view = ChannelView {
            name: "wind".to_string(),
            values: vec![],
        };
        let line = metric_line(&view, 10);
        assert!(line.starts_with("wind"));
        assert!(line.contains("--"));
    }

    #[test]
    fn dashboard_limits_debug_lines() {
        let snapshot = StoreSnapshot {
            connection: ConnectionState::Error(Some(5)),
            channels: vec![],
            debug: (0..10).map(|i| format!("line {i}")).collect(),
        };
        let lines = dashboard(&snapshot, 10, 3);
        assert!(lines[0].contains("ERROR(RC=5)"));
        assert_eq!(lines.iter().filter(|l| l.contains("line ")).count(), 3);
    }
}
