use std::fmt::{Display, Formatter, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::task::StepKind;

/// Timing of a single completed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub task: String,
    pub step: StepKind,
    pub start: Instant,
    pub duration: Duration,
}

/// Thread safe sink for step records, shared by every worker of a run.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    records: Mutex<Vec<StepRecord>>,
}

impl Journal {
    pub(crate) fn record(&self, task: &str, step: StepKind, start: Instant) {
        let record = StepRecord {
            task: task.to_string(),
            step,
            start,
            duration: start.elapsed(),
        };

        self.records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(record);
    }

    pub(crate) fn finish(self) -> Diagnostics {
        Diagnostics {
            steps: self
                .records
                .into_inner()
                .unwrap_or_else(|poison| poison.into_inner()),
        }
    }
}

/// Build diagnostics returned by every graph run.
///
/// Records are kept in completion order, which makes them usable as an
/// execution trace as well as for timing.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub steps: Vec<StepRecord>,
}

impl Diagnostics {
    /// Position of a step in the completion order.
    pub fn position(&self, task: &str, step: StepKind) -> Option<usize> {
        self.steps
            .iter()
            .position(|record| record.task == task && record.step == step)
    }

    /// Wall clock time from the first step start to the last step end.
    pub fn elapsed(&self) -> Duration {
        let start = self.steps.iter().map(|r| r.start).min();
        let end = self.steps.iter().map(|r| r.start + r.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Renders a waterfall chart of step execution as an SVG file.
    pub fn render_waterfall_to_file(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), std::io::Error> {
        std::fs::write(path, self.render_waterfall())
    }

    /// Renders a waterfall chart of step execution as an SVG string.
    pub fn render_waterfall(&self) -> String {
        let mut steps: Vec<&StepRecord> = self.steps.iter().collect();
        steps.sort_by_key(|record| record.start);

        let Some(stats) = Timeline::from_steps(&steps) else {
            return r#"<svg width="200" height="50" xmlns="http://www.w3.org/2000/svg"><text x="10" y="30" font-family="sans-serif">No steps ran</text></svg>"#.to_string();
        };
        let layout = Layout::default();

        let mut svg = String::with_capacity(steps.len() * 500);
        write_header(&mut svg, &layout, steps.len());
        write_grid(&mut svg, &layout, &stats);
        _ = write_steps(&mut svg, &layout, &stats, &steps);
        svg.push_str("</svg>");

        svg
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} steps in {:.2?}", self.steps.len(), self.elapsed())
    }
}

struct XmlSafe<'a>(&'a str);

impl Display for XmlSafe<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    row_height: u32,
    label_width: u32,
    chart_width: u32,
    padding: u32,
    header_height: u32,
    text_space: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            row_height: 30,
            label_width: 300,
            chart_width: 800,
            padding: 10,
            header_height: 30,
            text_space: 80,
        }
    }
}

impl Layout {
    fn total_width(&self) -> u32 {
        self.label_width + self.chart_width + (self.padding * 3) + self.text_space
    }

    fn total_height(&self, rows: usize) -> u32 {
        self.header_height + (rows as u32 * self.row_height) + self.padding
    }
}

struct Timeline {
    start: Instant,
    total_micros: f64,
}

impl Timeline {
    fn from_steps(steps: &[&StepRecord]) -> Option<Self> {
        let start = steps.first()?.start;
        let end = steps.iter().map(|r| r.start + r.duration).max()?;

        Some(Self {
            start,
            total_micros: end.duration_since(start).as_micros().max(1) as f64,
        })
    }

    fn format(micros: f64) -> String {
        if micros < 1000.0 {
            format!("{micros:.0}µs")
        } else {
            format!("{:.2}ms", micros / 1000.0)
        }
    }
}

fn write_header(buf: &mut String, layout: &Layout, rows: usize) {
    let css = r#"
        .row:nth-child(even) { fill: #f9f9f9; }
        .row:nth-child(odd) { fill: #ffffff; }
        text { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Helvetica, Arial, sans-serif; font-size: 12px; }
        .bar { fill: #3b82f6; rx: 4; }
        .bar:hover { fill: #2563eb; }
        .label { fill: #333; }
        .time { fill: #666; font-size: 11px; }
        .grid-line { stroke: #e5e7eb; stroke-width: 1; }
        .axis-label { fill: #9ca3af; font-size: 10px; }"#;

    let _ = write!(
        buf,
        r#"<svg width="{}" height="{}" xmlns="http://www.w3.org/2000/svg"><style>{}</style><rect width="100%" height="100%" fill="white" />"#,
        layout.total_width(),
        layout.total_height(rows),
        css
    );
}

fn write_grid(buf: &mut String, layout: &Layout, stats: &Timeline) {
    let ticks = 5;
    for i in 0..=ticks {
        let pct = i as f64 / ticks as f64;
        let x = layout.label_width as f64 + layout.padding as f64 + (layout.chart_width as f64 * pct);

        let _ = write!(
            buf,
            r#"<line x1="{x:.1}" y1="{y1}" x2="{x:.1}" y2="100%" class="grid-line" /><text x="{x:.1}" y="{y_text}" text-anchor="middle" class="axis-label">{label}</text>"#,
            y1 = layout.header_height,
            y_text = layout.header_height - 5,
            label = Timeline::format(stats.total_micros * pct),
        );
    }
}

fn write_steps(
    buf: &mut String,
    layout: &Layout,
    stats: &Timeline,
    steps: &[&StepRecord],
) -> std::fmt::Result {
    for (i, record) in steps.iter().enumerate() {
        let name = format!("{}.{}", record.task, record.step);
        let name = XmlSafe(&name);

        let y = layout.header_height + (i as u32 * layout.row_height);
        let y_center = y + (layout.row_height / 2);

        write!(
            buf,
            r#"<rect x="0" y="{y}" width="100%" height="{}" class="row" />"#,
            layout.row_height
        )?;
        write!(
            buf,
            r#"<text x="{}" y="{y_center}" class="label" dominant-baseline="middle">{name}</text>"#,
            layout.padding
        )?;

        let offset = record.start.duration_since(stats.start).as_micros() as f64;
        let duration = record.duration.as_micros() as f64;

        let bar_x = layout.label_width as f64
            + layout.padding as f64
            + (offset / stats.total_micros * layout.chart_width as f64);
        let bar_w = (duration / stats.total_micros * layout.chart_width as f64).max(1.0);

        write!(
            buf,
            r#"<rect x="{bar_x:.1}" y="{}" width="{bar_w:.1}" height="{}" class="bar"><title>{name}: {:.2?}</title></rect>"#,
            y + 5,
            layout.row_height - 10,
            record.duration
        )?;
        write!(
            buf,
            r#"<text x="{:.1}" y="{y_center}" class="time" dominant-baseline="middle">{}</text>"#,
            bar_x + bar_w + 5.0,
            Timeline::format(duration)
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_completion_order() {
        let journal = Journal::default();
        journal.record("a", StepKind::Clean, Instant::now());
        journal.record("a", StepKind::Run, Instant::now());
        journal.record("b", StepKind::Run, Instant::now());

        let diagnostics = journal.finish();
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics.position("a", StepKind::Run), Some(1));
        assert_eq!(diagnostics.position("b", StepKind::Clean), None);
    }

    #[test]
    fn test_waterfall_escapes_names() {
        let journal = Journal::default();
        journal.record("<odd&name>", StepKind::Run, Instant::now());

        let svg = journal.finish().render_waterfall();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("&lt;odd&amp;name&gt;.run"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_waterfall_empty() {
        assert!(Diagnostics::default().render_waterfall().contains("No steps ran"));
    }
}
