use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::Config;
use crate::datetime::{format_clock, format_hour_label};
use crate::layout::{DayLayout, LayoutBox};
use crate::plan::PlanItem;

/// Horizontal pixels represented by one terminal column.
const CHAR_PX: f64 = 8.0;
/// Terminal rows per hour of timeline.
const ROWS_PER_HOUR: f64 = 4.0;
const GUTTER: usize = 6;
const MIN_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    width: usize,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        let width = cfg.get_parsed::<usize>("render.width")?.unwrap_or(72);
        if width < MIN_WIDTH {
            return Err(anyhow!(
                "render.width must be at least {MIN_WIDTH}, got {width}"
            ));
        }

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            width,
        })
    }

    /// Plain renderer for tests and pipes.
    pub fn plain(width: usize) -> Self {
        Self {
            color: false,
            width: width.max(MIN_WIDTH),
        }
    }

    #[tracing::instrument(skip(self, layout, now))]
    pub fn print_day(&mut self, layout: &DayLayout, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_day(&mut out, layout, now)
    }

    pub fn write_day<W: Write>(
        &self,
        out: &mut W,
        layout: &DayLayout,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        write_header(out, layout.day, layout.tz)?;

        if layout.is_empty() {
            write_empty(out)?;
            return Ok(());
        }

        let rail_cols = self.width - GUTTER - 1;
        let row_px = layout.config.hour_height_px / ROWS_PER_HOUR;
        let rows = (layout.total_height_px() / row_px).ceil() as usize + 1;
        let mut canvas = Canvas::new(rows, rail_cols);
        let mut gutter = vec![String::new(); rows];

        for mark in layout.hour_marks() {
            let row = (mark.top_px / row_px).round() as usize;
            if row < rows {
                canvas.rule(row, '┄', Some("2"));
                gutter[row] = mark.label;
            }
        }

        let container_px = rail_cols as f64 * CHAR_PX;
        for entry in &layout.boxes {
            draw_box(&mut canvas, entry, layout.tz, container_px, row_px);
        }

        if let Some(marker) = layout.now_marker(now) {
            let row = (marker.top_px / row_px).round() as usize;
            if row < rows {
                canvas.rule(row, '━', Some("31"));
                let label = format!(" {} ", marker.label);
                let start = rail_cols.saturating_sub(UnicodeWidthStr::width(label.as_str()));
                canvas.text(row, start, rail_cols, &label, Some("31"));
                gutter[row] = "now".to_string();
            }
        }

        for (row, label) in gutter.iter().enumerate() {
            write!(out, "{:>width$} │", label, width = GUTTER - 1)?;
            writeln!(out, "{}", canvas.line(row, self.color))?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, items, tz))]
    pub fn print_list(&mut self, items: &[PlanItem], tz: Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_list(&mut out, items, tz)
    }

    pub fn write_list<W: Write>(&self, out: &mut W, items: &[PlanItem], tz: Tz) -> anyhow::Result<()> {
        if items.is_empty() {
            write_empty(out)?;
            return Ok(());
        }

        for item in items {
            let time = item.start.with_timezone(&tz).format("%I:%M %p").to_string();
            let chip = self.paint(&format!("[{}]", item.kind), type_color(&item.kind));
            writeln!(
                out,
                "{time}  {chip} {}  - {} min",
                item.title, item.duration_minutes
            )?;
            if let Some(notes) = &item.notes {
                writeln!(out, "          {notes}")?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, layout, now))]
    pub fn print_json(&mut self, layout: &DayLayout, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, &export_layout(layout, now))?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, counts))]
    pub fn print_types(&mut self, counts: &BTreeMap<String, usize>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec!["Type".to_string(), "Count".to_string()];
        let rows = counts
            .iter()
            .map(|(kind, count)| {
                let shown = if kind.is_empty() { "(none)" } else { kind.as_str() };
                vec![self.paint(shown, type_color(kind)), count.to_string()]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: Option<&str>) -> String {
        match code {
            Some(code) if self.color => format!("\x1b[{code}m{text}\x1b[0m"),
            _ => text.to_string(),
        }
    }
}

/// ANSI colour per plan type; unknown types use the terminal default.
fn type_color(kind: &str) -> Option<&'static str> {
    match kind.to_ascii_lowercase().as_str() {
        "followup" => Some("34"),
        "meeting" => Some("35"),
        "call" => Some("32"),
        "task" => Some("33"),
        _ => None,
    }
}

fn write_header<W: Write>(out: &mut W, day: chrono::NaiveDate, tz: Tz) -> anyhow::Result<()> {
    writeln!(
        out,
        "{}  {}  ({})",
        day.format("%d"),
        day.format("%A, %B %Y"),
        tz.name().replace('_', " ")
    )?;
    writeln!(out)?;
    Ok(())
}

fn write_empty<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "No plans found")?;
    writeln!(out, "Try adjusting your filters or search.")?;
    Ok(())
}

fn draw_box(canvas: &mut Canvas, entry: &LayoutBox, tz: Tz, container_px: f64, row_px: f64) {
    let x0 = (entry.slot.left_px(container_px) / CHAR_PX).round() as usize;
    let x1 = ((entry.slot.left_px(container_px) + entry.slot.width_px(container_px)) / CHAR_PX)
        .round() as usize;
    let x1 = x1.max(x0 + 1).min(canvas.cols);
    if x0 >= x1 {
        return;
    }

    let y0 = (entry.top_px / row_px).floor() as usize;
    let y1 = ((entry.top_px + entry.height_px) / row_px).ceil() as usize;
    let y1 = y1.max(y0 + 1).min(canvas.rows);
    if y0 >= y1 {
        return;
    }

    let color = type_color(&entry.placement.item.kind);
    for row in y0..y1 {
        canvas.fill(row, x0, x1, ' ', color);
        canvas.set(row, x0, '│', color);
    }

    let item = &entry.placement.item;
    let mut lines = vec![if item.kind.is_empty() {
        item.title.clone()
    } else {
        format!("{} · {}", item.kind, item.title)
    }];
    lines.push(format!(
        "{} · {}m",
        format_clock(entry.placement.start_at, tz),
        item.duration_minutes
    ));
    if !entry.compact
        && let Some(notes) = &item.notes
    {
        lines.push(notes.clone());
    }

    for (offset, line) in lines.iter().enumerate() {
        let row = y0 + offset;
        if row >= y1 {
            break;
        }
        canvas.text(row, x0 + 1, x1, line, color);
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    ch: char,
    color: Option<&'static str>,
}

struct Canvas {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<Cell>>,
}

impl Canvas {
    fn new(rows: usize, cols: usize) -> Self {
        let blank = Cell {
            ch: ' ',
            color: None,
        };
        Self {
            rows,
            cols,
            cells: vec![vec![blank; cols]; rows],
        }
    }

    fn set(&mut self, row: usize, col: usize, ch: char, color: Option<&'static str>) {
        if let Some(cell) = self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = Cell { ch, color };
        }
    }

    fn fill(&mut self, row: usize, from: usize, to: usize, ch: char, color: Option<&'static str>) {
        for col in from..to.min(self.cols) {
            self.set(row, col, ch, color);
        }
    }

    fn rule(&mut self, row: usize, ch: char, color: Option<&'static str>) {
        self.fill(row, 0, self.cols, ch, color);
    }

    /// Writes `text` from `from`, truncated before `to`. Wide characters
    /// that would straddle the edge are dropped.
    fn text(&mut self, row: usize, from: usize, to: usize, text: &str, color: Option<&'static str>) {
        let mut col = from;
        for ch in text.chars() {
            let w = UnicodeWidthChar::width(ch).unwrap_or(0);
            if w == 0 {
                continue;
            }
            if col + w > to.min(self.cols) {
                break;
            }
            self.set(row, col, ch, color);
            for pad in 1..w {
                // placeholder cells behind a wide glyph
                self.set(row, col + pad, '\0', color);
            }
            col += w;
        }
    }

    fn line(&self, row: usize, color: bool) -> String {
        let mut out = String::new();
        let mut current: Option<&'static str> = None;

        for cell in &self.cells[row] {
            if cell.ch == '\0' {
                continue;
            }
            if color && cell.color != current {
                if current.is_some() {
                    out.push_str("\x1b[0m");
                }
                if let Some(code) = cell.color {
                    out.push_str(&format!("\x1b[{code}m"));
                }
                current = cell.color;
            }
            out.push(cell.ch);
        }
        if color && current.is_some() {
            out.push_str("\x1b[0m");
        }

        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutExport {
    pub day: String,
    pub timezone: String,
    pub window: WindowExport,
    pub total_height_px: f64,
    pub hours: Vec<HourExport>,
    pub boxes: Vec<BoxExport>,
    pub now: Option<NowExport>,
    pub scroll_top_px: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowExport {
    pub start_minute: i64,
    pub end_minute: i64,
    pub start_label: String,
    pub end_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourExport {
    pub hour: u32,
    pub top_px: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxExport {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub notes: Option<String>,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
    pub group: u32,
    pub col: u32,
    pub group_cols: u32,
    pub top_px: f64,
    pub height_px: f64,
    pub width: String,
    pub left: String,
    pub compact: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NowExport {
    pub minute: i64,
    pub top_px: f64,
    pub label: String,
}

pub fn export_layout(layout: &DayLayout, now: DateTime<Utc>) -> LayoutExport {
    let tz = layout.tz;
    LayoutExport {
        day: layout.day.format("%Y-%m-%d").to_string(),
        timezone: tz.name().to_string(),
        window: WindowExport {
            start_minute: layout.window.start_min,
            end_minute: layout.window.end_min,
            start_label: format_hour_label((layout.window.start_min / 60) as u32),
            end_label: format_hour_label((layout.window.end_min / 60) as u32),
        },
        total_height_px: layout.total_height_px(),
        hours: layout
            .hour_marks()
            .into_iter()
            .map(|mark| HourExport {
                hour: mark.hour,
                top_px: mark.top_px,
                label: mark.label,
            })
            .collect(),
        boxes: layout
            .boxes
            .iter()
            .map(|entry| {
                let p = &entry.placement;
                BoxExport {
                    index: p.item.index,
                    kind: p.item.kind.clone(),
                    title: p.item.title.clone(),
                    notes: p.item.notes.clone(),
                    start: p.start_at.with_timezone(&tz).to_rfc3339(),
                    end: p.end_at.with_timezone(&tz).to_rfc3339(),
                    duration_minutes: p.item.duration_minutes,
                    group: p.group,
                    col: p.col,
                    group_cols: p.group_cols,
                    top_px: entry.top_px,
                    height_px: entry.height_px,
                    width: entry.slot.css_width(),
                    left: entry.slot.css_left(),
                    compact: entry.compact,
                }
            })
            .collect(),
        now: layout.now_marker(now).map(|marker| NowExport {
            minute: marker.minute,
            top_px: marker.top_px,
            label: marker.label,
        }),
        scroll_top_px: layout.scroll_offset(now),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::datetime::{parse_plan_start, parse_timezone};
    use crate::layout::{LayoutConfig, layout_day};

    fn tz() -> Tz {
        parse_timezone("America/New_York", "test").expect("zone")
    }

    fn item(index: usize, kind: &str, start: &str, minutes: i64, notes: Option<&str>) -> PlanItem {
        PlanItem {
            index,
            kind: kind.to_string(),
            start: parse_plan_start(start, tz()).expect("start"),
            duration_minutes: minutes,
            title: format!("Item {index}"),
            notes: notes.map(str::to_string),
        }
    }

    fn render_day(items: &[PlanItem], now: &str) -> String {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).expect("day");
        let layout = layout_day(items, day, tz(), &LayoutConfig::default()).expect("layout");
        let now = parse_plan_start(now, tz()).expect("now");
        let mut buf = Vec::new();
        Renderer::plain(60)
            .write_day(&mut buf, &layout, now)
            .expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn day_view_draws_side_by_side_boxes() {
        let text = render_day(
            &[
                item(0, "meeting", "2024-01-01T09:00", 60, Some("agenda")),
                item(1, "call", "2024-01-01T09:30", 60, None),
            ],
            "2024-01-02T12:00",
        );

        assert!(text.starts_with("01  Monday, January 2024  (America/New York)"));
        assert!(text.contains("8 AM │"));
        let row = text
            .lines()
            .find(|line| line.contains("meeting · Item 0"))
            .expect("meeting row");
        assert!(!row.contains("call · Item 1"));
        let call_row = text
            .lines()
            .find(|line| line.contains("call · Item 1"))
            .expect("call row");
        let meeting_col = row.find("meeting").expect("meeting col");
        let call_col = call_row.find("call ·").expect("call col");
        assert!(call_col > meeting_col);
        assert!(!text.contains("now │"));
    }

    #[test]
    fn day_view_marks_now_on_today() {
        let text = render_day(
            &[item(0, "task", "2024-01-01T09:00", 60, None)],
            "2024-01-01T09:30",
        );
        assert!(text.contains("now │"));
        assert!(text.contains("9:30 AM"));
    }

    #[test]
    fn empty_day_prints_placeholder() {
        let text = render_day(&[], "2024-01-01T09:30");
        assert!(text.contains("No plans found"));
    }

    #[test]
    fn list_view_matches_plan_page_format() {
        let mut buf = Vec::new();
        Renderer::plain(60)
            .write_list(
                &mut buf,
                &[item(0, "followup", "2024-01-01T14:05", 25, Some("ping Dana"))],
                tz(),
            )
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            text,
            "02:05 PM  [followup] Item 0  - 25 min\n          ping Dana\n"
        );
    }

    #[test]
    fn export_carries_geometry_and_css() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).expect("day");
        let layout = layout_day(
            &[
                item(0, "meeting", "2024-01-01T09:00", 60, None),
                item(1, "call", "2024-01-01T09:30", 60, None),
            ],
            day,
            tz(),
            &LayoutConfig::default(),
        )
        .expect("layout");
        let now = parse_plan_start("2024-01-01T09:45", tz()).expect("now");
        let export = export_layout(&layout, now);

        assert_eq!(export.window.start_label, "8 AM");
        assert_eq!(export.window.end_label, "12 PM");
        assert_eq!(export.boxes[1].width, "calc((100% - 8px) / 2)");
        assert_eq!(export.boxes[1].left, "calc(1 * ((100% - 8px) / 2 + 8px))");
        assert_eq!(export.boxes[0].start, "2024-01-01T09:00:00-05:00");
        assert_eq!(export.now.as_ref().map(|n| n.minute), Some(585));

        let json = serde_json::to_value(&export).expect("json");
        assert_eq!(json["boxes"][0]["type"], "meeting");
    }

    #[test]
    fn strips_ansi_for_width() {
        assert_eq!(strip_ansi("\x1b[35mmeeting\x1b[0m"), "meeting");
    }
}
