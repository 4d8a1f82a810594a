//! Day timeline layout.
//!
//! Places the plan items of one calendar day on a vertical timeline.
//! Vertical geometry comes from a linear time-to-pixel scale; items that
//! overlap in time are spread across side-by-side columns so that no two
//! boxes in the same column cover the same instant.
//!
//! Everything here is a pure function of its inputs. The current time is
//! always passed in by the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, trace};

use crate::datetime::{MINUTES_PER_DAY, format_clock, format_hour_label, minute_of_day, today_in};
use crate::error::LayoutError;
use crate::plan::PlanItem;

pub const DEFAULT_HOUR_HEIGHT_PX: f64 = 64.0;
pub const DEFAULT_GAP_PX: f64 = 8.0;
pub const DEFAULT_MIN_BLOCK_PX: f64 = 56.0;
pub const DEFAULT_COMPACT_BELOW_PX: f64 = 72.0;
pub const DEFAULT_SCROLL_LEAD_PX: f64 = 120.0;
pub const DEFAULT_PADDING_MINUTES: i64 = 60;
pub const DEFAULT_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Window shown when a day has nothing scheduled: 06:00 to 22:00.
pub const DEFAULT_EMPTY_WINDOW: TimeWindow = TimeWindow {
    start_min: 6 * 60,
    end_min: 22 * 60,
};

/// Scale and spacing constants for a timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    /// Pixels per hour of the vertical scale.
    pub hour_height_px: f64,
    /// Horizontal gap between neighbouring columns.
    pub gap_px: f64,
    /// Floor for a rendered box height.
    pub min_block_px: f64,
    pub empty_window: TimeWindow,
    /// Slack added before the first item and after the last.
    pub padding_minutes: i64,
    /// Boxes shorter than this are drawn in compact form.
    pub compact_below_px: f64,
    /// How far above the now marker an auto-scroll should land.
    pub scroll_lead_px: f64,
    /// Redraw cadence for the now marker.
    pub refresh_interval: StdDuration,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            hour_height_px: DEFAULT_HOUR_HEIGHT_PX,
            gap_px: DEFAULT_GAP_PX,
            min_block_px: DEFAULT_MIN_BLOCK_PX,
            empty_window: DEFAULT_EMPTY_WINDOW,
            padding_minutes: DEFAULT_PADDING_MINUTES,
            compact_below_px: DEFAULT_COMPACT_BELOW_PX,
            scroll_lead_px: DEFAULT_SCROLL_LEAD_PX,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl LayoutConfig {
    pub fn px_per_minute(&self) -> f64 {
        self.hour_height_px / 60.0
    }

    pub fn minutes_to_px(&self, minutes: i64) -> f64 {
        minutes as f64 * self.hour_height_px / 60.0
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let invalid =
            |msg: String| -> Result<(), LayoutError> { Err(LayoutError::InvalidConfig(msg)) };

        if !(self.hour_height_px.is_finite() && self.hour_height_px > 0.0) {
            return invalid(format!(
                "hour height must be positive, got {}",
                self.hour_height_px
            ));
        }
        for (name, value) in [
            ("gap", self.gap_px),
            ("minimum block height", self.min_block_px),
            ("compact threshold", self.compact_below_px),
            ("scroll lead", self.scroll_lead_px),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        if !(0..=MINUTES_PER_DAY).contains(&self.padding_minutes) {
            return invalid(format!(
                "padding must be between 0 and {MINUTES_PER_DAY} minutes, got {}",
                self.padding_minutes
            ));
        }
        let window = self.empty_window;
        if window.start_min < 0 || window.end_min > MINUTES_PER_DAY || window.start_min >= window.end_min
        {
            return invalid(format!(
                "empty-day window {}..{} is not inside one day",
                window.start_min, window.end_min
            ));
        }
        if self.refresh_interval.is_zero() {
            return invalid("refresh interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Visible span of the day, in minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_min: i64,
    pub end_min: i64,
}

impl TimeWindow {
    pub fn span_minutes(&self) -> i64 {
        self.end_min - self.start_min
    }

    /// Inclusive on both ends.
    pub fn contains(&self, minute: i64) -> bool {
        minute >= self.start_min && minute <= self.end_min
    }
}

/// An item with its resolved interval and column assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedItem {
    pub item: PlanItem,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Cluster id; starts at 1 and increases in time order.
    pub group: u32,
    pub col: u32,
    pub group_cols: u32,
}

impl PositionedItem {
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start_at < other.end_at && other.start_at < self.end_at
    }
}

/// Horizontal placement of a box inside the timeline rail.
///
/// The rail width is only known to the renderer, so the slot keeps the
/// inputs of `width = (100% - (cols-1)*gap) / cols` and
/// `left = col * (width + gap)` and evaluates them on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalSlot {
    pub col: u32,
    pub cols: u32,
    pub gap_px: f64,
}

impl HorizontalSlot {
    pub fn total_gap_px(&self) -> f64 {
        f64::from(self.cols.saturating_sub(1)) * self.gap_px
    }

    pub fn width_px(&self, container_px: f64) -> f64 {
        ((container_px - self.total_gap_px()) / f64::from(self.cols.max(1))).max(0.0)
    }

    pub fn left_px(&self, container_px: f64) -> f64 {
        f64::from(self.col) * (self.width_px(container_px) + self.gap_px)
    }

    pub fn css_width(&self) -> String {
        format!(
            "calc((100% - {}px) / {})",
            fmt_px(self.total_gap_px()),
            self.cols.max(1)
        )
    }

    pub fn css_left(&self) -> String {
        format!(
            "calc({} * ((100% - {}px) / {} + {}px))",
            self.col,
            fmt_px(self.total_gap_px()),
            self.cols.max(1),
            fmt_px(self.gap_px)
        )
    }
}

fn fmt_px(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// A fully positioned box, in pixels relative to the top of the rail.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub placement: PositionedItem,
    pub top_px: f64,
    pub height_px: f64,
    pub slot: HorizontalSlot,
    /// Minutes of the item that fall inside the window (at least 1).
    pub visible_minutes: i64,
    pub compact: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourMark {
    pub hour: u32,
    pub top_px: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NowMarker {
    pub minute: i64,
    pub top_px: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayLayout {
    pub day: NaiveDate,
    pub tz: Tz,
    pub window: TimeWindow,
    pub boxes: Vec<LayoutBox>,
    pub config: LayoutConfig,
}

impl DayLayout {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn total_height_px(&self) -> f64 {
        self.config.minutes_to_px(self.window.span_minutes())
    }

    pub fn group_count(&self) -> usize {
        self.boxes
            .iter()
            .map(|b| b.placement.group)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Whole hours from the window start to its end, inclusive.
    pub fn hour_marks(&self) -> Vec<HourMark> {
        (self.window.start_min..=self.window.end_min)
            .step_by(60)
            .map(|minute| {
                let hour = (minute / 60) as u32;
                HourMark {
                    hour,
                    top_px: self.config.minutes_to_px(minute - self.window.start_min),
                    label: format_hour_label(hour),
                }
            })
            .collect()
    }

    /// Current-time line. Only shown when `now` falls on the displayed day
    /// in the layout's zone and inside the window.
    pub fn now_marker(&self, now: DateTime<Utc>) -> Option<NowMarker> {
        if today_in(self.tz, now) != self.day {
            return None;
        }
        let minute = minute_of_day(now, self.day, self.tz);
        if !self.window.contains(minute) {
            trace!(minute, "now is outside the visible window");
            return None;
        }
        Some(NowMarker {
            minute,
            top_px: self.config.minutes_to_px(minute - self.window.start_min),
            label: format_clock(now, self.tz),
        })
    }

    /// Scroll position that brings the current time into view, for today
    /// only.
    pub fn scroll_offset(&self, now: DateTime<Utc>) -> Option<f64> {
        if today_in(self.tz, now) != self.day {
            return None;
        }
        let minute = minute_of_day(now, self.day, self.tz);
        let y = self.config.minutes_to_px(minute - self.window.start_min) - self.config.scroll_lead_px;
        Some(y.max(0.0))
    }
}

/// Resolves intervals, sorts by start and assigns groups and columns with
/// a sweep line.
///
/// Ties on start keep input order. Each item takes the lowest column not
/// held by a still-active item (first fit); this does not search for the
/// globally smallest column count. Intervals are half-open, so an item
/// ending exactly when another begins does not overlap it.
pub fn assign_columns(items: &[PlanItem]) -> Vec<PositionedItem> {
    let mut sorted: Vec<PositionedItem> = items
        .iter()
        .map(|item| PositionedItem {
            item: item.clone(),
            start_at: item.start,
            end_at: item.end(),
            group: 0,
            col: 0,
            group_cols: 1,
        })
        .collect();
    sorted.sort_by_key(|p| p.start_at);

    let mut active: Vec<usize> = Vec::new();
    let mut group = 0_u32;

    for idx in 0..sorted.len() {
        let start = sorted[idx].start_at;
        active.retain(|&other| sorted[other].end_at > start);
        if active.is_empty() {
            group += 1;
        }

        let used: BTreeSet<u32> = active.iter().map(|&other| sorted[other].col).collect();
        let mut col = 0_u32;
        while used.contains(&col) {
            col += 1;
        }

        sorted[idx].group = group;
        sorted[idx].col = col;
        active.push(idx);
    }

    let mut group_cols: BTreeMap<u32, u32> = BTreeMap::new();
    for p in &sorted {
        let cols = group_cols.entry(p.group).or_insert(0);
        *cols = (*cols).max(p.col + 1);
    }
    for p in &mut sorted {
        p.group_cols = group_cols.get(&p.group).copied().unwrap_or(1);
    }

    sorted
}

/// Visible window for already positioned items. Padded by
/// `padding_minutes`, snapped outward to whole hours and kept inside the
/// day; always at least one hour tall.
pub fn visible_window(
    positioned: &[PositionedItem],
    day: NaiveDate,
    tz: Tz,
    config: &LayoutConfig,
) -> TimeWindow {
    let starts = positioned.iter().map(|p| minute_of_day(p.start_at, day, tz));
    let ends = positioned.iter().map(|p| minute_of_day(p.end_at, day, tz));
    let (Some(min_start), Some(max_end)) = (starts.min(), ends.max()) else {
        return config.empty_window;
    };

    let floor_hour = (min_start - config.padding_minutes).div_euclid(60) * 60;
    let ceil_hour = (max_end + config.padding_minutes + 59).div_euclid(60) * 60;

    let start_min = floor_hour.clamp(0, MINUTES_PER_DAY - 60);
    let end_min = ceil_hour.clamp(start_min + 60, MINUTES_PER_DAY);
    TimeWindow { start_min, end_min }
}

/// Lays out one day. `items` should already be the day's selection; the
/// result keeps the sorted order of [`assign_columns`].
#[tracing::instrument(skip(items, config), fields(count = items.len(), day = %day, tz = %tz.name()))]
pub fn layout_day(
    items: &[PlanItem],
    day: NaiveDate,
    tz: Tz,
    config: &LayoutConfig,
) -> Result<DayLayout, LayoutError> {
    config.validate()?;

    let positioned = assign_columns(items);
    let window = visible_window(&positioned, day, tz, config);

    let boxes: Vec<LayoutBox> = positioned
        .into_iter()
        .map(|placement| {
            let start_min = minute_of_day(placement.start_at, day, tz);
            let end_min = minute_of_day(placement.end_at, day, tz);
            let vis_start = start_min.max(window.start_min);
            let vis_end = end_min.min(window.end_min);
            let visible_minutes = (vis_end - vis_start).max(1);

            let top_px = config.minutes_to_px(vis_start - window.start_min);
            let height_px = config.minutes_to_px(visible_minutes).max(config.min_block_px);
            let slot = HorizontalSlot {
                col: placement.col,
                cols: placement.group_cols.max(1),
                gap_px: config.gap_px,
            };

            trace!(
                index = placement.item.index,
                group = placement.group,
                col = placement.col,
                cols = placement.group_cols,
                top_px,
                height_px,
                "placed item"
            );

            LayoutBox {
                placement,
                top_px,
                height_px,
                slot,
                visible_minutes,
                compact: height_px < config.compact_below_px,
            }
        })
        .collect();

    let layout = DayLayout {
        day,
        tz,
        window,
        boxes,
        config: config.clone(),
    };
    debug!(
        boxes = layout.boxes.len(),
        groups = layout.group_count(),
        window_start = window.start_min,
        window_end = window.end_min,
        "laid out day"
    );
    Ok(layout)
}
