use std::fs;

use chrono::{DateTime, NaiveDate, Utc};
use dayline_core::commands::{PlanOptions, prepare_day};
use dayline_core::config::{Config, layout_config};
use dayline_core::payload::PlanPayload;
use dayline_core::render::export_layout;
use serde_json::json;
use tempfile::tempdir;

fn write_payload(dir: &std::path::Path, items: serde_json::Value) -> std::path::PathBuf {
    let inner = json!({ "plan": items, "tz": "America/New_York" }).to_string();
    let body = json!([{ "id": 1, "user_id": 42, "plan": inner }]);
    let path = dir.join("plans.json");
    fs::write(&path, body.to_string()).expect("write payload");
    path
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T15:30:00Z")
        .expect("now")
        .with_timezone(&Utc)
}

#[test]
fn payload_file_to_positioned_boxes() {
    let temp = tempdir().expect("tempdir");
    let path = write_payload(
        temp.path(),
        json!([
            { "type": "meeting", "start": "2024-01-01T09:00", "title": "Standup", "duration_minutes": 60 },
            { "type": "call", "start": "2024-01-01T09:30", "title": "Dana", "duration_minutes": 60, "notes": "pricing" },
            { "type": "task", "start": "2024-01-01T10:00", "title": "Review", "duration_minutes": 60 },
            { "type": "followup", "start": "2024-01-01T13:00", "title": "Email", "duration_minutes": 0 }
        ]),
    );

    let payload = PlanPayload::read_path(&path).expect("read payload");
    let cfg = Config::defaults();
    let prepared =
        prepare_day(payload, &cfg, &PlanOptions::default(), &[], now()).expect("prepare");
    let layout = prepared.layout(&cfg).expect("layout");

    assert_eq!(layout.day, NaiveDate::from_ymd_opt(2024, 1, 1).expect("day"));
    assert_eq!(layout.window.start_min, 8 * 60);
    assert_eq!(layout.window.end_min, 15 * 60);
    assert_eq!(layout.group_count(), 2);

    let cols: Vec<(u32, u32, u32)> = layout
        .boxes
        .iter()
        .map(|b| (b.placement.group, b.placement.col, b.placement.group_cols))
        .collect();
    // Review reuses column 0 once Standup ends at 10:00.
    assert_eq!(cols, vec![(1, 0, 2), (1, 1, 2), (1, 0, 2), (2, 0, 1)]);

    let email = &layout.boxes[3];
    assert_eq!(email.visible_minutes, 1);
    assert_eq!(email.height_px, 56.0);

    // 10:30 local is inside the window on the displayed day.
    let export = export_layout(&layout, now());
    let marker = export.now.expect("now marker");
    assert_eq!(marker.minute, 10 * 60 + 30);
    assert_eq!(marker.top_px, 160.0);
    assert_eq!(export.scroll_top_px, Some(40.0));
    assert_eq!(export.boxes[1].width, "calc((100% - 8px) / 2)");
}

#[test]
fn rc_file_scales_timeline() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("daylinerc");
    fs::write(
        &rc,
        "# denser timeline\ntimeline.hour_height=120\ntimeline.min_block_px=30\n",
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path())).expect("load rc");
    let config = layout_config(&cfg).expect("layout config");
    assert_eq!(config.hour_height_px, 120.0);
    assert_eq!(config.min_block_px, 30.0);
    assert_eq!(config.minutes_to_px(30), 60.0);
}

#[test]
fn search_narrows_layout() {
    let temp = tempdir().expect("tempdir");
    let path = write_payload(
        temp.path(),
        json!([
            { "type": "call", "start": "2024-01-01T09:00", "title": "Dana", "duration_minutes": 30, "notes": "Pricing follow up" },
            { "type": "call", "start": "2024-01-01T09:00", "title": "Eli", "duration_minutes": 30 }
        ]),
    );

    let payload = PlanPayload::read_path(&path).expect("read payload");
    let cfg = Config::defaults();
    let opts = PlanOptions {
        search: Some("  pricing ".to_string()),
        ..PlanOptions::default()
    };
    let prepared = prepare_day(payload, &cfg, &opts, &[], now()).expect("prepare");
    let layout = prepared.layout(&cfg).expect("layout");

    assert_eq!(layout.boxes.len(), 1);
    assert_eq!(layout.boxes[0].placement.group_cols, 1);
}

#[test]
fn empty_selection_uses_default_window() {
    let temp = tempdir().expect("tempdir");
    let path = write_payload(
        temp.path(),
        json!([
            { "type": "call", "start": "2024-01-01T09:00", "title": "Dana", "duration_minutes": 30 }
        ]),
    );

    let payload = PlanPayload::read_path(&path).expect("read payload");
    let cfg = Config::defaults();
    let opts = PlanOptions {
        kind: Some("meeting".to_string()),
        ..PlanOptions::default()
    };
    let prepared = prepare_day(payload, &cfg, &opts, &[], now()).expect("prepare");
    let layout = prepared.layout(&cfg).expect("layout");

    assert!(layout.is_empty());
    assert_eq!(layout.window.start_min, 360);
    assert_eq!(layout.window.end_min, 1320);
}

#[test]
fn malformed_payload_names_source() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("broken.json");
    fs::write(&path, "{ not json").expect("write");

    let err = PlanPayload::read_path(&path).expect_err("must fail");
    assert!(format!("{err:#}").contains("broken.json"));
}

#[test]
fn out_of_range_duration_rejects_schedule_before_layout() {
    let temp = tempdir().expect("tempdir");
    let path = write_payload(
        temp.path(),
        json!([
            { "type": "call", "start": "2024-01-01T09:00", "title": "Dana", "duration_minutes": 30 },
            { "type": "task", "start": "2024-01-01T10:00", "title": "Forever", "duration_minutes": 1_000_000_000_000_i64 }
        ]),
    );

    let payload = PlanPayload::read_path(&path).expect("read payload");
    let err = prepare_day(payload, &Config::defaults(), &PlanOptions::default(), &[], now())
        .expect_err("must reject");
    let chain = format!("{err:#}");
    assert!(chain.contains("unable to display schedule"));
    assert!(chain.contains("plan item 1"));
}

#[test]
fn later_days_stay_off_the_default_day() {
    let temp = tempdir().expect("tempdir");
    let path = write_payload(
        temp.path(),
        json!([
            { "type": "call", "start": "2024-01-01T09:00", "title": "Today", "duration_minutes": 30 },
            { "type": "call", "start": "2024-01-02T10:00", "title": "Tomorrow", "duration_minutes": 30 }
        ]),
    );

    let payload = PlanPayload::read_path(&path).expect("read payload");
    let cfg = Config::defaults();
    let prepared =
        prepare_day(payload, &cfg, &PlanOptions::default(), &[], now()).expect("prepare");
    let layout = prepared.layout(&cfg).expect("layout");

    assert_eq!(layout.boxes.len(), 1);
    assert_eq!(layout.window.start_min, 8 * 60);
    assert_eq!(layout.window.end_min, 11 * 60);
    for entry in &layout.boxes {
        assert!(entry.top_px + entry.height_px <= layout.total_height_px());
    }
}
