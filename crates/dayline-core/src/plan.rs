use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datetime::parse_plan_start;
use crate::error::PlanError;

/// One scheduled entry as the plan endpoint sends it. Fields stay loosely
/// typed until [`RawPlanItem::validate`] runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlanItem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub start: Option<Value>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub duration_minutes: Option<Value>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanItem {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub title: String,
    pub notes: Option<String>,
}

impl RawPlanItem {
    pub fn validate(&self, index: usize, tz: Tz) -> Result<PlanItem, PlanError> {
        let start_raw = match &self.start {
            Some(Value::String(raw)) => raw,
            _ => return Err(PlanError::MissingStart { index }),
        };

        let start =
            parse_plan_start(start_raw, tz).map_err(|err| PlanError::InvalidStart {
                index,
                value: start_raw.clone(),
                reason: err.to_string(),
            })?;

        let duration_minutes = parse_duration(self.duration_minutes.as_ref(), index)?;
        if end_of(start, duration_minutes).is_none() {
            return Err(PlanError::InvalidDuration {
                index,
                value: duration_minutes.to_string(),
            });
        }

        Ok(PlanItem {
            index,
            kind: self.kind.clone().unwrap_or_default(),
            start,
            duration_minutes,
            title: self.title.clone().unwrap_or_default(),
            notes: self.notes.clone().filter(|notes| !notes.is_empty()),
        })
    }
}

fn parse_duration(value: Option<&Value>, index: usize) -> Result<i64, PlanError> {
    let invalid = |shown: String| PlanError::InvalidDuration {
        index,
        value: shown,
    };

    let Some(Value::Number(number)) = value else {
        return Err(invalid(
            value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<missing>".to_string()),
        ));
    };

    if let Some(whole) = number.as_i64() {
        return Ok(whole);
    }

    // The cast saturates; out-of-range values are then caught by the end check.
    match number.as_f64() {
        Some(float) if float.is_finite() => Ok(float.floor() as i64),
        _ => Err(invalid(number.to_string())),
    }
}

/// End instant of an item, or `None` when it falls outside chrono's range.
fn end_of(start: DateTime<Utc>, duration_minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(duration_minutes.max(1)).and_then(|span| start.checked_add_signed(span))
}

/// Validates a whole list. The first bad item rejects the schedule.
#[tracing::instrument(skip(raw), fields(count = raw.len()))]
pub fn validate_items(raw: &[RawPlanItem], tz: Tz) -> Result<Vec<PlanItem>, PlanError> {
    raw.iter()
        .enumerate()
        .map(|(index, item)| item.validate(index, tz))
        .collect()
}

impl PlanItem {
    /// Duration used for layout; never below one minute.
    pub fn effective_minutes(&self) -> i64 {
        self.duration_minutes.max(1)
    }

    /// Validated items always have an end in range; hand-built ones
    /// saturate at the latest representable instant.
    pub fn end(&self) -> DateTime<Utc> {
        end_of(self.start, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
