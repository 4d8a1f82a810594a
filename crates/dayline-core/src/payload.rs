use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::PlanError;
use crate::plan::{PlanItem, RawPlanItem, validate_items};

/// A plan as returned by the plan endpoint, before validation.
#[derive(Debug, Clone, Default)]
pub struct PlanPayload {
    pub items: Vec<RawPlanItem>,
    pub tz: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    plan: Vec<RawPlanItem>,
    #[serde(default)]
    tz: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PlanBody {
    Encoded(String),
    Items(Vec<RawPlanItem>),
    Inline(PlanDocument),
}

#[derive(Debug, Clone, Deserialize)]
struct PlanRecord {
    #[serde(default)]
    plan: Option<PlanBody>,
    #[serde(default)]
    tz: Option<String>,
}

impl PlanPayload {
    /// Reads a response body from `path`; `-` reads stdin.
    #[tracing::instrument(skip(path))]
    pub fn read_path(path: &Path) -> anyhow::Result<Self> {
        let (text, source) = if path.as_os_str() == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read plan payload from stdin")?;
            (buf, "stdin".to_string())
        } else {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            (text, path.display().to_string())
        };

        let payload =
            Self::from_json_str(&text).with_context(|| format!("invalid plan payload in {source}"))?;

        info!(
            source = %source,
            items = payload.items.len(),
            tz = ?payload.tz,
            "loaded plan payload"
        );
        Ok(payload)
    }

    /// Accepts the endpoint's array of records (only the first record is
    /// used), a single record, or a bare plan document.
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            debug!("empty plan payload");
            return Ok(Self::default());
        }

        let value: Value = serde_json::from_str(text).context("payload is not valid JSON")?;

        let record = match value {
            Value::Array(mut records) => {
                if records.is_empty() {
                    debug!("plan endpoint returned no records");
                    return Ok(Self::default());
                }
                if records.len() > 1 {
                    debug!(records = records.len(), "using first plan record");
                }
                records.swap_remove(0)
            }
            obj @ Value::Object(_) => obj,
            other => return Err(anyhow!("expected a JSON array or object, got {other}")),
        };

        let record: PlanRecord =
            serde_json::from_value(record).context("malformed plan record")?;

        let (items, inner_tz) = match record.plan {
            None => (vec![], None),
            Some(PlanBody::Items(items)) => (items, None),
            Some(PlanBody::Inline(doc)) => (doc.plan, doc.tz),
            Some(PlanBody::Encoded(raw)) => {
                if raw.trim().is_empty() {
                    (vec![], None)
                } else {
                    let doc: PlanDocument = serde_json::from_str(&raw)
                        .context("plan field does not hold a plan document")?;
                    (doc.plan, doc.tz)
                }
            }
        };

        Ok(Self {
            items,
            tz: inner_tz.or(record.tz).filter(|tz| !tz.trim().is_empty()),
        })
    }

    pub fn into_items(self, tz: Tz) -> Result<Vec<PlanItem>, PlanError> {
        validate_items(&self.items, tz)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_string_encoded_plan() {
        let inner = json!({
            "plan": [
                { "type": "call", "start": "2024-01-01T09:00", "title": "A", "duration_minutes": 30 }
            ],
            "tz": "Europe/Berlin"
        })
        .to_string();
        let body = json!([{ "id": 7, "plan": inner }]).to_string();

        let payload = PlanPayload::from_json_str(&body).expect("payload");
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.tz.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn empty_array_is_empty_plan() {
        let payload = PlanPayload::from_json_str("[]").expect("payload");
        assert!(payload.items.is_empty());
        assert!(payload.tz.is_none());
    }

    #[test]
    fn record_without_plan_is_empty() {
        let payload = PlanPayload::from_json_str(r#"[{"id": 1}]"#).expect("payload");
        assert!(payload.items.is_empty());
    }

    #[test]
    fn accepts_bare_document() {
        let body = json!({
            "plan": [{ "type": "task", "start": "2024-01-01T10:00", "title": "B", "duration_minutes": 45 }],
            "tz": "America/Chicago"
        })
        .to_string();
        let payload = PlanPayload::from_json_str(&body).expect("payload");
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.tz.as_deref(), Some("America/Chicago"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(PlanPayload::from_json_str("plan: nope").is_err());
        assert!(PlanPayload::from_json_str("42").is_err());
    }
}
