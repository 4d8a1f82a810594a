use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::DEFAULT_PLAN_TIMEZONE;
use crate::layout::{
  DEFAULT_COMPACT_BELOW_PX,
  DEFAULT_EMPTY_WINDOW,
  DEFAULT_GAP_PX,
  DEFAULT_HOUR_HEIGHT_PX,
  DEFAULT_MIN_BLOCK_PX,
  DEFAULT_PADDING_MINUTES,
  DEFAULT_REFRESH_INTERVAL,
  DEFAULT_SCROLL_LEAD_PX,
  LayoutConfig,
  TimeWindow
};

const RC_ENV_VAR: &str = "DAYLINERC";
const RC_FILE_NAME: &str = ".daylinerc";

#[derive(Debug, Clone)]
pub struct Config {
  map:              BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading daylinerc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no daylinerc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  pub fn defaults() -> Self {
    let mut map = BTreeMap::new();
    let window = DEFAULT_EMPTY_WINDOW;
    for (key, value) in [
      ("default.command", "day".to_string()),
      ("color", "on".to_string()),
      ("render.width", "72".to_string()),
      (
        "timezone.default",
        DEFAULT_PLAN_TIMEZONE.to_string()
      ),
      (
        "timeline.hour_height",
        DEFAULT_HOUR_HEIGHT_PX.to_string()
      ),
      (
        "timeline.gap_px",
        DEFAULT_GAP_PX.to_string()
      ),
      (
        "timeline.min_block_px",
        DEFAULT_MIN_BLOCK_PX.to_string()
      ),
      (
        "timeline.empty_start_hour",
        (window.start_min / 60).to_string()
      ),
      (
        "timeline.empty_end_hour",
        (window.end_min / 60).to_string()
      ),
      (
        "timeline.padding_minutes",
        DEFAULT_PADDING_MINUTES
          .to_string()
      ),
      (
        "timeline.compact_below_px",
        DEFAULT_COMPACT_BELOW_PX
          .to_string()
      ),
      (
        "timeline.scroll_lead_px",
        DEFAULT_SCROLL_LEAD_PX
          .to_string()
      ),
      (
        "timeline.refresh_seconds",
        DEFAULT_REFRESH_INTERVAL
          .as_secs()
          .to_string()
      )
    ] {
      map.insert(key.to_string(), value);
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Parses `key` as `T`; a value that
  /// does not parse is an error naming
  /// the key.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: Display
  {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|err| {
        anyhow!(
          "invalid value for {key}: \
           {raw:?} ({err})"
        )
      })
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Builds the timeline scale from the
/// `timeline.*` keys.
#[tracing::instrument(skip(cfg))]
pub fn layout_config(
  cfg: &Config
) -> anyhow::Result<LayoutConfig> {
  let base = LayoutConfig::default();

  let start_hour = cfg
    .get_parsed::<i64>(
      "timeline.empty_start_hour"
    )?
    .unwrap_or(
      base.empty_window.start_min / 60
    );
  let end_hour = cfg
    .get_parsed::<i64>(
      "timeline.empty_end_hour"
    )?
    .unwrap_or(
      base.empty_window.end_min / 60
    );
  let refresh_seconds = cfg
    .get_parsed::<u64>(
      "timeline.refresh_seconds"
    )?
    .map(Duration::from_secs)
    .unwrap_or(base.refresh_interval);

  let layout = LayoutConfig {
    hour_height_px: cfg
      .get_parsed::<f64>("timeline.hour_height")?
      .unwrap_or(base.hour_height_px),
    gap_px: cfg
      .get_parsed::<f64>("timeline.gap_px")?
      .unwrap_or(base.gap_px),
    min_block_px: cfg
      .get_parsed::<f64>(
        "timeline.min_block_px"
      )?
      .unwrap_or(base.min_block_px),
    empty_window: TimeWindow {
      start_min: hour_to_minutes(
        "timeline.empty_start_hour",
        start_hour
      )?,
      end_min:   hour_to_minutes(
        "timeline.empty_end_hour",
        end_hour
      )?
    },
    padding_minutes: cfg
      .get_parsed::<i64>(
        "timeline.padding_minutes"
      )?
      .unwrap_or(base.padding_minutes),
    compact_below_px: cfg
      .get_parsed::<f64>(
        "timeline.compact_below_px"
      )?
      .unwrap_or(base.compact_below_px),
    scroll_lead_px: cfg
      .get_parsed::<f64>(
        "timeline.scroll_lead_px"
      )?
      .unwrap_or(base.scroll_lead_px),
    refresh_interval: refresh_seconds
  };

  layout.validate()?;
  Ok(layout)
}

fn hour_to_minutes(
  key: &str,
  hour: i64
) -> anyhow::Result<i64> {
  if !(0..=24).contains(&hour) {
    return Err(anyhow!(
      "invalid value for {key}: {hour} \
       (expected an hour from 0 to 24)"
    ));
  }
  Ok(hour * 60)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping daylinerc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::{
    Config,
    layout_config
  };
  use crate::layout::LayoutConfig;

  #[test]
  fn defaults_build_the_default_layout()
  {
    let layout =
      layout_config(&Config::defaults())
        .expect("layout config");
    assert_eq!(
      layout,
      LayoutConfig::default()
    );
  }

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let dir = tempdir().expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "timeline.gap_px = 4\n"
    )
    .expect("write include");
    let rc = dir.path().join("daylinerc");
    fs::write(
      &rc,
      "# timeline scale\n\
       timeline.hour_height=96 # taller\n\
       include extra.rc\n\
       include missing.rc\n"
    )
    .expect("write rc");

    let mut cfg =
      Config::load(Some(rc.as_path())).expect("load");
    cfg.apply_overrides(vec![(
      "rc.timeline.refresh_seconds"
        .to_string(),
      "15".to_string()
    )]);

    assert_eq!(cfg.loaded_files.len(), 2);
    let layout =
      layout_config(&cfg).expect("layout");
    assert_eq!(layout.hour_height_px, 96.0);
    assert_eq!(layout.gap_px, 4.0);
    assert_eq!(
      layout.refresh_interval,
      Duration::from_secs(15)
    );
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("day")
    );
  }

  #[test]
  fn bad_values_name_the_key() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![(
      "timeline.min_block_px".to_string(),
      "tall".to_string()
    )]);
    let err = layout_config(&cfg)
      .expect_err("bad value");
    assert!(
      err
        .to_string()
        .contains("timeline.min_block_px")
    );
  }

  #[test]
  fn out_of_range_timeline_values_are_rejected()
  {
    for (key, value) in [
      (
        "timeline.empty_start_hour",
        "9223372036854775807"
      ),
      ("timeline.empty_end_hour", "25"),
      (
        "timeline.padding_minutes",
        "9223372036854775807"
      )
    ] {
      let mut cfg = Config::defaults();
      cfg.apply_overrides(vec![(
        format!("rc.{key}"),
        value.to_string()
      )]);
      assert!(
        layout_config(&cfg).is_err(),
        "{key}={value} should be rejected"
      );
    }
  }

  #[test]
  fn invalid_line_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let rc = dir.path().join("daylinerc");
    fs::write(&rc, "no equals sign\n")
      .expect("write rc");
    assert!(Config::load(Some(rc.as_path())).is_err());
  }
}
