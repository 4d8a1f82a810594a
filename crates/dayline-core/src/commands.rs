use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::{Config, layout_config};
use crate::datetime::{TimezoneSources, parse_day_expr, resolve_timezone, today_in};
use crate::filter::{Filter, Selection, select_items};
use crate::layout::{DayLayout, layout_day};
use crate::payload::PlanPayload;
use crate::plan::PlanItem;
use crate::render::Renderer;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "day",
        "list",
        "export",
        "types",
        "watch",
        "_show",
        "_commands",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Plan source and page controls taken from the global flags.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub plans: Option<PathBuf>,
    pub tz: Option<String>,
    pub date: Option<String>,
    pub kind: Option<String>,
    pub search: Option<String>,
}

/// Validated, filtered items for the displayed day.
#[derive(Debug, Clone)]
pub struct PreparedDay {
    pub tz: Tz,
    pub day: NaiveDate,
    pub items: Vec<PlanItem>,
}

impl PreparedDay {
    pub fn layout(&self, cfg: &Config) -> anyhow::Result<DayLayout> {
        let config = layout_config(cfg)?;
        Ok(layout_day(&self.items, self.day, self.tz, &config)?)
    }
}

#[instrument(skip(cfg, renderer, opts, inv))]
pub fn dispatch(
    cfg: &Config,
    renderer: &mut Renderer,
    opts: &PlanOptions,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "day" => {
            let now = Utc::now();
            let prepared = load_day(cfg, opts, &inv.filter_terms, now)?;
            cmd_day(cfg, renderer, &prepared, now)
        }
        "list" => {
            let now = Utc::now();
            let prepared = load_day(cfg, opts, &inv.filter_terms, now)?;
            renderer.print_list(&prepared.items, prepared.tz)
        }
        "export" => {
            let now = Utc::now();
            let prepared = load_day(cfg, opts, &inv.filter_terms, now)?;
            let layout = prepared.layout(cfg)?;
            renderer.print_json(&layout, now)
        }
        "types" => {
            let now = Utc::now();
            let prepared = load_day(cfg, opts, &inv.filter_terms, now)?;
            renderer.print_types(&type_counts(&prepared.items))
        }
        "watch" => {
            let ticks = parse_ticks(&inv.command_args)?;
            let prepared = load_day(cfg, opts, &inv.filter_terms, Utc::now())?;
            cmd_watch(cfg, renderer, &prepared, ticks)
        }
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(cfg, opts, filter_terms, now))]
fn load_day(
    cfg: &Config,
    opts: &PlanOptions,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<PreparedDay> {
    let source = opts.plans.as_deref().unwrap_or_else(|| Path::new("-"));
    let payload = PlanPayload::read_path(source)?;
    prepare_day(payload, cfg, opts, filter_terms, now)
}

/// Resolves the zone, validates every item, picks the displayed day and
/// applies the type, search and filter-expression selection.
#[instrument(skip_all, fields(items = payload.items.len()))]
pub fn prepare_day(
    payload: PlanPayload,
    cfg: &Config,
    opts: &PlanOptions,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<PreparedDay> {
    let configured = cfg.get("timezone.default");
    let tz = resolve_timezone(&TimezoneSources {
        cli: opts.tz.as_deref(),
        payload: payload.tz.as_deref(),
        configured: configured.as_deref(),
    })?;

    let filter = Filter::parse(filter_terms, tz)?;
    let selection = Selection::new(opts.kind.as_deref(), opts.search.as_deref());

    let items = payload
        .into_items(tz)
        .context("unable to display schedule")?;

    let day = match opts.date.as_deref() {
        Some(expr) => parse_day_expr(expr, today_in(tz, now))?,
        None => items
            .iter()
            .map(|item| item.start)
            .min()
            .map(|start| start.with_timezone(&tz).date_naive())
            .unwrap_or_else(|| today_in(tz, now)),
    };

    let before = items.len();
    let items: Vec<PlanItem> = items
        .into_iter()
        .filter(|item| item.start.with_timezone(&tz).date_naive() == day)
        .collect();
    if items.len() != before {
        debug!(
            dropped = before - items.len(),
            %day,
            "dropped items outside the displayed day"
        );
    }

    let items = select_items(items, &selection, &filter);
    info!(tz = tz.name(), %day, selected = items.len(), "prepared day");

    Ok(PreparedDay { tz, day, items })
}

pub fn type_counts(items: &[PlanItem]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.kind.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

fn parse_ticks(args: &[String]) -> anyhow::Result<Option<u64>> {
    match args.first() {
        None => Ok(None),
        Some(raw) => {
            let ticks = raw
                .parse::<u64>()
                .with_context(|| format!("watch expects a tick count, got {raw}"))?;
            if ticks == 0 { Ok(None) } else { Ok(Some(ticks)) }
        }
    }
}

#[instrument(skip(cfg, renderer, prepared, now))]
fn cmd_day(
    cfg: &Config,
    renderer: &mut Renderer,
    prepared: &PreparedDay,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command day");
    let layout = prepared.layout(cfg)?;
    renderer.print_day(&layout, now)
}

/// Redraws the day every refresh interval so the now marker moves.
#[instrument(skip(cfg, renderer, prepared))]
fn cmd_watch(
    cfg: &Config,
    renderer: &mut Renderer,
    prepared: &PreparedDay,
    ticks: Option<u64>,
) -> anyhow::Result<()> {
    let layout = prepared.layout(cfg)?;
    let interval = layout.config.refresh_interval;
    let clear = io::stdout().is_terminal();
    info!(?interval, ?ticks, "command watch");

    let mut drawn = 0u64;
    loop {
        if clear {
            print!("\x1b[2J\x1b[H");
        } else if drawn > 0 {
            println!();
        }
        renderer.print_day(&layout, Utc::now())?;
        io::stdout().flush()?;
        drawn += 1;

        if ticks.is_some_and(|limit| drawn >= limit) {
            break;
        }
        if layout.now_marker(Utc::now()).is_none() {
            warn!(day = %layout.day, "displayed day is not today, marker will not appear");
        }
        thread::sleep(interval);
    }

    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (k, v) in cfg.iter() {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: dayline [options] [filter terms] [command] [args]");
    println!();
    println!("commands: day (default), list, export, types, watch [ticks], _show, _commands, help, version");
    println!("options: --plans PATH, --tz ZONE, --date EXPR, --type TYPE, --search TEXT, --rc KEY=VALUE, --daylinerc PATH, -v, -q");
    println!("filters: type:<t> -type:<t> +notes -notes after:<time> before:<time> min:<minutes> <word>, joined by and/or and ( )");
    Ok(())
}
