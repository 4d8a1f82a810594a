pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod layout;
pub mod payload;
pub mod plan;
pub mod render;

use std::ffi::OsString;

use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::{
  DateError,
  LayoutError,
  PlanError
};
pub use layout::{
  DayLayout,
  LayoutConfig,
  PositionedItem,
  layout_day
};
pub use plan::PlanItem;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting dayline CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.daylinerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let opts = commands::PlanOptions {
    plans:  cli.plans,
    tz:     cli.tz,
    date:   cli.date,
    kind:   cli.kind,
    search: cli.search
  };

  commands::dispatch(
    &cfg,
    &mut renderer,
    &opts,
    inv
  )?;

  info!("done");
  Ok(())
}
