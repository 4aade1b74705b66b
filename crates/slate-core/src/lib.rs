pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod config;
pub mod fields;
pub mod form;
pub mod history;
pub mod ops;
pub mod render;
pub mod session;
pub mod storage;
pub mod task;
pub mod view;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::bootstrap::{
  HttpSeedSource,
  SeedSource
};
use crate::session::{
  AssumeYes,
  Confirm,
  Session
};

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
    "starting slate CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.slaterc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    storage::FileStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open data store at \
         {}",
        data_dir.display()
      )
    })?;

  let options = cfg.session_options()?;
  let seed = match cfg.bootstrap_url() {
    | Some(url) => Some(
      HttpSeedSource::new(
        url,
        cfg.bootstrap_timeout()?
      )
    ),
    | None => None
  };

  let mut session = Session::open(
    store,
    &options,
    seed
      .as_ref()
      .map(|source| source as &dyn SeedSource)
  );

  let renderer =
    render::Renderer::new(&cfg)?;
  let ask = !cli.yes
    && cfg
      .get_bool("confirm")
      .unwrap_or(true);
  let mut confirm: Box<dyn Confirm> =
    if ask {
      Box::new(
        commands::TerminalConfirm
      )
    } else {
      Box::new(AssumeYes)
    };

  commands::dispatch(
    &mut session,
    &renderer,
    &mut *confirm,
    cli.command,
    io::stdout().lock()
  )?;

  info!("done");
  Ok(())
}
