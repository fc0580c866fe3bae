pub mod app;
pub mod autosave;
pub mod cli;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod render;
pub mod shell;
pub mod store;
pub mod task;
pub mod timer;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  error,
  info
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
    "starting docket"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  if let Some(data) = cli.data.as_deref()
  {
    cfg.apply_overrides([(
      "data.location".to_string(),
      data.to_string_lossy().to_string()
    )]);
  }

  datetime::configure_project_timezone(
    cfg.time_zone().as_deref()
  );

  let renderer =
    render::Renderer::new(&cfg)?;

  let runtime =
    tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .thread_name("docket-save")
      .build()
      .context(
        "failed to start background \
         runtime"
      )?;

  let mut app = app::App::start(
    &cfg,
    runtime.handle().clone()
  )
  .context("failed to start docket")?;

  let tokens: Vec<String> = cli
    .rest
    .iter()
    .map(|arg| {
      arg.to_string_lossy().to_string()
    })
    .collect();

  let outcome = if tokens.is_empty() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shell::run_interactive(
      &mut app,
      &renderer,
      stdin.lock(),
      &mut stdout
    )
  } else {
    let mut stdout = io::stdout();
    shell::dispatch(
      &mut app,
      &renderer,
      &mut stdout,
      &tokens
    )
    .map(|_| ())
  };

  let flushed =
    runtime.block_on(app.shutdown());
  if let Err(err) = &flushed {
    error!(
      error = %format!("{err:#}"),
      "final save failed"
    );
  }

  outcome?;
  flushed.context(
    "failed to save tasks on exit"
  )?;

  info!("done");
  Ok(())
}
