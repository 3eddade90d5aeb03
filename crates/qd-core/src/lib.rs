pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod deadline;
pub mod notify;
pub mod persist;
pub mod reminders;
pub mod render;
pub mod repository;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Command, ListArgs};
use crate::clock::SystemClock;
use crate::notify::SpoolNotificationCenter;
use crate::repository::JsonFileRepository;
use crate::store::{StoreOptions, TaskStore};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args);
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(verbose = cli.verbose, quiet = cli.quiet, "starting qd");
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.qdrc.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let repository = Arc::new(JsonFileRepository::open(&data_dir));
    let center = Arc::new(SpoolNotificationCenter::open(
        &data_dir,
        cfg.reminders_enabled(),
    ));
    let options = StoreOptions {
        save_debounce: cfg.save_debounce()?,
    };
    let mut store = TaskStore::open(repository, center.clone(), Arc::new(SystemClock), options)
        .with_context(|| format!("failed to open task store at {}", data_dir.display()))?;

    let renderer = render::Renderer::new(&cfg);
    let command = cli
        .command
        .unwrap_or_else(|| Command::List(ListArgs::default()));

    let result = commands::dispatch(
        &mut store,
        &cfg,
        &renderer,
        center.as_ref(),
        command,
        &mut io::stdout().lock(),
    );
    store.shutdown();
    result?;

    info!("done");
    Ok(())
}
