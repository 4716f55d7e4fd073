//! Command-line simulator for post-copy live VM migration.

mod args;
mod observer;
mod report;

use std::{
    io::{self, Write as _},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::{Context as _, Result};
use clap::Parser as _;
use postcopy_core::{CoreConfig, MigrationObserver, NoopObserver};
use postcopy_runtime::MigrationController;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing_subscriber::EnvFilter;

use self::{
    args::{Cli, FREE_PAGE_RATIO, LINK_SPEED_MBPS, Prompter, VM_SIZE_MB},
    observer::ConsoleObserver,
};

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let human = !cli.json;
    let stdout = io::stdout();

    if human {
        report::header(&mut stdout.lock())?;
    }

    let config = {
        let mut prompter = Prompter::new(
            io::stdin().lock(),
            cli.prompt_writer(stdout.lock(), io::stderr()),
            !cli.non_interactive,
        );

        let vm_size_mb = prompter
            .resolve(cli.vm_size.as_deref(), &VM_SIZE_MB)
            .context("failed to read VM size")?;
        let free_page_ratio = prompter
            .resolve(cli.free_ratio.as_deref(), &FREE_PAGE_RATIO)
            .context("failed to read free page ratio")?;
        let link_speed_mbps = prompter
            .resolve(cli.link_speed.as_deref(), &LINK_SPEED_MBPS)
            .context("failed to read link speed")?;

        let config = CoreConfig::builder()
            .vm_size_mb(vm_size_mb)
            .free_page_ratio(free_page_ratio)
            .link_speed_mbps(link_speed_mbps)
            .seed(cli.seed)
            .build()
            .context("invalid migration parameters")?;

        if human {
            report::configuration(&mut stdout.lock(), &config)?;
            prompter.pause("Press Enter to start the migration simulation...")?;
        }

        config
    };

    let observer: Arc<dyn MigrationObserver> = if human {
        Arc::new(ConsoleObserver::new(io::stdout(), config.non_pageable_pages()))
    }
    else {
        Arc::new(NoopObserver)
    };

    let started = Instant::now();
    let mut controller = MigrationController::new(config).with_observer(observer);

    // A second signal terminates immediately.
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&interrupted))
            .context("failed to register signal handler")?;
        signal_hook::flag::register(signal, Arc::clone(&interrupted))
            .context("failed to register signal handler")?;
        signal_hook::flag::register(signal, controller.cancellation().flag())
            .context("failed to register signal handler")?;
    }

    if human {
        report::migration_start(&mut stdout.lock(), controller.config())?;
    }

    let report = controller.run().context("migration failed")?;

    if interrupted.load(Ordering::Acquire) {
        eprintln!("\nMigration simulation interrupted.");
    }

    let mut out = stdout.lock();
    if human {
        report::summary(&mut out, &report)?;
        report::footer(&mut out, started.elapsed())?;
    }
    else {
        serde_json::to_writer_pretty(&mut out, &report).context("failed to write report")?;
        writeln!(out)?;
    }

    Ok(())
}
