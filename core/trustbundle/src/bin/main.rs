// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, warn};

use trustbundle::args::Cli;
use trustbundle::commands;
use trustbundle::config::ConfigLoader;
use trustbundle::exit;
use trustbundle::OPERATION_TIMEOUT;
use trustbundle_certstore::Context;

fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("Error: {err:#}");
    if let Some(hint) = exit::hint(err) {
        eprintln!("Hint: {hint}");
    }
    ExitCode::from(exit::exit_code(err) as u8)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // load the optional configuration file
    let mut config = match ConfigLoader::load(cli.global.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return report(&e.into()),
    };

    // tracing subscriber initialization, --log-level wins over the file
    let mut tracing_conf = config.tracing().clone();
    if let Some(level) = &cli.global.log_level {
        tracing_conf = tracing_conf.with_log_level(level.clone());
    }
    tracing_conf.setup_tracing_subscriber();
    debug!(?tracing_conf);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report(&anyhow::Error::new(e).context("failed to build runtime")),
    };

    let result = runtime.block_on(async move {
        let ctx = Context::with_timeout(OPERATION_TIMEOUT);

        // Ctrl-C cancels the running operation
        let interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                interrupt.cancel();
            }
        });

        let mut stdout = std::io::stdout().lock();
        commands::run(cli, &mut config, &ctx, &mut stdout).await
    });

    match result {
        Ok(()) => ExitCode::from(exit::EXIT_SUCCESS as u8),
        Err(e) => report(&e),
    }
}
