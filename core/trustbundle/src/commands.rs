// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use trustbundle_certstore::metadata::UserCertificate;
use trustbundle_certstore::{Context, Store};

use crate::args::{BundleCommand, CertCommand, Cli, Command};
use crate::config::{ConfigLoader, resolve_home};
use crate::output::{self, BundleSummary};

/// Command failures that are not store errors.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("refusing to update the base bundle: {0} (pass --yes to proceed)")]
    DegradedBundle(String),
    #[error("store check found {0} failing check(s)")]
    Unhealthy(usize),
}

/// Everything a command handler needs; there is no process-wide state.
#[derive(Debug)]
pub struct CommandContext {
    pub store: Store,
    pub ctx: Context,
    pub json: bool,
}

/// Resolve the store from the global options and run the selected command.
pub async fn run(
    cli: Cli,
    config: &mut ConfigLoader,
    ctx: &Context,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let root = resolve_home(cli.global.home)?;
    let store_config = config.store()?.clone();
    debug!(root = %root.display(), "using certificate store");

    let cx = CommandContext {
        store: Store::new(root, store_config),
        ctx: ctx.clone(),
        json: cli.command.json(),
    };
    dispatch(&cx, cli.command, out).await
}

pub async fn dispatch(cx: &CommandContext, command: Command, out: &mut dyn Write) -> anyhow::Result<()> {
    match command {
        Command::Init { force } => init(cx, out, force).await,
        Command::Cert(args) => match args.command {
            CertCommand::Add {
                path,
                name,
                allow_expired,
            } => cert_add(cx, out, &path, &name, allow_expired).await,
            CertCommand::List { expired, .. } => cert_list(cx, out, expired).await,
            CertCommand::Remove { name } => cert_remove(cx, out, &name).await,
            CertCommand::Inspect { name, .. } => cert_inspect(cx, out, &name).await,
        },
        Command::Bundle(args) => match args.command {
            BundleCommand::Info { .. } => bundle_info(cx, out).await,
            BundleCommand::Update { file, origin, yes } => {
                bundle_update(cx, out, &file, origin, yes).await
            }
            BundleCommand::Reset => bundle_reset(cx, out).await,
        },
        Command::Rebuild => rebuild(cx, out).await,
        Command::Doctor { .. } => doctor(cx, out).await,
        Command::Clean => clean(cx, out).await,
        Command::Status { .. } => status(cx, out).await,
    }
}

pub async fn init(cx: &CommandContext, out: &mut dyn Write, force: bool) -> anyhow::Result<()> {
    let record = cx.store.initialize(&cx.ctx, force).await?;
    writeln!(out, "Initialized certificate store at {}", cx.store.root().display())?;
    writeln!(
        out,
        "  Base bundle:     {} certificates ({})",
        record.base_bundle.cert_count, record.base_bundle.source
    )?;
    writeln!(out, "  Combined bundle: {}", cx.store.combined_bundle_path().display())?;
    Ok(())
}

pub async fn cert_add(
    cx: &CommandContext,
    out: &mut dyn Write,
    path: &Path,
    name: &str,
    allow_expired: bool,
) -> anyhow::Result<()> {
    let record = cx
        .store
        .add_certificate(&cx.ctx, path, name, allow_expired)
        .await?;
    output::certificate_added(out, &record, &cx.store.combined_bundle_path())?;
    if record.expires < Utc::now() {
        warn!(name = %record.name, expires = %record.expires, "expired certificate added");
        writeln!(out, "Warning: this certificate expired on {}", record.expires)?;
    }
    Ok(())
}

pub async fn cert_list(cx: &CommandContext, out: &mut dyn Write, expired_only: bool) -> anyhow::Result<()> {
    let now = Utc::now();
    let certs: Vec<UserCertificate> = cx
        .store
        .list_certificates()
        .await?
        .into_iter()
        .filter(|c| !expired_only || c.expires < now)
        .collect();

    if cx.json {
        return output::json(out, &certs);
    }
    if certs.is_empty() {
        let what = if expired_only { "expired user certificates" } else { "user certificates" };
        writeln!(out, "No {what}")?;
        return Ok(());
    }
    output::certificate_table(out, &certs, now)?;
    Ok(())
}

pub async fn cert_remove(cx: &CommandContext, out: &mut dyn Write, name: &str) -> anyhow::Result<()> {
    let removed = cx.store.remove_certificate(&cx.ctx, name).await?;
    writeln!(out, "Certificate '{}' removed", removed.name)?;
    writeln!(out, "Combined bundle rebuilt: {}", cx.store.combined_bundle_path().display())?;
    Ok(())
}

pub async fn cert_inspect(cx: &CommandContext, out: &mut dyn Write, name: &str) -> anyhow::Result<()> {
    let details = cx.store.certificate_info(name).await?;
    if cx.json {
        return output::json(out, &details);
    }
    output::certificate_details(out, &details, Utc::now())?;
    Ok(())
}

async fn combined_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

pub async fn bundle_info(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let record = cx.store.metadata().await?;
    let summary = BundleSummary {
        base_path: cx.store.layout().base_bundle(),
        base: &record.base_bundle,
        combined_path: cx.store.combined_bundle_path(),
        combined_size: combined_size(&cx.store.combined_bundle_path()).await,
        combined: &record.combined_bundle,
    };
    if cx.json {
        return output::json(out, &summary);
    }
    output::bundle_summary(out, &summary)?;
    Ok(())
}

pub async fn bundle_update(
    cx: &CommandContext,
    out: &mut dyn Write,
    file: &Path,
    origin: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read bundle file {}", file.display()))?;
    let origin = origin.unwrap_or_else(|| file.display().to_string());

    // refuse before taking the lock so a declined update changes nothing
    let preview = cx.store.verify_base_bundle(&bytes).await?;
    if let Some(warning) = preview.warning {
        if !yes {
            return Err(CommandError::DegradedBundle(warning).into());
        }
        writeln!(out, "Warning: {warning}")?;
    }

    let verification = cx.store.update_base_bundle(&cx.ctx, &bytes, &origin).await?;
    info!(origin = %origin, certs = verification.cert_count, "base bundle replaced");
    writeln!(out, "Base bundle updated from {origin}")?;
    writeln!(out, "  Certificates: {}", verification.cert_count)?;
    if let Some(published) = verification.published {
        writeln!(out, "  Published:    {published}")?;
    }
    writeln!(out, "Combined bundle rebuilt: {}", cx.store.combined_bundle_path().display())?;
    Ok(())
}

pub async fn bundle_reset(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let record = cx.store.reset_base_bundle(&cx.ctx).await?;
    writeln!(
        out,
        "Base bundle reset to {} ({} certificates)",
        record.base_bundle.source, record.base_bundle.cert_count
    )?;
    Ok(())
}

pub async fn rebuild(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let record = cx.store.rebuild(&cx.ctx).await?;
    writeln!(
        out,
        "Combined bundle rebuilt: {} certificates from {}",
        record.combined_bundle.cert_count,
        record.combined_bundle.sources.join(", ")
    )?;
    Ok(())
}

pub async fn doctor(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let report = cx.store.check(&cx.ctx).await?;
    if cx.json {
        output::json(out, &report)?;
    } else {
        output::health_report(out, &report)?;
    }
    if report.healthy() {
        Ok(())
    } else {
        Err(CommandError::Unhealthy(report.summary.failures).into())
    }
}

pub async fn clean(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let removed = cx.store.clean_temp_files(&cx.ctx).await?;
    writeln!(out, "Removed {removed} temporary file(s)")?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    store_location: PathBuf,
    initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_certificates: Option<&'a [UserCertificate]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bundles: Option<BundleSummary<'a>>,
}

pub async fn status(cx: &CommandContext, out: &mut dyn Write) -> anyhow::Result<()> {
    let store_location = cx.store.root().to_path_buf();
    if !cx.store.is_initialized().await? {
        if cx.json {
            let report = StatusReport {
                store_location,
                initialized: false,
                user_certificates: None,
                bundles: None,
            };
            return output::json(out, &report);
        }
        writeln!(out, "Store location:  {}", store_location.display())?;
        writeln!(out, "Initialized:     false")?;
        writeln!(out)?;
        writeln!(out, "Store is not initialized. Run `trustbundle init` to create it.")?;
        return Ok(());
    }

    let record = cx.store.metadata().await?;
    let combined_path = cx.store.combined_bundle_path();
    let report = StatusReport {
        store_location,
        initialized: true,
        user_certificates: Some(&record.user_certificates),
        bundles: Some(BundleSummary {
            base_path: cx.store.layout().base_bundle(),
            base: &record.base_bundle,
            combined_size: combined_size(&combined_path).await,
            combined_path,
            combined: &record.combined_bundle,
        }),
    };
    if cx.json {
        return output::json(out, &report);
    }

    writeln!(out, "Store location:  {}", report.store_location.display())?;
    writeln!(out, "Initialized:     true")?;
    writeln!(out, "User certs:      {}", record.user_certificates.len())?;
    writeln!(out)?;
    if !record.user_certificates.is_empty() {
        output::certificate_table(out, &record.user_certificates, Utc::now())?;
        writeln!(out)?;
    }
    if let Some(bundles) = &report.bundles {
        output::bundle_summary(out, bundles)?;
    }
    Ok(())
}
