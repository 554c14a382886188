// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Notarium — document trust layer
//
// Entry point. Initialises logging and configuration, starts the
// idempotency sweeper, and timestamps every file named on the command line.
//
//   notarium <file>...
//
// NOTARIUM_CONFIG names a JSON config file; NOTARIUM_TSA_URL overrides the
// authority URL.

use std::process::ExitCode;
use std::sync::Arc;

use notarium_core::blob::MemoryBlobStore;
use notarium_core::config::NotariumConfig;
use notarium_core::error::Result;
use notarium_service::{NotaryService, spawn_sweeper};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Notarium starting");

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        eprintln!("usage: notarium <file>...");
        return ExitCode::from(2);
    }

    match run(files).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            eprintln!("notarium: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<NotariumConfig> {
    let mut config = match std::env::var_os("NOTARIUM_CONFIG") {
        Some(path) => NotariumConfig::load(path)?,
        None => NotariumConfig::default(),
    };
    if let Ok(url) = std::env::var("NOTARIUM_TSA_URL") {
        config.timestamp.tsa_url = url;
    }
    config.validate()?;
    Ok(config)
}

/// Stamp each file; `Ok(false)` if any of them failed.
async fn run(files: Vec<String>) -> Result<bool> {
    let config = load_config()?;
    let service = NotaryService::from_config(&config, Arc::new(MemoryBlobStore::new()))?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        service.store().clone(),
        config.idempotency.sweep_interval(),
        shutdown.child_token(),
    );

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let mut all_ok = true;
    for path in &files {
        let document = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("{path}: {e}");
                all_ok = false;
                continue;
            }
        };
        // The path doubles as the idempotency key for this run.
        match service.stamp(path, &document, &shutdown).await {
            Ok(receipt) => println!(
                "{path}\t{}\tserial={}\tgen_time={}",
                receipt.fingerprint,
                receipt.token.serial(),
                receipt.token.gen_time().to_rfc3339()
            ),
            Err(e) => {
                eprintln!("{path}: {e} [{}]", e.reason_code());
                all_ok = false;
            }
        }
    }

    shutdown.cancel();
    if let Ok(removed) = sweeper.await {
        tracing::debug!(removed, "sweeper joined");
    }
    Ok(all_ok)
}
