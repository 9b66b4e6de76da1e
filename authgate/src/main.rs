use anyhow::Context;
use authgate::{Application, Config, auth::password::CredentialHasher, build_gate, config::Args, telemetry};
use clap::Parser;
use std::io::BufRead;

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Read one password line from stdin and print its digest.
///
/// Only the Argon2 parameters are read from the configuration, so this works before a secret
/// key has been set up.
fn hash_password(args: &Args) -> anyhow::Result<()> {
    let config: Config = Config::figment(args).extract()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!password.is_empty(), "no password given on stdin");

    let digest = CredentialHasher::new(config.auth.password.argon2_params()).hash(password)?;
    println!("{digest}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    if args.hash_password {
        return hash_password(&args);
    }

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, compile the policy and exit
    if args.validate {
        let (_, directory) = build_gate(&config)?;
        println!(
            "Configuration is valid: {} authorization rules, {} identities.",
            config.authorization.rules.len(),
            directory.len()
        );
        return Ok(());
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(&config)?;

    tracing::debug!("{:?}", args);

    // Run the application with graceful shutdown on SIGTERM/Ctrl+C
    let shutdown = shutdown_signal();
    Application::new(config)?.serve(shutdown).await
}
