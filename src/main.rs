use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use airgapperd::center::Center;
use airgapperd::clock::SystemClock;
use airgapperd::crypto::SigningKey;
use airgapperd::storage::Storage;
use airgapperd::{audit, log, policy, server, tickets};

fn main() -> ExitCode {
    let config = match airgapper_cfg::Config::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("airgapperd couldn't be configured: {error}");
            return ExitCode::FAILURE;
        }
    };

    let logger = match log::Logger::launch(&config.logging) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("airgapperd couldn't start logging: {error}");
            return ExitCode::FAILURE;
        }
    };

    let storage = Storage::new(config.base_path.clone());

    let policy = match load_policy(&storage, &config) {
        Ok(policy) => policy,
        Err(error) => {
            tracing::error!(%error, "failed to load policy");
            return ExitCode::FAILURE;
        }
    };

    let audit = match load_audit(&storage, &config) {
        Ok(audit) => audit,
        Err(error) => {
            tracing::error!(%error, "failed to load audit chain");
            return ExitCode::FAILURE;
        }
    };

    let tickets = match tickets::load(&storage.tickets_path()) {
        Ok(tickets) => tickets,
        Err(error) => {
            tracing::error!(%error, "failed to load ticket store");
            return ExitCode::FAILURE;
        }
    };

    let listen_addr = config.listen_addr;
    let center = Arc::new(Center::new(
        storage,
        config,
        logger,
        audit,
        tickets,
        Box::new(SystemClock),
        policy,
    ));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("couldn't start Tokio: {error}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let listener = match tokio::net::TcpListener::bind(listen_addr).await {
            Ok(listener) => listener,
            Err(error) => {
                tracing::error!(%error, %listen_addr, "failed to bind listen address");
                return ExitCode::FAILURE;
            }
        };

        tracing::info!(%listen_addr, "airgapperd listening");

        let app = server::router(center);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                tracing::error!(%error, "server exited with an error");
                ExitCode::FAILURE
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "listening for CTRL-C (SIGINT) failed");
    }
    tracing::info!("shutting down");
}

/// Install the policy named on the command line if none is persisted yet,
/// otherwise load whatever is already on disk (spec §6).
fn load_policy(storage: &Storage, config: &airgapper_cfg::Config) -> std::io::Result<Option<policy::Policy>> {
    let persisted_path = storage.policy_path();
    if let Some(persisted) = policy::file::Spec::load(&persisted_path)? {
        return Ok(Some(persisted));
    }

    let Some(seed_path) = &config.policy_path else {
        return Ok(None);
    };

    let Some(seed) = policy::file::Spec::load(seed_path)? else {
        return Ok(None);
    };

    if seed.verify().is_err() {
        tracing::warn!(%seed_path, "preconfigured policy does not verify; ignoring");
        return Ok(None);
    }

    policy::file::Spec::save(&seed, &persisted_path)?;
    Ok(Some(seed))
}

/// Load the audit chain, generating and persisting the daemon's own
/// audit-signing key on first use when `--audit-sign` is set (spec's
/// "secret-key generation and key-pair lifecycle" non-goal doesn't cover
/// this key: it is wholly owned and managed by the daemon, unlike a
/// policy's owner/host keys).
fn load_audit(storage: &Storage, config: &airgapper_cfg::Config) -> std::io::Result<audit::AuditChain> {
    let signing_key = if config.audit_sign {
        Some(load_or_generate_audit_key(storage)?)
    } else {
        None
    };

    let mut chain = audit::AuditChain::load(storage.audit_path(), signing_key)?;
    chain.set_enabled(config.audit_enabled);
    Ok(chain)
}

fn load_or_generate_audit_key(storage: &Storage) -> std::io::Result<SigningKey> {
    let path = storage.audit_signing_key_path();
    let existing = airgapperd::util::read_file_or_empty(&path)?;
    if !existing.is_empty() {
        return SigningKey::from_pkcs8(&existing)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()));
    }

    let (key, pkcs8) = SigningKey::generate_with_pkcs8()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
    airgapperd::util::write_file(&path, &pkcs8)?;
    Ok(key)
}
