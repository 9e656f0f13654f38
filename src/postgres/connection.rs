// ABOUTME: Opens tokio-postgres connections to the target with the configured TLS mode
// ABOUTME: Spawns the connection driver task and hands back the client

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::{Client, NoTls};

use crate::config::{SslMode, TargetConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// tokio-postgres has no verify modes of its own: `verify-ca` and `verify-full`
/// map to `Require`, and native-tls then checks the certificate chain and the
/// hostname. Config validation refuses `accept_invalid_certs` with those
/// modes, so they cannot be weakened to plain `require`.
fn build_config(target: &TargetConfig) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .dbname(&target.database)
        .user(&target.user)
        .connect_timeout(CONNECT_TIMEOUT)
        .application_name("analytics-replicator");
    if !target.password.is_empty() {
        config.password(&target.password);
    }
    config.ssl_mode(match target.sslmode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
    });
    config
}

/// Open a direct connection to the target database.
///
/// Certificates are verified unless `accept_invalid_certs` is set. The
/// connection task is spawned onto the runtime and logs when it ends with an
/// error.
pub async fn connect(target: &TargetConfig) -> Result<Client> {
    let config = build_config(target);
    let target_display = target.display_target();

    let client = if target.sslmode == SslMode::Disable {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .with_context(|| format!("Failed to connect to {}", target_display))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Target connection error: {}", e);
            }
        });
        client
    } else {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(target.accept_invalid_certs)
            .build()
            .context("Failed to build TLS connector")?;
        let (client, connection) = config
            .connect(MakeTlsConnector::new(connector))
            .await
            .with_context(|| format!("Failed to connect to {}", target_display))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Target connection error: {}", e);
            }
        });
        client
    };

    tracing::info!("Connected to target {}", target_display);
    Ok(client)
}
