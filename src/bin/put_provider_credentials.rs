use std::{env, time::Duration};

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

use brokerlink_backend::config::DEFAULT_PARAMETER_NAMESPACE;
use brokerlink_backend::db::postgres_secret_store::PostgresSecretStore;
use brokerlink_backend::db::secret_store::{ParameterKind, ParameterWriteOutcome, SecretStore};
use brokerlink_backend::models::oauth_token::{BrokerProvider, ProviderCredentials};
use brokerlink_backend::utils::encryption::ParameterCipher;

/// Writes `{clientId, clientSecret, sessionSecret}` for one provider into the
/// parameter table.
///
/// Usage: `put_provider_credentials <schwab|tastytrade>` with
/// `{PROVIDER}_CLIENT_ID`, `{PROVIDER}_CLIENT_SECRET` and
/// `{PROVIDER}_SESSION_SECRET` set.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let raw_provider = env::args()
        .nth(1)
        .context("usage: put_provider_credentials <schwab|tastytrade>")?;
    let Some(provider) = BrokerProvider::parse(&raw_provider) else {
        bail!("unknown provider `{raw_provider}`");
    };

    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL is required to store credentials")?;
    let key_b64 = env::var("PARAMETER_ENCRYPTION_KEY")
        .context("PARAMETER_ENCRYPTION_KEY must be set")?;
    let cipher =
        ParameterCipher::from_base64(&key_b64).context("invalid PARAMETER_ENCRYPTION_KEY")?;

    let prefix = provider.as_str().to_ascii_uppercase();
    let read = |suffix: &str| {
        let name = format!("{prefix}_{suffix}");
        env::var(&name).with_context(|| format!("{name} must be set"))
    };
    let creds = ProviderCredentials {
        client_id: read("CLIENT_ID")?,
        client_secret: read("CLIENT_SECRET")?,
        session_secret: read("SESSION_SECRET")?,
    };
    if !creds.is_complete() {
        bail!("credential values must not be empty");
    }

    let parameter = match env::var(format!("{prefix}_CREDENTIALS_PARAMETER")) {
        Ok(name) if !name.trim().is_empty() => name,
        _ => {
            let namespace = env::var("PARAMETER_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_PARAMETER_NAMESPACE.to_string());
            format!("{}/{provider}/credentials", namespace.trim_end_matches('/'))
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let store = PostgresSecretStore::new(pool, cipher, Duration::from_secs(10));
    let outcome = store
        .put_parameter(
            &parameter,
            &serde_json::to_string(&creds)?,
            ParameterKind::Secure,
        )
        .await
        .context("failed to write credential parameter")?;

    match outcome {
        ParameterWriteOutcome::Created => println!("Created {parameter}"),
        ParameterWriteOutcome::Updated => println!("Updated {parameter}"),
    }

    Ok(())
}
