use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use brokerlink_backend::config::{Config, SecretStoreBackend};
use brokerlink_backend::db::{
    memory_secret_store::InMemorySecretStore,
    postgres_secret_store::PostgresSecretStore,
    secret_store::{ParameterKind, SecretStore},
};
use brokerlink_backend::models::oauth_token::{BrokerProvider, ProviderCredentials};
use brokerlink_backend::responses::JsonResponse;
use brokerlink_backend::routes;
use brokerlink_backend::services::oauth::{
    client::OAuthClient, credentials::CredentialSource, gate::ConnectionGate,
    token_cache::TokenCache,
};
use brokerlink_backend::utils::{encryption::ParameterCipher, jwt::IdentityVerifier};
use brokerlink_backend::AppState;

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    let identity = Arc::new(
        IdentityVerifier::from_env(&config.jwt_issuer, &config.jwt_audience)
            .context("invalid identity token secret")?,
    );

    let store = build_secret_store(&config).await?;
    let http_client = Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let state = AppState {
        schwab: build_gate(&config, BrokerProvider::Schwab, &store, &http_client).await,
        tastytrade: build_gate(&config, BrokerProvider::TastyTrade, &store, &http_client).await,
        identity,
        config: config.clone(),
    };

    let rate_limit_s: u64 = std::env::var("RATE_LIMITER_OAUTH_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_OAUTH_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let oauth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(rate_limit_s)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .ok_or_else(|| anyhow!("invalid rate limiter settings"))?,
    );

    let governor_limiter = oauth_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/", get(root))
        .nest(
            "/api",
            routes::oauth::router().layer(GovernorLayer {
                config: oauth_governor_conf,
            }),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.bind_addr;

    #[cfg(feature = "tls")]
    {
        let cert = std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?;
        let key = std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?;
        let tls_config = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certs")?;

        info!(%addr, "listening with TLS");
        axum_server::bind_rustls(addr, tls_config)
            .serve(make_service)
            .await?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening without TLS");
        axum::serve(listener, make_service).await?;
        Ok(())
    }
}

async fn root() -> Response {
    JsonResponse::success("brokerlink backend").into_response()
}

async fn build_secret_store(config: &Config) -> Result<Arc<dyn SecretStore>> {
    match &config.secret_store {
        SecretStoreBackend::Postgres {
            database_url,
            encryption_key,
        } => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(config.http_timeout)
                .connect(database_url)
                .await
                .context("failed to connect to the database")?;
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .context("failed to verify database connection")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("failed to run migrations")?;
            info!("connected to parameter database");

            let cipher = ParameterCipher::new(encryption_key)?;
            Ok(Arc::new(PostgresSecretStore::new(
                pool,
                cipher,
                config.http_timeout,
            )))
        }
        SecretStoreBackend::Memory => {
            warn!("using in-memory secret store; tokens are lost on restart");
            let store = InMemorySecretStore::new();
            for provider in BrokerProvider::ALL {
                seed_credentials_from_env(&store, config, provider)?;
            }
            Ok(Arc::new(store))
        }
    }
}

/// Local runs: `{PROVIDER}_CLIENT_ID`, `_CLIENT_SECRET` and `_SESSION_SECRET`
/// become the credential parameter when all three are present.
fn seed_credentials_from_env(
    store: &InMemorySecretStore,
    config: &Config,
    provider: BrokerProvider,
) -> Result<()> {
    let prefix = provider.as_str().to_ascii_uppercase();
    let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();
    let (Some(client_id), Some(client_secret), Some(session_secret)) =
        (var("CLIENT_ID"), var("CLIENT_SECRET"), var("SESSION_SECRET"))
    else {
        return Ok(());
    };

    let creds = ProviderCredentials {
        client_id,
        client_secret,
        session_secret,
    };
    let parameter = &config.oauth.provider(provider).credentials_parameter;
    store.insert(
        parameter,
        &serde_json::to_string(&creds)?,
        ParameterKind::Secure,
    );
    info!(%provider, %parameter, "seeded provider credentials from environment");
    Ok(())
}

async fn build_gate(
    config: &Config,
    provider: BrokerProvider,
    store: &Arc<dyn SecretStore>,
    http_client: &Client,
) -> Arc<ConnectionGate> {
    let settings = config.oauth.provider(provider);

    let credentials = Arc::new(CredentialSource::new(
        provider,
        settings.credentials_parameter.clone(),
        store.clone(),
    ));
    credentials.preload().await;

    let oauth = Arc::new(OAuthClient::new(
        provider,
        http_client.clone(),
        settings,
        config.http_timeout,
    ));

    Arc::new(ConnectionGate::new(
        credentials,
        TokenCache::new(store.clone(), settings.token_parameter_prefix.clone()),
        oauth,
        settings.redirect_uri.clone(),
        config.state_max_age,
    ))
}
