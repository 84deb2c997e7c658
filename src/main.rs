use actix_web::{middleware::Compress, web, App, HttpServer};
use actix_cors::Cors;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use askboard::config::AppConfig;
use askboard::openapi::ApiDoc;
use askboard::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use askboard::repo::Repo;
use askboard::{config, AppState, Forum, SecurityHeaders};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use askboard::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.context("failed to run migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use askboard::repo::inmem::{InMemRepo, SNAPSHOT_FILE};

    let path = cfg.data_dir.join(SNAPSHOT_FILE);
    info!("Using in-memory repository backend (snapshot: {})", path.display());
    Ok(Arc::new(InMemRepo::at(path)))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping askboard server");
    info!("Frontend URL: {}", cfg.frontend_url);

    let forum = Forum::new(build_repo(&cfg).await?);
    let rate_limiter = cfg
        .rate_limit_enabled
        .then(|| RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limits.clone()));
    if rate_limiter.is_none() {
        info!("Rate limiting disabled");
    }
    let state = AppState { forum, rate_limiter, admin_usernames: Arc::new(cfg.admin_usernames.clone()) };

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let frontend_url = cfg.frontend_url.clone();
    let enable_hsts = cfg.enable_hsts;
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PATCH", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::default().with_hsts(enable_hsts))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
