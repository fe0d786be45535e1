use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use backend::config::{ModelManifest, Settings};
use backend::db::tracking_repository::{PgTrackingRepository, TrackingStore};
use backend::health::HealthMonitor;
use backend::inference::{Dispatch, TaskDispatcher};
use backend::logging;
use backend::pipeline::orchestrator::Orchestrator;
use backend::routes::configure_routes;
use backend::upstream::preprocess_service::{PreprocessClient, Preprocessor};
use std::io;
use std::sync::Arc;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    logging::init(&settings.logging)?;

    let manifest = ModelManifest::load(&settings.model_config_path)
        .map_err(|e| startup_error("Failed to load the model manifest", e))?;
    log::info!(
        "Loaded model manifest {} (version {})",
        settings.model_config_path.display(),
        manifest.version
    );

    let dispatcher = TaskDispatcher::from_manifest(&manifest)
        .map_err(|e| startup_error("Failed to prepare inference variants", e))?;
    let dispatcher: Arc<dyn Dispatch> = Arc::new(dispatcher);

    let tracker: Arc<dyn TrackingStore> = Arc::new(PgTrackingRepository::new(
        settings.database_url.clone(),
        settings.tracking_timeout,
    ));
    // The first tracked request retries this if the database is not up yet.
    match tracker.ensure_schema().await {
        Ok(()) => log::info!("Tracking table is ready"),
        Err(e) => log::error!("Failed to prepare the tracking table: {}", e),
    }

    let preprocessor: Arc<dyn Preprocessor> = Arc::new(
        PreprocessClient::new(settings.preprocess_url.clone(), settings.preprocess_timeout)
            .map_err(|e| startup_error("Failed to build the preprocessing client", e))?,
    );
    log::info!("Preprocessing service at {}", settings.preprocess_url);

    let orchestrator = web::Data::new(Orchestrator::new(
        preprocessor.clone(),
        dispatcher,
        tracker.clone(),
        settings.allowed_extensions.clone(),
    ));
    let monitor = web::Data::new(HealthMonitor::new(tracker, preprocessor));

    let bind_address = format!("0.0.0.0:{}", settings.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(monitor.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
