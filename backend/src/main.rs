mod config;
mod error;
mod inference;
mod routes;
mod upload;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use config::ServerConfig;
use inference::model::{Model, ModelSlot};
use routes::{AppState, configure_routes};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServerConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e)
    })?;
    log::debug!("Effective configuration: {:?}", config);

    if let Some(dir) = &config.upload.dir {
        std::fs::create_dir_all(dir)?;
        log::info!("Spooling uploads to {}", dir.display());
    }

    // The listener is only bound once the model is ready.
    let slot = ModelSlot::new();
    log::info!("Loading model from {}", config.model.path.display());
    match Model::load(&config.model) {
        Ok(model) => {
            log::info!(
                "Model loaded successfully ({} backend, serialized: {})",
                model.backend(),
                model.is_serialized()
            );
            slot.set_ready(model).await;
        }
        Err(e) => {
            log::error!("Failed to load model at startup: {}", e);
            return Err(std::io::Error::other(format!("Model loading failed: {}", e)));
        }
    }

    let state = web::Data::new(AppState::new(slot, &config));
    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
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
            .app_data(state.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
