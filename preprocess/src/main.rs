use actix_web::{App, HttpServer};
use preprocess::routes::configure_routes;
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let port = env::var("PORT").unwrap_or_else(|_| "5002".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting preprocessing service on {}", bind_address);

    HttpServer::new(|| App::new().configure(configure_routes))
        .bind(&bind_address)?
        .run()
        .await
}
