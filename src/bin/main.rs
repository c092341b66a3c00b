use actix_web::{middleware::Logger, web, App, HttpServer};
use arena_server::battle::manager::BattleManager;
use arena_server::config::settings;
use arena_server::coord::{Coordination, RedisBackend};
use arena_server::storage::Collaborators;
use arena_server::{http, metrics, ws};
use std::env;
use std::sync::Arc;
use tokio::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());

    // Coordination backend: Redis when configured, local-only otherwise
    let coord = match env::var("REDIS_URL") {
        Ok(url) => match RedisBackend::open(&url) {
            Ok(backend) => Arc::new(Coordination::new(Some(backend))),
            Err(e) => {
                log::error!("invalid REDIS_URL, running local-only: {e:?}");
                Arc::new(Coordination::local_only())
            }
        },
        Err(_) => {
            log::warn!("REDIS_URL not set; matchmaking is local to this instance");
            Arc::new(Coordination::local_only())
        }
    };
    coord.clone().spawn_health_probe(Duration::from_secs(10));

    // In-memory collaborators; the data layer binds its own here in prod
    let (collab, _characters, _battles) = Collaborators::in_memory(settings().daily_battle_limit);

    let manager = BattleManager::new(coord.clone(), collab);
    manager.spawn_event_listener();
    manager.spawn_rescan();
    log::info!("arena server {} starting on {server_addr}", manager.server_id());

    let manager_data = web::Data::new(manager);
    let coord_data = web::Data::from(coord);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(metrics::METRICS.clone())
            .app_data(manager_data.clone())
            .app_data(coord_data.clone())
            .configure(http::routes::init_routes)
            .configure(ws::routes::init_routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
