//! Read-only operational visibility: queue sizes and active battles.

use actix_web::{get, web, HttpResponse, Responder};

use crate::battle::manager::BattleManager;

#[get("/status")]
pub async fn status(manager: web::Data<BattleManager>) -> impl Responder {
    HttpResponse::Ok().json(manager.status().await)
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(status);
}
