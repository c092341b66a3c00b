//! Simple liveness / readiness probe

use actix_web::{get, web, HttpResponse, Responder};

use crate::coord::Coordination;

#[get("/healthz")]
pub async fn healthz(coord: web::Data<Coordination>) -> impl Responder {
    if coord.ping().await.is_err() {
        return HttpResponse::ServiceUnavailable().body("coordination");
    }
    if coord.is_degraded() {
        // serving, but only from the local fallback
        return HttpResponse::Ok().body("degraded");
    }
    HttpResponse::Ok().body("ok")
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz);
}
