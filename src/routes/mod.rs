pub mod wsroute;

use actix_web::{web, HttpResponse};

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(crate::metrics::metrics_handler));
}
