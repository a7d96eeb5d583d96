use actix_web::{
    guard,
    web::{get, post, resource, ServiceConfig},
    HttpResponse,
};
use serde_json::json;

use crate::database::*;

pub(crate) fn init_app(cfg: &mut ServiceConfig) {
    cfg.service(resource("/").guard(guard::Get()).route(get().to(health)))
        .service(
            resource("/api/clusters/hierarchical")
                .guard(guard::Post())
                .route(post().to(get_hierarchical_clusters)),
        )
        .service(
            resource("/api/clusters/rebuild")
                .guard(guard::Post())
                .route(post().to(rebuild_clusters)),
        )
        .service(
            resource("/api/events/filter")
                .guard(guard::Post())
                .route(post().to(get_filtered_events)),
        )
        .service(
            resource("/api/insert-clusters")
                .guard(guard::Post())
                .route(post().to(insert_clusters)),
        )
        .service(
            resource("/api/events/cluster-mapping")
                .guard(guard::Get())
                .route(get().to(get_event_cluster_mapping)),
        )
        .service(
            resource("/api/events/cluster-mapping/csv")
                .guard(guard::Get())
                .route(get().to(get_event_cluster_mapping_csv)),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Globe backend is running",
    }))
}
