use actix_cors::Cors;
use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, Result as ActixResult};
use jobmatch_core::{Error, UserQuery};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::service::Recommender;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    index_version: Option<u64>,
    live_entries: usize,
}

#[derive(Serialize)]
struct ReloadResponse {
    index_version: u64,
    live_entries: usize,
}

pub struct RestApi;

impl RestApi {
    pub async fn start(recommender: Arc<Recommender>, port: u16) -> std::io::Result<()> {
        info!("REST API listening on 0.0.0.0:{}", port);
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(recommender.clone()))
                .configure(routes)
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }
}

/// Route table, shared by the server and the handler tests
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/recommend", web::post().to(recommend))
        .route("/reload", web::post().to(reload))
        .route("/health", web::get().to(health));
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::QueryValidation(_) => StatusCode::BAD_REQUEST,
        Error::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Error::BuildInProgress => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &Error) -> HttpResponse {
    let status = status_of(e);
    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!("Request failed: {}", e);
    }
    HttpResponse::build(status).json(serde_json::json!({
        "error": e.to_string()
    }))
}

async fn recommend(
    recommender: web::Data<Arc<Recommender>>,
    req: web::Json<UserQuery>,
) -> ActixResult<HttpResponse> {
    let recommender = recommender.get_ref().clone();
    let query = req.into_inner();
    let result = web::block(move || recommender.recommend(&query)).await?;

    match result {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn reload(recommender: web::Data<Arc<Recommender>>) -> ActixResult<HttpResponse> {
    let recommender = recommender.get_ref().clone();
    let result = web::block(move || recommender.reload()).await?;

    match result {
        Ok(index) => Ok(HttpResponse::Ok().json(ReloadResponse {
            index_version: index.version(),
            live_entries: index.live_count(),
        })),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn health(recommender: web::Data<Arc<Recommender>>) -> ActixResult<HttpResponse> {
    let body = match recommender.manager().current() {
        Ok(index) => HealthResponse {
            status: "ok",
            index_version: Some(index.version()),
            live_entries: index.live_count(),
        },
        Err(_) => HealthResponse {
            status: "no_index",
            index_version: None,
            live_entries: 0,
        },
    };
    Ok(HttpResponse::Ok().json(body))
}
