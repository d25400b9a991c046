pub mod config;
pub mod entries;
pub mod metrics;

pub use config::{import_names, load_config, save_config};
pub use entries::{add_entry, batch_operation, delete_entry, list_entries, start_entry, stop_entry};
pub use metrics::get_metrics;

use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::error::SupervisorError;
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 200;

/// 把领域错误映射为 HTTP 状态码与 JSON 错误体
pub fn error_response(err: &SupervisorError) -> HttpResponse {
    let status = match err {
        SupervisorError::EmptyName | SupervisorError::InvalidName(_) => StatusCode::BAD_REQUEST,
        SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::DuplicateName(_) | SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
        SupervisorError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SupervisorError::TemplateMissing(_) | SupervisorError::ArtifactMissing(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SupervisorError::SnapshotFormat { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SupervisorError::TerminationTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    HttpResponse::build(status).json(serde_json::json!({
        "status": "error",
        "message": err.to_string(),
        "hint": err.hint(),
    }))
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

/// 最近的生命周期日志
pub async fn recent_logs(data: web::Data<AppState>, query: web::Query<LogQuery>) -> impl Responder {
    let history = data.supervisor.events().history();
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let skip = history.len().saturating_sub(limit);

    let lines: Vec<_> = history
        .into_iter()
        .skip(skip)
        .map(|record| {
            serde_json::json!({
                "line": record.to_string(),
                "record": record,
            })
        })
        .collect();

    HttpResponse::Ok().json(lines)
}

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/entries", web::get().to(list_entries))
        .route("/api/entries", web::post().to(add_entry))
        .route("/api/entries/{name}", web::delete().to(delete_entry))
        .route("/api/entries/{name}/start", web::post().to(start_entry))
        .route("/api/entries/{name}/stop", web::post().to(stop_entry))
        .route("/api/batch/{operation}", web::post().to(batch_operation))
        .route("/api/config/save", web::post().to(save_config))
        .route("/api/config/load", web::post().to(load_config))
        .route("/api/import", web::post().to(import_names))
        .route("/api/logs", web::get().to(recent_logs))
        .route("/metrics", web::get().to(get_metrics))
        .route("/health", web::get().to(health));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn health_reports_healthy() {
        let (_dir, state) = test_state("exit 0");
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }

    #[actix_rt::test]
    async fn logs_are_limited_to_most_recent() {
        let (_dir, state) = test_state("exit 0");
        for name in ["A", "B", "C"] {
            state.supervisor.add(name, false).await.unwrap();
        }
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/logs?limit=2").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let lines = body.as_array().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1]["line"].as_str().unwrap().ends_with("entry 'C' added"));
        assert_eq!(lines[1]["record"]["event"]["kind"], "entry_added");
    }

    #[actix_rt::test]
    async fn errors_map_to_status_codes() {
        assert_eq!(
            error_response(&SupervisorError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(&SupervisorError::DuplicateName("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(error_response(&SupervisorError::EmptyName).status(), StatusCode::BAD_REQUEST);
    }
}
