use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::api::error_response;
use crate::services::registry::{BatchReport, StartOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddEntryRequest {
    pub name: String,
    #[serde(default)]
    pub minimized: bool,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub names: Vec<String>,
}

pub async fn list_entries(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.supervisor.snapshot().await)
}

pub async fn add_entry(data: web::Data<AppState>, req: web::Json<AddEntryRequest>) -> HttpResponse {
    match data.supervisor.add(&req.name, req.minimized).await {
        Ok(()) => HttpResponse::Created().json(serde_json::json!({
            "status": "success",
            "message": format!("Entry '{}' added", req.name.trim()),
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_entry(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();
    match data.supervisor.delete(&name).await {
        Ok(stopped) => {
            let status = if stopped { "success" } else { "warning" };
            HttpResponse::Ok().json(serde_json::json!({
                "status": status,
                "message": format!("Entry '{}' removed", name),
                "stopped": stopped,
            }))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn start_entry(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();
    match data.supervisor.start(&name).await {
        Ok(outcome) => {
            let (status, message) = match &outcome {
                StartOutcome::Started { pid } => ("success", format!("'{}' started (PID: {})", name, pid)),
                StartOutcome::AlreadyRunning { pid } => {
                    ("success", format!("'{}' is already running (PID: {})", name, pid))
                }
                StartOutcome::ExitedEarly { .. } => ("warning", format!("'{}' exited right after launch", name)),
            };
            HttpResponse::Ok().json(serde_json::json!({
                "status": status,
                "message": message,
                "result": outcome,
            }))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn stop_entry(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();
    match data.supervisor.stop(&name).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("'{}' stopped", name),
            "stopped": true,
        })),
        Ok(false) => HttpResponse::Ok().json(serde_json::json!({
            "status": "warning",
            "message": format!("'{}' may still be running", name),
            "stopped": false,
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn batch_operation(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<BatchRequest>,
) -> HttpResponse {
    let operation = path.into_inner();
    let supervisor = &data.supervisor;

    let results = match operation.as_str() {
        "start" => batch_json(supervisor.batch_start(&req.names).await),
        "stop" => batch_json(supervisor.batch_stop(&req.names).await),
        "delete" => batch_json(supervisor.batch_delete(&req.names).await),
        other => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "status": "error",
                "message": format!("Unknown batch operation '{}'", other),
            }))
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "operation": operation,
        "results": results,
    }))
}

fn batch_json<T: Serialize>(report: BatchReport<T>) -> Vec<serde_json::Value> {
    report
        .results
        .into_iter()
        .map(|(name, result)| match result {
            Ok(value) => serde_json::json!({
                "name": name,
                "status": "success",
                "result": value,
            }),
            Err(e) => serde_json::json!({
                "name": name,
                "status": "error",
                "message": e.to_string(),
                "hint": e.hint(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::api::configure;
    use crate::test_support::test_state;
    use actix_web::{http::StatusCode, test, web, App};

    #[actix_rt::test]
    async fn add_list_and_delete_entries() {
        let (_dir, state) = test_state("exit 0");
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/entries")
            .set_json(serde_json::json!({"name": "Worker1", "minimized": true}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/entries")
            .set_json(serde_json::json!({"name": "Worker1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "error");

        let req = test::TestRequest::get().uri("/api/entries").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["name"], "Worker1");
        assert_eq!(body[0]["minimized"], true);
        assert_eq!(body[0]["running"], false);
        assert!(body[0]["cpu_percent"].is_null());

        let req = test::TestRequest::delete().uri("/api/entries/Worker1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::delete().uri("/api/entries/Worker1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn empty_name_is_a_bad_request() {
        let (_dir, state) = test_state("exit 0");
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/entries")
            .set_json(serde_json::json!({"name": "  "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[actix_rt::test]
    async fn start_and_stop_through_the_api() {
        let (_dir, state) = test_state("exec sleep 30");
        state.supervisor.add("Worker1", false).await.unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/entries/Worker1/start").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["result"]["outcome"], "started");

        let req = test::TestRequest::post().uri("/api/entries/Worker1/stop").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stopped"], true);
    }

    #[actix_rt::test]
    async fn batch_reports_each_entry() {
        let (_dir, state) = test_state("exit 0");
        state.supervisor.add("A", false).await.unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/batch/delete")
            .set_json(serde_json::json!({"names": ["A", "Missing"]}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["results"][0]["status"], "success");
        assert_eq!(body["results"][1]["status"], "error");

        let req = test::TestRequest::post()
            .uri("/api/batch/restart")
            .set_json(serde_json::json!({"names": []}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
