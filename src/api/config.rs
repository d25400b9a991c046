use actix_web::{web, HttpResponse};

use crate::api::error_response;
use crate::state::AppState;

pub async fn save_config(data: web::Data<AppState>) -> HttpResponse {
    let path = data.supervisor.config().snapshot_path.clone();
    match data.supervisor.save_to(&path).await {
        Ok(saved) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Configuration saved to '{}'", path.display()),
            "saved": saved,
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn load_config(data: web::Data<AppState>) -> HttpResponse {
    let path = data.supervisor.config().snapshot_path.clone();
    match data.supervisor.load_from(&path).await {
        Ok(Some(summary)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Loaded {} entries from '{}'", summary.loaded, path.display()),
            "summary": summary,
        })),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("Configuration file '{}' not found", path.display()),
        })),
        Err(e) => error_response(&e),
    }
}

/// 请求体为纯文本，每行一个名称
pub async fn import_names(data: web::Data<AppState>, body: String) -> HttpResponse {
    let summary = data.supervisor.import_names(&body).await;
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": format!("Imported {} names", summary.added),
        "summary": summary,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::configure;
    use crate::test_support::test_state;
    use actix_web::{http::StatusCode, test, web, App};

    #[actix_rt::test]
    async fn save_then_load_round_trip() {
        let (_dir, state) = test_state("exit 0");
        state.supervisor.add("A", false).await.unwrap();
        state.supervisor.add("B", true).await.unwrap();
        let supervisor = state.supervisor.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post().uri("/api/config/load").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/api/config/save").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["saved"], 2);

        supervisor.delete("A").await.unwrap();
        let req = test::TestRequest::post().uri("/api/config/load").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["summary"]["loaded"], 2);
        assert_eq!(supervisor.names().await, vec!["A", "B"]);
    }

    #[actix_rt::test]
    async fn import_accepts_plain_text() {
        let (_dir, state) = test_state("exit 0");
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/import")
            .insert_header(("content-type", "text/plain"))
            .set_payload("Worker1\nWorker2\nWorker1\n")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["summary"]["added"], 2);
        assert_eq!(body["summary"]["skipped"], 1);
    }
}
