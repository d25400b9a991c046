use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;

pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    // 快照由后台轮询刷新，这里只读取
    let snapshots = data.supervisor.snapshot().await;
    data.metrics.update(&snapshots);

    match data.metrics.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::configure;
    use crate::test_support::test_state;
    use actix_web::{test, web, App};

    #[actix_rt::test]
    async fn metrics_list_configured_entries() {
        let (_dir, state) = test_state("exit 0");
        state.supervisor.add("Worker1", false).await.unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("entry_up{"));
        assert!(text.contains("name=\"Worker1\""));
        assert!(text.contains("supervisor_entries 1"));
    }
}
