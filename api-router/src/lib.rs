use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{ask::ask_question, liveness::live, readiness::ready};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let questions = Router::new().route("/ask", post(ask_question));

    probes.merge(questions)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use common::{
        error::AppError,
        storage::types::system_prompts::NO_CONTEXT_MESSAGE,
        test_utils::sample_verses,
        utils::{config::AppConfig, embedding::EmbeddingProvider},
    };
    use retrieval_pipeline::{AnswerModel, AnswerSynthesizer, IndexBuilder, SearchService};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct CannedModel;

    #[async_trait]
    impl AnswerModel for CannedModel {
        async fn complete(&self, _system_prompt: &str, _user_message: String) -> Result<String, AppError> {
            Ok("Sanjaya narrates the battle to Dhritarashtra.".into())
        }
    }

    async fn app(built: bool) -> Router {
        let service = Arc::new(SearchService::new(
            Arc::new(EmbeddingProvider::new_hashed(128)),
            AnswerSynthesizer::new(Arc::new(CannedModel)),
            IndexBuilder::new(),
            3,
        ));
        if built {
            service.rebuild(sample_verses()).await.unwrap();
        }
        let state = ApiState::new(service, &AppConfig::default());
        Router::new()
            .nest("/api/v1", api_routes_v1())
            .with_state(state)
    }

    fn ask(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/ask")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ask_returns_answer_and_sources() {
        let response = app(true)
            .await
            .oneshot(ask(&json!({ "question": "Who narrates the war?", "k": 2 })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["outcome"], "answered");
        assert_eq!(body["answer"], "Sanjaya narrates the battle to Dhritarashtra.");
        assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_ascii_questions_are_answered() {
        let response = app(true)
            .await
            .oneshot(ask(&json!({ "question": "संजय कौन है?" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["question"], "संजय कौन है?");
        assert_eq!(body["sources"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn blank_question_is_bad_request() {
        let response = app(true)
            .await
            .oneshot(ask(&json!({ "question": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn unbuilt_index_answers_with_no_context_and_is_not_ready() {
        let app = app(false).await;

        let response = app
            .clone()
            .oneshot(ask(&json!({ "question": "Who is Arjuna?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["outcome"], "no_context");
        assert_eq!(body["answer"], NO_CONTEXT_MESSAGE);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn probes_report_ok_once_built() {
        let app = app(true).await;
        for uri in ["/api/v1/live", "/api/v1/ready"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }
}
