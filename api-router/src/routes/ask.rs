use axum::{extract::State, Json};
use retrieval_pipeline::AnswerResult;
use serde::Deserialize;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AskParams {
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
}

pub async fn ask_question(
    State(state): State<ApiState>,
    Json(input): Json<AskParams>,
) -> Result<Json<AnswerResult>, ApiError> {
    let k = input.k.unwrap_or(state.config.top_k);
    info!(
        question_chars = input.question.chars().count(),
        k,
        "Received question"
    );

    let result = state
        .service
        .answer_question_with_k(&input.question, k)
        .await?;

    Ok(Json(result))
}
