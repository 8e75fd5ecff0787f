use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::system_prompts::DEFAULT_QUERY_SYSTEM_PROMPT,
    utils::config::AppConfig,
};
use thiserror::Error;
use tracing::{debug, instrument};

/// Chat completion backend used to phrase the final answer.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_message: String) -> Result<String, AppError>;
}

/// Any OpenAI-compatible chat endpoint, including Gemini's compatibility layer.
pub struct OpenAiAnswerModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiAnswerModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl AnswerModel for OpenAiAnswerModel {
    async fn complete(&self, system_prompt: &str, user_message: String) -> Result<String, AppError> {
        let request = create_chat_request(&self.model, system_prompt, user_message)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::Synthesis(format!("chat completion failed: {e}")))?;
        Ok(process_llm_response(response))
    }
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context}

        User Question:
        ==================
        {question}
        "
    )
}

pub fn create_chat_request(
    model: &str,
    system_prompt: &str,
    user_message: String,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(system_prompt.to_owned()).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

/// Text of the first choice, or an empty string when the model sent none.
pub fn process_llm_response(response: CreateChatCompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Answer model failed: {0}")]
    Provider(String),
    #[error("Answer model returned an empty response")]
    Empty,
    #[error("Answer model timed out after {0}s")]
    Timeout(u64),
}

/// Turns a question plus retrieved context into a short prose answer.
pub struct AnswerSynthesizer {
    model: Arc<dyn AnswerModel>,
    system_prompt: String,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn AnswerModel>) -> Self {
        Self {
            model,
            system_prompt: DEFAULT_QUERY_SYSTEM_PROMPT.to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        let synthesizer = Self::new(Arc::new(OpenAiAnswerModel::new(
            client,
            config.query_model.clone(),
        )))
        .with_timeout(Duration::from_secs(config.provider_timeout_secs));

        match config
            .query_system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
        {
            Some(prompt) => synthesizer.with_system_prompt(prompt),
            None => synthesizer,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    #[instrument(skip_all)]
    pub async fn synthesize(&self, question: &str, context: &str) -> Result<String, SynthesisError> {
        let user_message = create_user_message(context, question);

        let answer = tokio::time::timeout(
            self.timeout,
            self.model.complete(&self.system_prompt, user_message),
        )
        .await
        .map_err(|_| SynthesisError::Timeout(self.timeout.as_secs()))?
        .map_err(|e| SynthesisError::Provider(e.to_string()))?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SynthesisError::Empty);
        }

        debug!(chars = answer.len(), "Answer synthesized");
        Ok(answer.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedModel {
        reply: Result<String, String>,
        delay: Duration,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_owned()),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnswerModel for ScriptedModel {
        async fn complete(
            &self,
            system_prompt: &str,
            user_message: String,
        ) -> Result<String, AppError> {
            self.seen
                .lock()
                .unwrap()
                .push((system_prompt.to_owned(), user_message));
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(AppError::Synthesis)
        }
    }

    #[test]
    fn user_message_carries_context_and_question() {
        let message = create_user_message("Sloka 1 (rank 1):\nVerse: x", "Who is Sanjaya?");
        let context_at = message.find("Sloka 1 (rank 1)").unwrap();
        let question_at = message.find("Who is Sanjaya?").unwrap();
        assert!(message.contains("Context Information:"));
        assert!(context_at < question_at);
    }

    #[test]
    fn chat_request_has_system_then_user_message() {
        let request =
            create_chat_request("gemini-2.0-flash", "be brief", "question".into()).unwrap();
        assert_eq!(request.model, "gemini-2.0-flash");
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn synthesize_trims_the_model_reply() {
        let model = Arc::new(ScriptedModel::replying("  Drona was the teacher.\n"));
        let synthesizer = AnswerSynthesizer::new(model.clone()).with_system_prompt("custom prompt");

        let answer = synthesizer
            .synthesize("Who is Drona?", "Sloka 3 (rank 1):\nVerse: ...")
            .await
            .unwrap();

        assert_eq!(answer, "Drona was the teacher.");
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].0, "custom prompt");
        assert!(seen[0].1.contains("Who is Drona?"));
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(ScriptedModel::replying("   ")));
        assert!(matches!(
            synthesizer.synthesize("q", "c").await,
            Err(SynthesisError::Empty)
        ));
    }

    #[tokio::test]
    async fn provider_errors_and_timeouts_are_reported() {
        let failing = ScriptedModel {
            reply: Err("quota exceeded".into()),
            ..ScriptedModel::replying("")
        };
        let synthesizer = AnswerSynthesizer::new(Arc::new(failing));
        assert!(matches!(
            synthesizer.synthesize("q", "c").await,
            Err(SynthesisError::Provider(_))
        ));

        let slow = ScriptedModel {
            delay: Duration::from_millis(200),
            ..ScriptedModel::replying("too late")
        };
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(slow)).with_timeout(Duration::from_millis(10));
        assert!(matches!(
            synthesizer.synthesize("q", "c").await,
            Err(SynthesisError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_chat_endpoint_is_a_synthesis_error() {
        let client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:9/v1"),
        ));
        let model = OpenAiAnswerModel::new(client, "gemini-2.0-flash");

        let result = model.complete("system", "question".into()).await;
        assert!(matches!(result, Err(AppError::Synthesis(_))));
    }

    #[test]
    fn blank_configured_prompt_keeps_the_default() {
        let client = Arc::new(Client::with_config(OpenAIConfig::new()));
        let config = AppConfig {
            query_system_prompt: Some("  ".into()),
            ..Default::default()
        };
        let synthesizer = AnswerSynthesizer::from_config(&config, client);
        assert_eq!(synthesizer.system_prompt(), DEFAULT_QUERY_SYSTEM_PROMPT);
    }
}
