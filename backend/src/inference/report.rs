use super::{ChatModel, InferenceError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// The two shapes a chat reply may take: the usual nested message object, or
/// a bare string in its place.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatReply {
    Structured { message: ReplyMessage },
    Plain { message: String },
}

impl ChatReply {
    fn into_text(self) -> String {
        match self {
            ChatReply::Structured { message } => message.content,
            ChatReply::Plain { message } => message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Chat client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaChat {
    http_client: reqwest::Client,
    base_url: Url,
    model: String,
}

impl OllamaChat {
    pub fn new(base_url: Url, model: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
            model: model.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InferenceError> {
        self.base_url
            .join(path)
            .map_err(|e| InferenceError::ChatResponse(format!("invalid endpoint {path}: {e}")))
    }

    /// Checks whether the configured model has been pulled on the server.
    pub async fn is_model_available(&self) -> Result<bool, InferenceError> {
        let response = self
            .http_client
            .get(self.endpoint("api/tags")?)
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags_contain(&tags, &self.model))
    }

    async fn send(&self, prompt: String) -> Result<String, InferenceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            stream: false,
        };

        let response = self
            .http_client
            .post(self.endpoint("api/chat")?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(InferenceError::ChatResponse(format!(
                "{} returned {}: {}",
                self.model, status, error_text
            )));
        }

        let body = response.text().await?;
        parse_reply(&body)
    }
}

impl ChatModel for OllamaChat {
    fn chat(&self, prompt: String) -> BoxFuture<'_, Result<String, InferenceError>> {
        Box::pin(self.send(prompt))
    }
}

fn parse_reply(body: &str) -> Result<String, InferenceError> {
    serde_json::from_str::<ChatReply>(body)
        .map(ChatReply::into_text)
        .map_err(|e| InferenceError::ChatResponse(e.to_string()))
}

fn tags_contain(tags: &TagsResponse, model: &str) -> bool {
    tags.models.iter().any(|entry| {
        entry.name == model
            || entry
                .name
                .strip_prefix(model)
                .is_some_and(|tag| tag.starts_with(':'))
    })
}

pub fn report_prompt(caption: &str, diagnosis: &str, confidence: f32) -> String {
    format!(
        "You are a dermatologist specialized in skin oncology. \
         Based on the description of the skin lesion image and the preliminary diagnosis provided, \
         write a complete and structured clinical report in the form of a cohesive text, organized in paragraphs without titles, \
         as if it were a medical essay. Describe the diagnosis of the image using the following characteristics:\n\n\
         **Image Description**: {caption}\n\
         **Preliminary Diagnosis**: {diagnosis}\n\
         **Model Confidence**: {:.1}%\n\n\
         Write the report in a clear, concise manner using technical language appropriate for healthcare professionals.\
         saida em portugues brasileiro",
        confidence * 100.0
    )
}

/// Turns caption, diagnosis and confidence into a clinical report through a
/// chat model. Every call is a fresh single-turn conversation.
#[derive(Clone)]
pub struct ReportComposer {
    chat: Arc<dyn ChatModel>,
}

impl ReportComposer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    pub async fn compose(
        &self,
        caption: &str,
        diagnosis: &str,
        confidence: f32,
    ) -> Result<String, InferenceError> {
        let prompt = report_prompt(caption, diagnosis, confidence);
        let report = self.chat.chat(prompt).await?;
        Ok(report.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingChat {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ChatModel for RecordingChat {
        fn chat(&self, prompt: String) -> BoxFuture<'_, Result<String, InferenceError>> {
            self.prompts.lock().unwrap().push(prompt);
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    #[test]
    fn nested_message_content_is_preferred() {
        let body = r#"{"model":"llama3.2","message":{"role":"assistant","content":"Laudo."},"done":true}"#;
        assert_eq!(parse_reply(body).unwrap(), "Laudo.");
    }

    #[test]
    fn bare_message_string_is_accepted() {
        assert_eq!(parse_reply(r#"{"message":"Laudo simples"}"#).unwrap(), "Laudo simples");
    }

    #[test]
    fn reply_without_message_is_an_error() {
        assert!(matches!(
            parse_reply(r#"{"error":"model not found"}"#),
            Err(InferenceError::ChatResponse(_))
        ));
        assert!(parse_reply("not json").is_err());
    }

    #[test]
    fn prompt_embeds_caption_diagnosis_and_percentage() {
        let prompt = report_prompt("lesão pigmentada", "Melanoma", 0.8734);
        assert!(prompt.contains("**Image Description**: lesão pigmentada\n"));
        assert!(prompt.contains("**Preliminary Diagnosis**: Melanoma\n"));
        assert!(prompt.contains("**Model Confidence**: 87.3%"));
        assert!(prompt.contains("without titles"));
        assert!(prompt.ends_with("portugues brasileiro"));
    }

    #[test]
    fn model_tags_match_with_or_without_version() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"llama3.2:latest"},{"name":"mistral"}]}"#,
        )
        .unwrap();
        assert!(tags_contain(&tags, "llama3.2"));
        assert!(tags_contain(&tags, "mistral"));
        assert!(!tags_contain(&tags, "llama3"));
    }

    #[test]
    fn endpoints_resolve_against_base_url() {
        let chat = OllamaChat::new(
            Url::parse("http://localhost:11434").unwrap(),
            "llama3.2",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            chat.endpoint("api/chat").unwrap().as_str(),
            "http://localhost:11434/api/chat"
        );
    }

    #[actix_web::test]
    async fn composer_sends_one_turn_and_trims() {
        let chat = Arc::new(RecordingChat {
            reply: "\n  O exame revela...  \n".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let composer = ReportComposer::new(chat.clone());

        let report = composer.compose("mácula", "Dermatofibroma", 0.5).await.unwrap();
        assert_eq!(report, "O exame revela...");

        let prompts = chat.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("50.0%"));
    }
}
