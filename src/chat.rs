//! Text-chat client for the support widget
//!
//! The chat surface is the non-voice sibling of the live session: the user
//! types a message, the full transcript plus the screen-scoped system
//! instruction is sent to the generateContent endpoint, and the reply is
//! appended to the transcript.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::context;

const TEXT_MODEL: &str = "gemini-2.5-flash";
const GENERATE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// What happens to the transcript when the user navigates to another screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Clear the transcript so replies always match the current screen
    ResetOnScreenChange,
    /// Keep the transcript across navigation
    Preserve,
}

/// Errors that can occur during a chat exchange
#[derive(Debug)]
pub enum ChatError {
    MissingApiKey,
    NetworkError(String),
    ApiError { status: u16, message: String },
    /// The response parsed but contained no usable reply
    EmptyResponse,
    ParseError(String),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set GEMINI_API_KEY environment variable."
                )
            }
            ChatError::NetworkError(e) => write!(f, "Network error: {}", e),
            ChatError::ApiError { status, message } => {
                write!(f, "API error ({}): {}", status, message)
            }
            ChatError::EmptyResponse => write!(f, "API returned no reply text"),
            ChatError::ParseError(e) => write!(f, "Failed to parse API response: {}", e),
        }
    }
}

impl std::error::Error for ChatError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<ContentPayload>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentPayload>,
}

#[derive(Debug, Serialize)]
struct ContentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<PartPayload>,
}

#[derive(Debug, Serialize)]
struct PartPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Join the reply text across candidates and parts, in order.
fn reply_text(parsed: GenerateResponse) -> String {
    parsed
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("")
}

/// POST one request to the generateContent endpoint and extract the reply.
async fn generate(api_key: &str, request: &GenerateRequest) -> Result<String, ChatError> {
    if api_key.is_empty() {
        return Err(ChatError::MissingApiKey);
    }

    let url = format!("{}/{}:generateContent?key={}", GENERATE_URL, TEXT_MODEL, api_key);

    let response = get_http_client()
        .post(&url)
        .json(request)
        .send()
        .await
        .map_err(|e| ChatError::NetworkError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let message =
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                error_response.error.message
            } else {
                error_text
            };
        log::error!("Chat API error ({}): {}", status.as_u16(), message);
        return Err(ChatError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: GenerateResponse = response
        .json()
        .await
        .map_err(|e| ChatError::ParseError(e.to_string()))?;

    let reply = reply_text(parsed);
    if reply.is_empty() {
        return Err(ChatError::EmptyResponse);
    }
    Ok(reply)
}

// ---------------------------------------------------------------------------
// Chat transcript
// ---------------------------------------------------------------------------

/// Screen label shown inside the welcome message.
fn screen_label(screen: &str) -> &str {
    match screen {
        "how-it-works" => "Como Funciona",
        other => other,
    }
}

/// Greeting seeded into a fresh transcript. Presentation only; it is never
/// sent to the model.
fn welcome_message(screen: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Model,
        text: format!(
            "Olá! Estou vendo que você está em **{}**. Como posso ajudar?",
            screen_label(screen)
        ),
    }
}

/// A screen-aware chat transcript.
#[derive(Debug)]
pub struct ChatSession {
    screen: String,
    policy: HistoryPolicy,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(screen: impl Into<String>, policy: HistoryPolicy) -> Self {
        let screen = screen.into();
        let history = vec![welcome_message(&screen)];
        Self {
            screen,
            policy,
            history,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn screen(&self) -> &str {
        &self.screen
    }

    /// Record a navigation; applies the history policy.
    ///
    /// A reset starts the new transcript with a welcome message naming the
    /// screen, like the original widget.
    pub fn set_screen(&mut self, screen: impl Into<String>) {
        let screen = screen.into();
        if screen == self.screen {
            return;
        }

        if matches!(self.policy, HistoryPolicy::ResetOnScreenChange) {
            log::debug!("Chat: clearing {} messages on screen change", self.history.len());
            self.history.clear();
            self.history.push(welcome_message(&screen));
        }
        self.screen = screen;
    }

    /// Build the request for the current transcript.
    ///
    /// Seeded welcome messages are presentation only, so the contents start
    /// at the first user message.
    fn build_request(&self) -> GenerateRequest {
        GenerateRequest {
            contents: self
                .history
                .iter()
                .skip_while(|m| m.role != Role::User)
                .map(|m| ContentPayload {
                    role: Some(match m.role {
                        Role::User => "user",
                        Role::Model => "model",
                    }),
                    parts: vec![PartPayload {
                        text: m.text.clone(),
                    }],
                })
                .collect(),
            system_instruction: Some(ContentPayload {
                role: None,
                parts: vec![PartPayload {
                    text: context::system_instruction(&self.screen),
                }],
            }),
        }
    }

    /// Send one user message and append both sides to the transcript.
    ///
    /// On failure the user message is kept so the exchange can be retried.
    pub async fn send_message(
        &mut self,
        api_key: &str,
        text: impl Into<String>,
    ) -> Result<String, ChatError> {
        if api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        self.history.push(ChatMessage {
            role: Role::User,
            text: text.into(),
        });

        let reply = generate(api_key, &self.build_request()).await?;

        self.history.push(ChatMessage {
            role: Role::Model,
            text: reply.clone(),
        });

        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// Product-description optimizer
// ---------------------------------------------------------------------------

fn description_prompt(product_name: &str, current_description: &str) -> String {
    format!(
        "Atue como um especialista em E-commerce e SEO para Shopee Brasil.\n\
         Eu tenho um produto com o nome: \"{}\"\n\
         Descrição atual: \"{}\"\n\
         \n\
         Por favor, gere uma descrição de produto otimizada para vendas no Brasil.\n\
         Inclua:\n\
         1. Um título chamativo (máximo 60 caracteres).\n\
         2. Uma lista de benefícios (bullet points).\n\
         3. Especificações técnicas (se aplicável).\n\
         4. Gatilhos mentais de escassez ou urgência.\n\
         \n\
         Use português do Brasil, tom amigável e profissional. Retorne apenas o texto formatado.",
        product_name, current_description
    )
}

/// Rewrite a product listing into sales copy for the Brazilian market.
///
/// One-shot request; no transcript and no system instruction.
pub async fn generate_optimized_description(
    api_key: &str,
    product_name: &str,
    current_description: &str,
) -> Result<String, ChatError> {
    let request = GenerateRequest {
        contents: vec![ContentPayload {
            role: Some("user"),
            parts: vec![PartPayload {
                text: description_prompt(product_name, current_description),
            }],
        }],
        system_instruction: None,
    };

    generate(api_key, &request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transcript_opens_with_a_welcome() {
        let chat = ChatSession::new("dashboard", HistoryPolicy::ResetOnScreenChange);
        assert_eq!(chat.history().len(), 1);
        assert_eq!(chat.history()[0].role, Role::Model);
        assert!(chat.history()[0].text.contains("**dashboard**"));
    }

    #[test]
    fn reset_policy_reseeds_welcome_on_screen_change() {
        let mut chat = ChatSession::new("dashboard", HistoryPolicy::ResetOnScreenChange);
        chat.history.push(ChatMessage {
            role: Role::User,
            text: "oi".to_string(),
        });

        chat.set_screen("orders");
        assert_eq!(chat.history().len(), 1);
        assert!(chat.history()[0].text.contains("**orders**"));
        assert_eq!(chat.screen(), "orders");
    }

    #[test]
    fn welcome_uses_the_readable_label_for_how_it_works() {
        let mut chat = ChatSession::new("dashboard", HistoryPolicy::ResetOnScreenChange);
        chat.set_screen("how-it-works");
        assert!(chat.history()[0].text.contains("**Como Funciona**"));
    }

    #[test]
    fn preserve_policy_keeps_history_on_screen_change() {
        let mut chat = ChatSession::new("dashboard", HistoryPolicy::Preserve);
        chat.history.push(ChatMessage {
            role: Role::User,
            text: "oi".to_string(),
        });

        chat.set_screen("orders");
        assert_eq!(chat.history().len(), 2);
    }

    #[test]
    fn same_screen_navigation_never_clears() {
        let mut chat = ChatSession::new("dashboard", HistoryPolicy::ResetOnScreenChange);
        chat.history.push(ChatMessage {
            role: Role::User,
            text: "oi".to_string(),
        });

        chat.set_screen("dashboard");
        assert_eq!(chat.history().len(), 2);
    }

    #[tokio::test]
    async fn empty_api_key_fails_before_sending() {
        let mut chat = ChatSession::new("dashboard", HistoryPolicy::Preserve);
        let result = chat.send_message("", "oi").await;
        assert!(matches!(result, Err(ChatError::MissingApiKey)));
        // Nothing beyond the welcome is recorded for a request that never left
        assert_eq!(chat.history().len(), 1);
    }

    #[test]
    fn request_skips_the_welcome_and_starts_at_the_user_turn() {
        let mut chat = ChatSession::new("products", HistoryPolicy::ResetOnScreenChange);
        chat.history.push(ChatMessage {
            role: Role::User,
            text: "como calculo o lucro?".to_string(),
        });

        let request = chat.build_request();
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, Some("user"));
    }

    #[test]
    fn request_serializes_camel_case_system_instruction() {
        let request = GenerateRequest {
            contents: vec![ContentPayload {
                role: Some("user"),
                parts: vec![PartPayload {
                    text: "oi".to_string(),
                }],
            }],
            system_instruction: Some(ContentPayload {
                role: None,
                parts: vec![PartPayload {
                    text: "persona".to_string(),
                }],
            }),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"systemInstruction\""));
        assert!(!json.contains("\"role\":null"));
    }

    #[test]
    fn one_shot_request_omits_the_system_instruction() {
        let request = GenerateRequest {
            contents: vec![],
            system_instruction: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn description_prompt_embeds_the_listing() {
        let prompt = description_prompt("Fone Bluetooth X", "Fone sem fio barato");
        assert!(prompt.contains("\"Fone Bluetooth X\""));
        assert!(prompt.contains("\"Fone sem fio barato\""));
        assert!(prompt.contains("Shopee Brasil"));
        assert!(prompt.contains("60 caracteres"));
    }

    #[tokio::test]
    async fn description_generation_requires_an_api_key() {
        let result = generate_optimized_description("", "Fone", "desc").await;
        assert!(matches!(result, Err(ChatError::MissingApiKey)));
    }

    #[test]
    fn response_reply_text_is_joined_across_parts() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [{"text": "Olá! "}, {"text": "Como posso ajudar?"}]
                }
            }]
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(reply_text(parsed), "Olá! Como posso ajudar?");
    }
}
