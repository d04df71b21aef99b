//! OpenAI-compatible chat-completions client. Works against OpenRouter,
//! OpenAI and Ollama's `/v1` endpoint; only the base URL and key differ.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::config::LlmConfig;
use concierge_core::{FunctionCallRequest, FunctionSpec, Turn};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest};

#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenRouterClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            base_url: config.effective_base_url().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn transport_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Transport(error.to_string())
        }
    }

    fn build_body(&self, request: &LlmRequest<'_>) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage::text("system", request.system_prompt));
        for turn in request.messages {
            messages.push(WireMessage::from_turn(turn));
        }

        let tools: Vec<WireTool> = request.functions.iter().map(WireTool::from_spec).collect();
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, request: LlmRequest<'_>) -> Result<LlmReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        debug!(
            event_name = "llm.request_sent",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map(Vec::len).unwrap_or(0),
            "sending chat completion request"
        );

        let response = builder.send().await.map_err(|error| self.transport_error(error))?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.map_err(|error| self.transport_error(error))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        parse_reply(parsed)
    }
}

fn parse_reply(response: ChatResponse) -> Result<LlmReply, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

    let text = choice.message.content.filter(|content| !content.trim().is_empty());
    let tool_calls = choice.message.tool_calls.unwrap_or_default();

    if tool_calls.is_empty() {
        return text
            .map(LlmReply::Text)
            .ok_or_else(|| LlmError::InvalidResponse("reply has neither text nor calls".into()));
    }

    let calls = tool_calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let call_id =
                if call.id.is_empty() { format!("call_{index}") } else { call.id };
            FunctionCallRequest::new(
                call_id.as_str(),
                call.function.name,
                parse_arguments(call.function.arguments),
            )
        })
        .collect();

    Ok(LlmReply::FunctionCalls { text, calls })
}

/// Tool arguments arrive as a JSON string. A string that does not parse is
/// kept verbatim so dispatch can reject it as invalid arguments.
fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn render_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    fn from_turn(turn: &Turn) -> Self {
        match turn {
            Turn::User { text } => Self::text("user", text),
            Turn::Assistant { text } => Self::text("assistant", text),
            Turn::FunctionCalls { text, calls } => Self {
                role: "assistant".to_string(),
                content: text.clone(),
                tool_call_id: None,
                tool_calls: Some(
                    calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.call_id.as_str().to_string(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: call.function_name.clone(),
                                arguments: render_arguments(&call.arguments),
                            },
                        })
                        .collect(),
                ),
            },
            Turn::FunctionResult { result } => Self {
                role: "tool".to_string(),
                content: Some(result.content.clone()),
                tool_call_id: Some(result.call_id.as_str().to_string()),
                tool_calls: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: Value,
}

impl WireTool {
    fn from_spec(spec: &FunctionSpec) -> Self {
        Self { kind: "function", function: spec.to_wire() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    /// Some providers omit this; `parse_reply` fills in a per-response id.
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use concierge_core::config::AppConfig;
    use concierge_core::{
        FunctionCallRequest, FunctionCallResult, FunctionSpec, ParameterSchema, ParameterType,
        Turn,
    };
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{parse_reply, ChatResponse, OpenRouterClient};
    use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest};

    fn client() -> OpenRouterClient {
        OpenRouterClient::from_config(&AppConfig::default().llm).expect("client builds")
    }

    /// Answers exactly one HTTP request with `response` and returns the base
    /// URL to point the client at.
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind local listener");
        let address = listener.local_addr().expect("local address");

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buf[..read]),
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{address}/v1")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn http_response(status: &str, headers: &[&str], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {status}\r\n");
        for header in headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));
        response.push_str(body);
        response
    }

    async fn complete_against(response: String) -> Result<LlmReply, LlmError> {
        let mut config = AppConfig::default().llm;
        config.base_url = Some(serve_once(response).await);
        let client = OpenRouterClient::from_config(&config).expect("client builds");
        let history = vec![Turn::user("any doubles left?")];

        client
            .complete(LlmRequest {
                system_prompt: "You run the front desk.",
                messages: &history,
                functions: &[],
            })
            .await
    }

    #[test]
    fn request_body_wraps_functions_and_replays_tool_turns() {
        let call = FunctionCallRequest::new(
            "call-1",
            "check_room_availability",
            json!({"date": "2024-01-01", "roomType": "double"}),
        );
        let history = vec![
            Turn::user("is a double free on new year's day?"),
            Turn::FunctionCalls { text: None, calls: vec![call.clone()] },
            Turn::FunctionResult {
                result: FunctionCallResult::success(&call, r#"{"available":true}"#.to_string()),
            },
        ];
        let functions = vec![FunctionSpec::new(
            "check_room_availability",
            "Check availability",
            ParameterSchema::object().required("date", ParameterType::String, "ISO date"),
        )];
        let request = LlmRequest {
            system_prompt: "You run the front desk.",
            messages: &history,
            functions: &functions,
        };

        let body = serde_json::to_value(client().build_body(&request)).expect("serializes");

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "call-1");
        assert_eq!(body["messages"][2]["tool_calls"][0]["type"], "function");
        let arguments = body["messages"][2]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .expect("arguments are a string");
        assert_eq!(
            serde_json::from_str::<Value>(arguments).expect("json"),
            json!({"date": "2024-01-01", "roomType": "double"})
        );
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call-1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "check_room_availability");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["date"]));
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn tool_calls_are_parsed_with_json_arguments() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function",
                         "function": {"name": "query_rooms", "arguments": "{\"query\":\"suite\"}"}},
                        {"id": "c2", "type": "function",
                         "function": {"name": "query_rooms", "arguments": "{broken"}}
                    ]
                }
            }]
        }))
        .expect("response parses");

        let reply = parse_reply(response).expect("reply");
        let LlmReply::FunctionCalls { text, calls } = reply else {
            panic!("expected function calls");
        };
        assert!(text.is_none());
        assert_eq!(calls[0].arguments, json!({"query": "suite"}));
        assert_eq!(calls[1].arguments, Value::String("{broken".to_string()));
    }

    #[test]
    fn missing_tool_call_ids_are_numbered_per_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [
                        {"function": {"name": "query_rooms", "arguments": "{\"query\":\"sea\"}"}},
                        {"id": "given", "function": {"name": "query_rooms", "arguments": ""}}
                    ]
                }
            }]
        }))
        .expect("response parses");

        let Ok(LlmReply::FunctionCalls { calls, .. }) = parse_reply(response) else {
            panic!("expected function calls");
        };
        assert_eq!(calls[0].call_id.as_str(), "call_0");
        assert_eq!(calls[1].call_id.as_str(), "given");
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn empty_choices_are_invalid() {
        let response: ChatResponse =
            serde_json::from_value(json!({"choices": []})).expect("response parses");

        assert!(matches!(parse_reply(response), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn plain_content_is_a_text_reply() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "We open at 8."}}]
        }))
        .expect("response parses");

        assert_eq!(parse_reply(response), Ok(LlmReply::Text("We open at 8.".to_string())));
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let mut config = AppConfig::default().llm;
        config.api_key = Some("sk-or-very-secret".to_string().into());
        let client = OpenRouterClient::from_config(&config).expect("client builds");

        assert!(!format!("{client:?}").contains("very-secret"));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let body = r#"{"error":{"message":"slow down"}}"#;
        let response = http_response("429 Too Many Requests", &["Retry-After: 7"], body);

        let result = complete_against(response).await;

        let retry_after = Some(Duration::from_secs(7));
        assert_eq!(result, Err(LlmError::RateLimited { retry_after }));
    }

    #[tokio::test]
    async fn error_envelope_message_is_surfaced() {
        let body = r#"{"error":{"message":"model `llama3.1` not found","code":404}}"#;
        let response = http_response("404 Not Found", &[], body);

        let result = complete_against(response).await;

        assert_eq!(
            result,
            Err(LlmError::Api { status: 404, message: "model `llama3.1` not found".to_string() })
        );
    }

    #[tokio::test]
    async fn server_errors_without_an_envelope_keep_the_raw_body() {
        let response = http_response("503 Service Unavailable", &[], "upstream overloaded");

        let result = complete_against(response).await;

        let Err(error) = result else {
            panic!("expected an api error");
        };
        assert!(error.is_retryable());
        assert_eq!(
            error,
            LlmError::Api { status: 503, message: "upstream overloaded".to_string() }
        );
    }

    #[tokio::test]
    async fn tool_calls_come_back_over_http() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "type": "function",
                        "function": {
                            "name": "check_room_availability",
                            "arguments": "{\"date\":\"2024-01-01\",\"roomType\":\"double\"}"
                        }
                    }]
                }
            }]
        })
        .to_string();

        let reply = complete_against(http_response("200 OK", &[], &body)).await.expect("reply");

        let LlmReply::FunctionCalls { calls, .. } = reply else {
            panic!("expected function calls");
        };
        assert_eq!(calls[0].call_id.as_str(), "call_0");
        assert_eq!(calls[0].arguments, json!({"date": "2024-01-01", "roomType": "double"}));
    }
}
