//! ChatApiRunner - streaming Runner over OpenAI-compatible endpoints.
//!
//! This runner calls a chat-completions API directly with `stream: true`
//! and re-emits the text deltas through the run's chunk channel as they
//! arrive. Tool calls requested by the model are dispatched to locally
//! registered [`Tool`]s, and handoff functions (`transfer_to_<persona>`)
//! switch the persona for the remainder of the run. The canonical history
//! reported in the outcome carries only user/assistant turns; tool and
//! handoff traffic stays internal to the run.
//!
//! Configuration priority: `~/.config/parlance/secret.json` > environment
//! variables. The default endpoint is the Gemini OpenAI-compatibility
//! layer with `gemini-2.5-flash`.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parlance_core::runner::DEFAULT_CHUNK_BUFFER;
use parlance_core::{
    ParlanceError, Persona, PersonaId, Result, RunOutcome, RunProducer, Runner, StreamedRun, Turn,
    TurnRole,
};
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::load_secret_config;
use crate::tools::Tool;

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Upper bound on tool/handoff round trips within a single run.
const MAX_RUN_STEPS: usize = 10;

const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

/// Runner implementation that talks to an OpenAI-compatible chat API.
#[derive(Clone)]
pub struct ChatApiRunner {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    personas: HashMap<PersonaId, Persona>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ChatApiRunner {
    /// Creates a runner with the provided API key and default model,
    /// pointed at the Gemini OpenAI-compatibility endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            personas: HashMap::new(),
            tools: HashMap::new(),
        }
    }

    /// Loads credentials from ~/.config/parlance/secret.json or
    /// environment variables.
    ///
    /// Priority:
    /// 1. ~/.config/parlance/secret.json (`chat` section)
    /// 2. Environment variables (GOOGLE_API_KEY or OPENAI_API_KEY,
    ///    PARLANCE_MODEL_NAME, PARLANCE_BASE_URL)
    ///
    /// Model name defaults to `gemini-2.5-flash` if not specified.
    pub fn try_from_env() -> Result<Self> {
        if let Ok(secret_config) = load_secret_config() {
            if let Some(chat_config) = secret_config.chat {
                let model = chat_config
                    .model_name
                    .unwrap_or_else(|| DEFAULT_MODEL.into());
                let mut runner = Self::new(chat_config.api_key, model);
                if let Some(base_url) = chat_config.base_url {
                    runner = runner.with_base_url(base_url);
                }
                return Ok(runner);
            }
        }

        let api_key = env::var("GOOGLE_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                ParlanceError::config(
                    "API key not found in ~/.config/parlance/secret.json or the \
                     GOOGLE_API_KEY / OPENAI_API_KEY environment variables",
                )
            })?;

        let model = env::var("PARLANCE_MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.into());
        let mut runner = Self::new(api_key, model);
        if let Ok(base_url) = env::var("PARLANCE_BASE_URL") {
            runner = runner.with_base_url(base_url);
        }
        Ok(runner)
    }

    /// Overrides the endpoint base URL after construction.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Registers a persona the runner can resolve.
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.personas.insert(persona.id.clone(), persona);
        self
    }

    /// Registers a callable tool.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    /// Registers the preset personas and their tools.
    pub fn with_default_personas(mut self) -> Self {
        for persona in crate::personas::default_personas() {
            self = self.with_persona(persona);
        }
        self.with_tool(Arc::new(crate::tools::WeatherTool))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Runner for ChatApiRunner {
    async fn run_streamed(&self, persona: &PersonaId, history: &[Turn]) -> Result<StreamedRun> {
        if !self.personas.contains_key(persona) {
            return Err(ParlanceError::not_found("persona", persona.to_string()));
        }

        let (producer, run) = StreamedRun::channel(DEFAULT_CHUNK_BUFFER);
        let ctx = RunContext {
            client: self.client.clone(),
            url: self.completions_url(),
            api_key: self.api_key.clone(),
            default_model: self.model.clone(),
            personas: self.personas.clone(),
            tools: self.tools.clone(),
        };

        tokio::spawn(drive_run(ctx, persona.clone(), history.to_vec(), producer));
        Ok(run)
    }
}

/// Snapshot of everything a spawned run needs from the runner.
struct RunContext {
    client: Client,
    url: String,
    api_key: String,
    default_model: String,
    personas: HashMap<PersonaId, Persona>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

/// Executes the tool/handoff loop for one delegated run.
async fn drive_run(ctx: RunContext, start: PersonaId, history: Vec<Turn>, producer: RunProducer) {
    let mut current = start;
    let mut transcript: Vec<ChatMessage> = history.iter().map(turn_to_message).collect();
    let mut response_text = String::new();

    for _ in 0..MAX_RUN_STEPS {
        let Some(persona) = ctx.personas.get(&current) else {
            producer
                .fail(ParlanceError::not_found("persona", current.to_string()))
                .await;
            return;
        };

        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(persona.instructions.clone()));
        messages.extend(transcript.iter().cloned());

        let declarations = tool_declarations(persona, &ctx.personas, &ctx.tools);
        let request = ChatCompletionRequest {
            model: persona.model.as_deref().unwrap_or(&ctx.default_model),
            messages: &messages,
            stream: true,
            tools: (!declarations.is_empty()).then_some(&declarations[..]),
        };

        let step = match stream_step(&ctx, &request, &producer).await {
            Ok(step) => step,
            Err(err) => {
                error!(error = %err, persona = %current, "chat completion stream failed");
                if response_text.is_empty() {
                    producer.fail(err).await;
                } else {
                    // Earlier steps already produced visible text; report
                    // it as the partial canonical result.
                    let mut partial = history;
                    partial.push(Turn::assistant(response_text));
                    producer
                        .fail_with_partial(
                            err,
                            RunOutcome {
                                history: partial,
                                last_persona: current,
                            },
                        )
                        .await;
                }
                return;
            }
        };

        if step.abandoned {
            debug!(persona = %current, "run abandoned by consumer");
            return;
        }

        response_text.push_str(&step.text);

        if step.tool_calls.is_empty() {
            let mut canonical = history;
            canonical.push(Turn::assistant(response_text));
            producer.complete(RunOutcome {
                history: canonical,
                last_persona: current,
            });
            return;
        }

        transcript.push(ChatMessage::assistant_tool_calls(
            step.text,
            &step.tool_calls,
        ));

        for call in step.tool_calls {
            if let Some(target) = handoff_target(&call.name) {
                let target_id = PersonaId::new(target);
                if persona.handoffs.contains(&target_id) && ctx.personas.contains_key(&target_id)
                {
                    debug!(from = %current, to = %target_id, "persona handoff");
                    transcript.push(ChatMessage::tool_result(
                        call.id,
                        format!("{{\"assistant\": \"{target_id}\"}}"),
                    ));
                    current = target_id;
                } else {
                    warn!(target = %target, "handoff to unknown persona requested");
                    transcript.push(ChatMessage::tool_result(
                        call.id,
                        format!("Unknown handoff target: {target}"),
                    ));
                }
            } else if persona.tools.iter().any(|name| name == &call.name) {
                let Some(tool) = ctx.tools.get(&call.name) else {
                    warn!(tool = %call.name, "persona references unregistered tool");
                    transcript.push(ChatMessage::tool_result(
                        call.id,
                        format!("Unknown tool: {}", call.name),
                    ));
                    continue;
                };
                let arguments = parse_arguments(&call.arguments);
                let output = match tool.invoke(arguments).await {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(tool = %call.name, error = %err, "tool invocation failed");
                        format!("Tool error: {err}")
                    }
                };
                transcript.push(ChatMessage::tool_result(call.id, output));
            } else {
                warn!(tool = %call.name, "model called undeclared tool");
                transcript.push(ChatMessage::tool_result(
                    call.id,
                    format!("Unknown tool: {}", call.name),
                ));
            }
        }
    }

    producer
        .fail(ParlanceError::runner(format!(
            "run exceeded {MAX_RUN_STEPS} tool/handoff steps"
        )))
        .await;
}

/// Result of streaming one chat completion.
struct StepData {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    abandoned: bool,
}

/// Streams one completion, forwarding content deltas as chunks.
async fn stream_step(
    ctx: &RunContext,
    request: &ChatCompletionRequest<'_>,
    producer: &RunProducer,
) -> Result<StepData> {
    let builder = ctx
        .client
        .post(&ctx.url)
        .bearer_auth(&ctx.api_key)
        .json(request);

    let mut event_source = EventSource::new(builder)
        .map_err(|err| ParlanceError::internal(format!("failed to build SSE request: {err}")))?;

    let mut text = String::new();
    let mut accumulator = ToolCallAccumulator::default();

    while let Some(event) = event_source.next().await {
        match event {
            Ok(Event::Open) => continue,
            Ok(Event::Message(message)) => {
                if message.data.trim() == "[DONE]" {
                    event_source.close();
                    break;
                }

                let chunk: StreamChunk =
                    serde_json::from_str(&message.data).map_err(|err| {
                        event_source.close();
                        ParlanceError::Serialization {
                            format: "SSE".to_string(),
                            message: format!("failed to parse stream event: {err}"),
                        }
                    })?;

                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            text.push_str(&content);
                            if !producer.send(content).await {
                                event_source.close();
                                return Ok(StepData {
                                    text,
                                    tool_calls: Vec::new(),
                                    abandoned: true,
                                });
                            }
                        }
                    }
                    if let Some(deltas) = choice.delta.tool_calls {
                        for delta in deltas {
                            accumulator.absorb(delta);
                        }
                    }
                }
            }
            Err(EventSourceError::StreamEnded) => break,
            Err(err) => {
                event_source.close();
                return Err(map_stream_error(err));
            }
        }
    }

    Ok(StepData {
        text,
        tool_calls: accumulator.into_calls(),
        abandoned: false,
    })
}

fn map_stream_error(err: EventSourceError) -> ParlanceError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => {
            let is_retryable = matches!(
                status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            );
            if is_retryable {
                ParlanceError::runner_retryable(format!("chat API returned {status}"))
            } else {
                ParlanceError::runner(format!("chat API returned {status}"))
            }
        }
        EventSourceError::Transport(err) => {
            if err.is_connect() || err.is_timeout() {
                ParlanceError::runner_retryable(format!("chat API request failed: {err}"))
            } else {
                ParlanceError::runner(format!("chat API request failed: {err}"))
            }
        }
        other => ParlanceError::runner(format!("chat API stream failed: {other}")),
    }
}

/// Extracts the handoff target persona id from a tool name.
fn handoff_target(tool_name: &str) -> Option<&str> {
    tool_name.strip_prefix(HANDOFF_TOOL_PREFIX)
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn turn_to_message(turn: &Turn) -> ChatMessage {
    let role = match turn.role {
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
    };
    ChatMessage {
        role: role.to_string(),
        content: Some(turn.content.clone()),
        tool_calls: None,
        tool_call_id: None,
    }
}

/// Builds the tool declarations for a persona: its registered tools plus
/// one transfer function per handoff target.
fn tool_declarations(
    persona: &Persona,
    personas: &HashMap<PersonaId, Persona>,
    tools: &HashMap<String, Arc<dyn Tool>>,
) -> Vec<ToolDeclaration> {
    let mut declarations = Vec::new();

    for name in &persona.tools {
        if let Some(tool) = tools.get(name) {
            declarations.push(ToolDeclaration {
                kind: "function",
                function: FunctionDeclaration {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            });
        } else {
            warn!(tool = %name, persona = %persona.id, "skipping unregistered tool");
        }
    }

    for target_id in &persona.handoffs {
        let description = personas
            .get(target_id)
            .and_then(|target| target.handoff_description.clone())
            .unwrap_or_else(|| format!("Handoff to the {target_id} assistant."));
        declarations.push(ToolDeclaration {
            kind: "function",
            function: FunctionDeclaration {
                name: format!("{HANDOFF_TOOL_PREFIX}{target_id}"),
                description,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
            },
        });
    }

    declarations
}

// ---- wire types -----------------------------------------------------------

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDeclaration]>,
}

#[derive(Serialize, Clone, Debug)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn system(instructions: String) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(instructions),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn assistant_tool_calls(content: String, calls: &[PartialToolCall]) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!content.is_empty()).then_some(content),
            tool_calls: Some(
                calls
                    .iter()
                    .map(|call| ToolCallPayload {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: FunctionPayload {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        }
    }

    fn tool_result(tool_call_id: String, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
struct ToolCallPayload {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: FunctionPayload,
}

#[derive(Serialize, Clone, Debug)]
struct FunctionPayload {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ToolDeclaration {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDeclaration,
}

#[derive(Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Reassembles tool calls from their streamed fragments.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: Vec<PartialToolCall>,
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: ToolCallDelta) {
        // Providers that omit the index send each call's fragments
        // contiguously; a fresh id then starts a new call.
        let index = match delta.index {
            Some(index) => index,
            None => match (&delta.id, self.calls.last()) {
                (Some(id), Some(last)) if &last.id != id => self.calls.len(),
                (_, Some(_)) => self.calls.len() - 1,
                (_, None) => 0,
            },
        };

        if self.calls.len() <= index {
            self.calls
                .resize_with(index + 1, PartialToolCall::default);
        }

        let slot = &mut self.calls[index];
        if let Some(id) = delta.id {
            if slot.id.is_empty() {
                slot.id = id;
            }
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                slot.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
    }

    fn into_calls(self) -> Vec<PartialToolCall> {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::default_personas;
    use crate::tools::WeatherTool;

    fn delta(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            function: Some(FunctionDelta {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_accumulator_reassembles_fragmented_arguments() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(delta(Some(0), Some("call_1"), Some("get_weather"), None));
        acc.absorb(delta(Some(0), None, None, Some("{\"city\":")));
        acc.absorb(delta(Some(0), None, None, Some(" \"Lahore\"}")));

        let calls = acc.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, "{\"city\": \"Lahore\"}");
    }

    #[test]
    fn test_accumulator_without_indices_splits_on_new_id() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(delta(None, Some("call_1"), Some("get_weather"), Some("{}")));
        acc.absorb(delta(None, Some("call_2"), Some("transfer_to_english"), Some("{}")));

        let calls = acc.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "transfer_to_english");
    }

    #[test]
    fn test_handoff_target_parsing() {
        assert_eq!(handoff_target("transfer_to_english"), Some("english"));
        assert_eq!(handoff_target("get_weather"), None);
    }

    #[test]
    fn test_tool_declarations_for_assistant_persona() {
        let personas: HashMap<PersonaId, Persona> = default_personas()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("get_weather".to_string(), Arc::new(WeatherTool));

        let assistant = personas.get(&PersonaId::new("assistant")).unwrap();
        let declarations = tool_declarations(assistant, &personas, &tools);

        let names: Vec<&str> = declarations
            .iter()
            .map(|d| d.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["get_weather", "transfer_to_english"]);
        // The handoff declaration carries the target's description.
        assert_eq!(declarations[1].function.description, "A english speaking agent.");
    }

    #[test]
    fn test_turn_to_message_roles() {
        let msg = turn_to_message(&Turn::user("hi"));
        assert_eq!(msg.role, "user");
        let msg = turn_to_message(&Turn::assistant("hello"));
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_arguments_tolerates_empty_and_invalid() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(
            parse_arguments("{\"city\": \"Lahore\"}"),
            serde_json::json!({ "city": "Lahore" })
        );
        assert_eq!(
            parse_arguments("not json"),
            serde_json::Value::String("not json".to_string())
        );
    }

    #[test]
    fn test_request_serialization_omits_empty_tools() {
        let messages = vec![ChatMessage::system("be nice".to_string())];
        let request = ChatCompletionRequest {
            model: "gemini-2.5-flash",
            messages: &messages,
            stream: true,
            tools: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json["messages"][0].get("tool_calls").is_none());
    }

    #[tokio::test]
    async fn test_run_streamed_rejects_unknown_persona() {
        let runner = ChatApiRunner::new("key", DEFAULT_MODEL).with_default_personas();
        let err = match runner.run_streamed(&PersonaId::new("nope"), &[]).await {
            Ok(_) => panic!("unknown persona must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, ParlanceError::NotFound { .. }));
    }
}
