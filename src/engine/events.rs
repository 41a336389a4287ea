//! Typed messages produced by the agent engine.
//!
//! These mirror the JSON lines the Claude Code CLI writes with
//! `--output-format stream-json`. Anything we don't model lands in the
//! `Unknown`/`Other` catch-alls instead of failing the whole line.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    System(SystemEvent),
    Assistant(AssistantEvent),
    User(UserEvent),
    Result(ResultEvent),
    StreamEvent(StreamEventEnvelope),
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            AgentEvent::System(e) => e.session_id.as_deref(),
            AgentEvent::Assistant(e) => e.session_id.as_deref(),
            AgentEvent::User(e) => e.session_id.as_deref(),
            AgentEvent::Result(e) => e.session_id.as_deref(),
            AgentEvent::StreamEvent(e) => e.session_id.as_deref(),
            AgentEvent::Unknown => None,
        };
        id.filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

/// A complete assistant turn
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    pub message: AssistantMessage,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl AssistantEvent {
    /// Text blocks of this turn, in order
    pub fn text_blocks(&self) -> impl Iterator<Item = &str> {
        self.message.content.iter().filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// User-role echo, typically carrying tool results back to the model
#[derive(Debug, Clone, Deserialize)]
pub struct UserEvent {
    #[serde(default)]
    pub message: UserMessage,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: UserContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Blocks(Vec::new())
    }
}

impl UserEvent {
    pub fn tool_results(&self) -> impl Iterator<Item = (&str, bool)> {
        let blocks: &[ContentBlock] = match &self.message.content {
            UserContent::Blocks(blocks) => blocks,
            UserContent::Text(_) => &[],
        };
        blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => Some((tool_use_id.as_str(), *is_error)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Terminal summary of the whole agent run
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
    pub total_cost_usd: Option<f64>,
}

/// Fine-grained partial update (only sent with `--include-partial-messages`)
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEventEnvelope {
    pub event: PartialEvent,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    ContentBlockStart {
        #[serde(default)]
        index: u32,
        content_block: Option<PartialBlock>,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: PartialDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: u32,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialBlock {
    #[serde(rename = "type")]
    pub block_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialDelta {
    #[serde(rename = "type")]
    pub delta_type: Option<String>,
    pub text: Option<String>,
}
