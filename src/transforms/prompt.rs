//! Flattens an Anthropic `messages` array into a single transcript string.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<InputBlock>),
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputBlock {
    #[serde(rename = "type", default)]
    pub block_type: String,
    pub text: Option<String>,
}

impl MessageContent {
    fn flatten(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.block_type == "text")
                .filter_map(|b| b.text.as_deref())
                .filter(|text| !text.is_empty())
                .collect(),
            MessageContent::Other(value) => value.to_string(),
        }
    }
}

fn label(role: &str) -> &'static str {
    if role == "assistant" {
        "Assistant"
    } else {
        "Human"
    }
}

pub fn compile_prompt(messages: &[InputMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", label(&m.role), m.content.flatten()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
