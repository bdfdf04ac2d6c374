use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
    pub stream: bool,
}

impl AnthropicRequest {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: None,
            messages: Vec::new(),
            tools: Vec::new(),
            thinking: None,
            stream: true,
        }
    }

    /// Appends a content block, merging into the previous message when it
    /// has the same role. The API rejects consecutive same-role messages.
    pub fn push_block(&mut self, role: AnthropicRole, block: Value) {
        match self.messages.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => self.messages.push(AnthropicMessage {
                role,
                content: vec![block],
            }),
        }
    }

    /// Enables extended thinking with the given token budget.
    pub fn with_thinking_budget(mut self, budget_tokens: u32) -> Self {
        self.thinking = Some(json!({ "type": "enabled", "budget_tokens": budget_tokens }));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: AnthropicRole,
    pub content: Vec<Value>,
}

pub fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

pub fn tool_use_block(id: &str, name: &str, input: &Value) -> Value {
    let input = if input.is_object() {
        input.clone()
    } else {
        json!({})
    };
    json!({ "type": "tool_use", "id": id, "name": name, "input": input })
}

pub fn tool_result_block(tool_use_id: &str, content: &str, is_error: bool) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": content,
        "is_error": is_error,
    })
}

pub fn tool_definition(name: &str, description: &str, input_schema: &Value) -> Value {
    json!({ "name": name, "description": description, "input_schema": input_schema })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{text_block, tool_result_block, tool_use_block, AnthropicRequest, AnthropicRole};

    #[test]
    fn consecutive_same_role_blocks_share_one_message() {
        let mut request = AnthropicRequest::new("claude-sonnet-4-5", 1024);
        request.push_block(AnthropicRole::User, text_block("list files"));
        request.push_block(
            AnthropicRole::Assistant,
            tool_use_block("toolu_1", "list_dir", &json!({"path": "."})),
        );
        request.push_block(AnthropicRole::User, tool_result_block("toolu_1", "a.txt", false));
        request.push_block(AnthropicRole::User, text_block("thanks"));

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].content.len(), 2);

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["stream"], true);
        assert!(value.get("system").is_none());
    }

    #[test]
    fn tool_use_input_is_always_an_object() {
        let block = tool_use_block("t", "shell", &json!("not an object"));
        assert_eq!(block["input"], json!({}));
    }
}
