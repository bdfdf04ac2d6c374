use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for OpenAI-compatible `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            stream: true,
        }
    }

    pub fn push_system(&mut self, text: &str) {
        self.messages.push(json!({ "role": "system", "content": text }));
    }

    pub fn push_user(&mut self, text: &str) {
        self.messages.push(json!({ "role": "user", "content": text }));
    }

    pub fn push_assistant_text(&mut self, text: &str) {
        match self.open_assistant_message() {
            Some(message) => {
                let existing = message
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                message["content"] = Value::String(existing + text);
            }
            None => self
                .messages
                .push(json!({ "role": "assistant", "content": text })),
        }
    }

    /// Adds a tool call to the trailing assistant message, opening one when
    /// the previous message is not from the assistant.
    pub fn push_tool_call(&mut self, call_id: &str, name: &str, arguments: &str) {
        let call = json!({
            "id": call_id,
            "type": "function",
            "function": { "name": name, "arguments": arguments },
        });
        match self.open_assistant_message() {
            Some(message) => match message.get_mut("tool_calls").and_then(Value::as_array_mut) {
                Some(calls) => calls.push(call),
                None => message["tool_calls"] = Value::Array(vec![call]),
            },
            None => self.messages.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [call],
            })),
        }
    }

    pub fn push_tool_result(&mut self, call_id: &str, content: &str) {
        self.messages.push(json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }));
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tool_choice = (!tools.is_empty()).then(|| "auto".to_owned());
        self.tools = tools;
        self
    }

    fn open_assistant_message(&mut self) -> Option<&mut Value> {
        self.messages
            .last_mut()
            .filter(|message| message.get("role").and_then(Value::as_str) == Some("assistant"))
    }
}

pub fn function_tool(name: &str, description: &str, parameters: &Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        },
    })
}
