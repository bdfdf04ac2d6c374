use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for the Codex Responses endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Vec<Value>,
    /// Default: false.
    #[serde(default)]
    pub store: bool,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub text: CodexRequestText,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<CodexReasoning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

fn default_true() -> bool {
    true
}

impl CodexRequest {
    pub fn new(model: impl Into<String>, input: Vec<Value>, instructions: Option<String>) -> Self {
        Self {
            model: model.into(),
            instructions,
            input,
            store: false,
            stream: true,
            text: CodexRequestText::default(),
            include: vec!["reasoning.encrypted_content".to_string()],
            tool_choice: Some("auto".to_string()),
            parallel_tool_calls: false,
            prompt_cache_key: None,
            reasoning: None,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexRequestText {
    pub verbosity: String,
}

impl Default for CodexRequestText {
    fn default() -> Self {
        Self {
            verbosity: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexReasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// `message` input item; `role` is `user` or `assistant`.
pub fn message_item(role: &str, text: &str) -> Value {
    let content_type = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    json!({
        "type": "message",
        "role": role,
        "content": [{ "type": content_type, "text": text }],
    })
}

/// `function_call` input item echoing a prior tool request.
pub fn function_call_item(call_id: &str, name: &str, arguments: &Value) -> Value {
    json!({
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments_string(arguments),
    })
}

/// `function_call_output` input item carrying a tool result.
pub fn function_call_output_item(call_id: &str, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output,
    })
}

/// Function tool definition.
pub fn function_tool(name: &str, description: &str, parameters: &Value) -> Value {
    json!({
        "type": "function",
        "name": name,
        "description": description,
        "parameters": parameters,
        "strict": false,
    })
}

/// Serializes tool arguments the way the Responses API stores them: as a JSON
/// string.
pub fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{function_call_item, message_item, CodexRequest};

    #[test]
    fn request_defaults_match_transport_contract() {
        let request = CodexRequest::new("gpt-5-codex", vec![message_item("user", "hi")], None);
        let value = serde_json::to_value(&request).expect("serialize request");

        assert_eq!(value["store"], false);
        assert_eq!(value["stream"], true);
        assert_eq!(value["include"], json!(["reasoning.encrypted_content"]));
        assert_eq!(value["input"][0]["content"][0]["type"], "input_text");
        assert!(value.get("instructions").is_none());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn function_call_arguments_are_string_encoded() {
        let item = function_call_item("call-1", "list_dir", &json!({"path": "."}));
        assert_eq!(item["arguments"], "{\"path\":\".\"}");
        assert_eq!(message_item("assistant", "ok")["content"][0]["type"], "output_text");
    }
}
