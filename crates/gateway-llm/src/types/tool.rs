use serde::{Deserialize, Serialize};

/// Longest tool name any configured backend accepts
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Definition of a tool the model can call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (currently always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function specification
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Create a function tool definition with a sanitized name
    #[must_use]
    pub fn function(name: &str, description: Option<String>, parameters: Option<serde_json::Value>) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function: FunctionDefinition {
                name: sanitize_tool_name(name),
                description,
                parameters,
            },
        }
    }
}

/// Specification of a callable function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the function parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// How the model should select tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// Simple mode: "none", "auto", or "required"
    Mode(ToolChoiceMode),
    /// Force a specific function
    Function(ToolChoiceFunction),
}

/// Tool selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Model will not call any tools
    None,
    /// Model decides whether to call tools
    Auto,
    /// Model must call at least one tool
    Required,
}

/// Force the model to call a specific function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    /// Must be "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function to call
    pub function: ToolChoiceFunctionName,
}

/// Function name reference within a forced tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunctionName {
    /// Name of the function to call
    pub name: String,
}

/// Normalize a tool name to the form every backend accepts
///
/// Lowercases, replaces non-word characters with `_`, and truncates to
/// [`MAX_TOOL_NAME_LEN`] with a warning since a silently different name
/// would break dispatch on the way back.
#[must_use]
pub fn sanitize_tool_name(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if sanitized.chars().count() > MAX_TOOL_NAME_LEN {
        tracing::warn!(tool = %name, "tool name exceeds {MAX_TOOL_NAME_LEN} characters, truncating");
        return sanitized.chars().take(MAX_TOOL_NAME_LEN).collect();
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_non_word_characters() {
        assert_eq!(sanitize_tool_name("Get Weather!"), "get_weather_");
        assert_eq!(sanitize_tool_name("lookup-user.v2"), "lookup_user_v2");
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn sanitize_keeps_valid_names_unchanged() {
        assert_eq!(sanitize_tool_name("get_weather"), "get_weather");
    }
}
