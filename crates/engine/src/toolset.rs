//! Tool schema provider contract and system-prompt embedding.

use std::collections::BTreeMap;

use tl_domain::message::{ContentPart, LlmMessage, MessageContent};
use tl_domain::tool::ToolSchema;

/// Source of tool definitions for a run. Tool execution itself happens on
/// the interpreter side; the engine only forwards schemas.
pub trait ToolSchemaProvider: Send + Sync {
    /// OpenAPI-shaped schemas for native function calling.
    fn openapi_schemas(&self) -> Vec<ToolSchema>;

    /// Per-tool usage example text for the XML instruction block.
    fn usage_examples(&self) -> BTreeMap<String, String>;
}

/// Build the XML tool-calling instruction block embedded into the system
/// prompt when XML calling is configured.
pub fn xml_instructions(
    schemas: &[ToolSchema],
    examples: &BTreeMap<String, String>,
) -> Option<String> {
    if schemas.is_empty() {
        return None;
    }
    let schemas_json =
        serde_json::to_string_pretty(schemas).unwrap_or_else(|_| "[]".to_string());

    let mut examples_section = String::new();
    if !examples.is_empty() {
        examples_section.push_str("\n\nUsage Examples:\n");
        for (name, example) in examples {
            examples_section.push_str(&format!("\n{name}:\n{example}\n"));
        }
    }

    Some(format!(
        r#"
In this environment you have access to a set of tools you can use to answer the user's question.

You can invoke functions by writing a <function_calls> block like the following as part of your reply to the user:

<function_calls>
<invoke name="function_name">
<parameter name="param_name">param_value</parameter>
...
</invoke>
</function_calls>

String and scalar parameters should be specified as-is, while lists and objects should use JSON format.

Here are the functions available in JSON Schema format:

```json
{schemas_json}
```

When using the tools:
- Use the exact function names from the JSON schema above
- Include all required parameters as specified in the schema
- Format complex data (objects, arrays) as JSON strings within the parameter tags
- Boolean values should be "true" or "false" (lowercase)
{examples_section}"#
    ))
}

/// Append an instruction block to a system prompt: onto string content
/// directly, or onto the first text part. Unexpected content shapes are
/// left alone with a warning.
pub fn embed_in_system_prompt(system_prompt: &mut LlmMessage, block: &str) {
    match &mut system_prompt.content {
        MessageContent::Text(text) => text.push_str(block),
        MessageContent::Parts(parts) => {
            let appended = parts.iter_mut().find_map(|p| match p {
                ContentPart::Text { text, .. } => {
                    text.push_str(block);
                    Some(())
                }
                _ => None,
            });
            if appended.is_none() {
                tracing::warn!(
                    "system prompt has no text part, cannot embed tool instructions"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ToolSchema {
        ToolSchema {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            }),
        }
    }

    #[test]
    fn instructions_include_schema_and_examples() {
        let mut examples = BTreeMap::new();
        examples.insert("read_file".to_string(), "<invoke name=\"read_file\">...".to_string());
        let block = xml_instructions(&[schema()], &examples).unwrap();
        assert!(block.contains("read_file"));
        assert!(block.contains("Usage Examples:"));
        assert!(block.contains("<function_calls>"));
    }

    #[test]
    fn no_schemas_means_no_block() {
        assert!(xml_instructions(&[], &BTreeMap::new()).is_none());
    }

    #[test]
    fn embedding_appends_to_string_content() {
        let mut prompt = LlmMessage::system("base prompt");
        embed_in_system_prompt(&mut prompt, "\nEXTRA");
        assert_eq!(prompt.text(), Some("base prompt\nEXTRA"));
    }

    #[test]
    fn embedding_appends_to_first_text_part() {
        let mut prompt = LlmMessage::system("");
        prompt.content = MessageContent::Parts(vec![
            ContentPart::ImageUrl {
                url: "data:x".into(),
                media_type: None,
            },
            ContentPart::Text {
                text: "base".into(),
                cache_control: None,
            },
        ]);
        embed_in_system_prompt(&mut prompt, "+block");
        assert_eq!(prompt.text(), Some("base+block"));
    }
}
