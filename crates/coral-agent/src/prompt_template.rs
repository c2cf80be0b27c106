use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// One `Tool: <name>, Schema: <json>` line per tool
pub fn tools_description(tools: &[Tool]) -> String {
    tools
        .iter()
        .map(|tool| format!("Tool: {}, Schema: {}", tool.name, tool.input_schema))
        .collect::<Vec<_>>()
        .join("\n")
}
