use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Toolbox;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const ADD_TOOL: &str = "add";
pub const SUB_TOOL: &str = "sub";
pub const MULTIPLY_TOOL: &str = "multiply";
pub const DIVIDE_TOOL: &str = "divide";
pub const ROUND_TOOL: &str = "round";

// Beyond this an f64 has no more decimal digits to keep
const MAX_DECIMAL_PLACES: u32 = 15;

#[derive(Debug, Deserialize)]
struct Pair {
    a: f64,
    b: f64,
}

#[derive(Debug, Deserialize)]
struct ScaledPair {
    a: f64,
    b: f64,
    #[serde(default = "two_places")]
    decimal_places: u32,
}

#[derive(Debug, Deserialize)]
struct Single {
    a: f64,
    #[serde(default)]
    decimal_places: u32,
}

fn two_places() -> u32 {
    2
}

fn arguments<T: DeserializeOwned>(arguments: Value) -> AgentResult<T> {
    serde_json::from_value(arguments).map_err(|e| AgentError::InvalidParameters(e.to_string()))
}

fn round_to(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places.min(MAX_DECIMAL_PLACES) as i32);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

fn number(description: &str) -> Value {
    json!({"type": "number", "description": description})
}

fn places(default: u32) -> Value {
    json!({
        "type": "integer",
        "minimum": 0,
        "default": default,
        "description": "Number of decimal places to round to"
    })
}

/// Local arithmetic, so calculations come from a tool rather than the model
pub struct MathToolbox {
    tools: Vec<Tool>,
}

impl Default for MathToolbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MathToolbox {
    pub fn new() -> Self {
        let pair = |name: &str, description: &str| {
            Tool::new(
                name,
                description,
                json!({
                    "type": "object",
                    "required": ["a", "b"],
                    "properties": {"a": number("First operand"), "b": number("Second operand")}
                }),
            )
        };
        let scaled = |name: &str, description: &str| {
            Tool::new(
                name,
                description,
                json!({
                    "type": "object",
                    "required": ["a", "b"],
                    "properties": {
                        "a": number("First operand"),
                        "b": number("Second operand"),
                        "decimal_places": places(2)
                    }
                }),
            )
        };

        let tools = vec![
            pair(ADD_TOOL, "Adds two numbers."),
            pair(SUB_TOOL, "Subtracts b from a."),
            scaled(MULTIPLY_TOOL, "Multiplies two numbers and rounds the product."),
            scaled(DIVIDE_TOOL, "Divides a by b and rounds the quotient."),
            Tool::new(
                ROUND_TOOL,
                "Rounds a number to a given number of decimal places.",
                json!({
                    "type": "object",
                    "required": ["a"],
                    "properties": {"a": number("The number to round"), "decimal_places": places(0)}
                }),
            ),
        ];

        Self { tools }
    }

    fn evaluate(&self, tool_call: ToolCall) -> AgentResult<f64> {
        match tool_call.name.as_str() {
            ADD_TOOL => {
                let Pair { a, b } = arguments(tool_call.arguments)?;
                Ok(a + b)
            }
            SUB_TOOL => {
                let Pair { a, b } = arguments(tool_call.arguments)?;
                Ok(a - b)
            }
            MULTIPLY_TOOL => {
                let ScaledPair { a, b, decimal_places } = arguments(tool_call.arguments)?;
                Ok(round_to(a * b, decimal_places))
            }
            DIVIDE_TOOL => {
                let ScaledPair { a, b, decimal_places } = arguments(tool_call.arguments)?;
                if b == 0.0 {
                    return Err(AgentError::ExecutionError(
                        "Cannot divide by zero".to_string(),
                    ));
                }
                Ok(round_to(a / b, decimal_places))
            }
            ROUND_TOOL => {
                let Single { a, decimal_places } = arguments(tool_call.arguments)?;
                Ok(round_to(a, decimal_places))
            }
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

#[async_trait]
impl Toolbox for MathToolbox {
    fn name(&self) -> &str {
        "math"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let name = tool_call.name.clone();
        let result = self.evaluate(tool_call)?;
        if !result.is_finite() {
            return Err(AgentError::ExecutionError(format!(
                "{} overflowed to {}",
                name, result
            )));
        }
        tracing::debug!(tool = %name, result, "math tool answered");
        Ok(vec![Content::text(result.to_string())])
    }
}
