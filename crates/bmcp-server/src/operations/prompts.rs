//! Prompt templates.

use bmcp_core::error::Result;
use serde_json::{Value, json};

use super::Args;

pub struct PromptSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [(&'static str, &'static str)],
}

pub const PROMPTS: &[PromptSpec] = &[
    PromptSpec {
        name: "market_analysis",
        description: "Create a market analysis prompt",
        arguments: &[("symbol", "Stock code as {market}.{code}")],
    },
    PromptSpec {
        name: "option_strategy",
        description: "Create an option strategy analysis prompt",
        arguments: &[("symbol", "Underlying stock code"), ("expiry", "Expiry date YYYY-MM-DD")],
    },
];

pub fn prompt_list() -> Vec<Value> {
    PROMPTS
        .iter()
        .map(|p| {
            let arguments: Vec<Value> = p
                .arguments
                .iter()
                .map(|(name, description)| json!({ "name": name, "description": description, "required": true }))
                .collect();
            json!({ "name": p.name, "description": p.description, "arguments": arguments })
        })
        .collect()
}

/// Render prompt `name`. `None` if there is no such prompt.
pub fn render(name: &str, raw_args: &Value) -> Option<Result<Value>> {
    let prompt = PROMPTS.iter().find(|p| p.name == name)?;
    let args = Args::new(raw_args);
    let text = match prompt.name {
        "market_analysis" => args.str("symbol").map(|symbol| format!("Please analyze the market data for {symbol}")),
        "option_strategy" => args.str("symbol").and_then(|symbol| {
            let expiry = args.str("expiry")?;
            Ok(format!("Please analyze option strategies for {symbol} expiring on {expiry}"))
        }),
        _ => return None,
    };
    Some(text.map(|text| {
        json!({
            "description": prompt.description,
            "messages": [{ "role": "user", "content": { "type": "text", "text": text } }],
        })
    }))
}
