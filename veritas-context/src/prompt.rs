//! Prompt rendering for narrative generation.

use veritas_core::{InsightContext, LlmConfig, NarrativeRequest};

/// Fixed system instruction sent with every narrative request.
pub const SYSTEM_INSTRUCTION: &str = "You are a business analyst writing a short narrative \
for an executive report. Use only facts present in the JSON context you are given: metric \
names, values, percentage changes, flagged anomalies with their row positions, dates and \
dimension values. Quote numbers exactly as they appear in the context, rounded to at most \
two decimals. Refer to a flagged row as \"day N\" using its position. Do not infer causes, \
locations, events or metrics that are not in the context, such as weather, competitor \
actions, holidays or marketing campaigns. When the cause of a change is not in the context, \
write \"Unknown\" instead of guessing. Reply with plain prose, no headings, lists or code.";

/// Render the user prompt: a short task statement followed by the context
/// as JSON.
pub fn render_prompt(context: &InsightContext) -> serde_json::Result<String> {
    let json = context.to_json()?;
    let mut prompt = String::with_capacity(json.len() + 256);
    prompt.push_str("Write a narrative of at most five sentences covering:\n");
    prompt.push_str("1. The period-over-period change of the key metrics.\n");
    if context.anomalies.is_empty() {
        prompt.push_str("2. That no anomalous rows were flagged.\n");
    } else {
        prompt.push_str("2. The flagged anomalies and the metrics that drove them.\n");
    }
    prompt.push_str("\nCONTEXT:\n");
    prompt.push_str(&json);
    prompt.push('\n');
    Ok(prompt)
}

/// Build the single narrative request for a report.
pub fn narrative_request(
    context: &InsightContext,
    config: &LlmConfig,
) -> serde_json::Result<NarrativeRequest> {
    Ok(NarrativeRequest {
        system: SYSTEM_INSTRUCTION.to_string(),
        prompt: render_prompt(context)?,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::ContextBuilder;
    use uuid::Uuid;

    #[test]
    fn test_prompt_embeds_context_json() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset())
            .with_kpis(&kpis())
            .with_anomalies(&anomalies())
            .build();
        let prompt = render_prompt(&context).unwrap();
        assert!(prompt.contains("\"metric\": \"revenue\""));
        assert!(prompt.contains("flagged anomalies"));
        let json_start = prompt.find('{').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(prompt[json_start..].trim()).unwrap();
        assert_eq!(parsed["kpis"][0]["value"], 250.0);
    }

    #[test]
    fn test_prompt_without_anomalies() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset())
            .with_kpis(&kpis())
            .build();
        assert!(render_prompt(&context)
            .unwrap()
            .contains("no anomalous rows were flagged"));
    }

    #[test]
    fn test_request_uses_config_limits() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset()).build();
        let config = LlmConfig {
            max_tokens: 321,
            ..LlmConfig::default()
        };
        let request = narrative_request(&context, &config).unwrap();
        assert_eq!(request.max_tokens, 321);
        assert_eq!(request.system, SYSTEM_INSTRUCTION);
        assert!(request.system.contains("Unknown"));
    }
}
