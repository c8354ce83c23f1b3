use serde::Deserialize;

use crate::error::AgentError;
use crate::router::{RosterEntry, RouteDecision};

/// Keyword the routing model uses to end the run.
pub const DONE: &str = "done";

/// Pull the first JSON object out of a model reply.
///
/// Accepts bare JSON, a fenced code block (with or without a `json` tag), or
/// JSON preceded by prose such as `Next step:\n{"next": "..."}`.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    let candidates = [
        Some(trimmed.to_string()).filter(|t| t.starts_with('{')),
        fenced_block(trimmed),
        first_json_object(trimmed),
    ];

    for candidate in candidates.into_iter().flatten() {
        if serde_json::from_str::<serde_json::Value>(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

/// First balanced `{...}` span that is valid JSON. Spans that fail to
/// parse (braces in prose) are skipped and scanning resumes after them.
fn first_json_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' if depth > 0 => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let span = &text[start..=i];
                    if serde_json::from_str::<serde_json::Value>(span).is_ok() {
                        return Some(span.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

#[derive(Deserialize)]
struct RawDecision {
    next: String,
    #[serde(default)]
    summary: Option<String>,
}

/// Parse the routing model's reply into a decision against `roster`.
///
/// Agent names match case-insensitively; anything that is neither `done`
/// nor a roster name is an [`AgentError::UnknownAgent`].
pub fn parse_route_decision(raw: &str, roster: &[RosterEntry]) -> Result<RouteDecision, AgentError> {
    let json = extract_json(raw)?;
    let decision: RawDecision = serde_json::from_str(&json)
        .map_err(|e| AgentError::Parse(format!("Routing decision: {e}\nJSON: {json}")))?;

    let next = decision.next.trim();
    if next.eq_ignore_ascii_case(DONE) {
        return Ok(RouteDecision::Done {
            summary: decision.summary.filter(|s| !s.trim().is_empty()),
        });
    }

    roster
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(next))
        .map(|entry| RouteDecision::Delegate {
            agent: entry.name.clone(),
        })
        .ok_or_else(|| AgentError::UnknownAgent(next.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<RosterEntry> {
        vec![
            RosterEntry::new("stock_finder_agent", "picks stocks"),
            RosterEntry::new("market_data_agent", "fetches prices"),
        ]
    }

    #[test]
    fn extract_clean_json() {
        let input = r#"{"next": "market_data_agent"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_tagged_fence() {
        let input = "Routing:\n```json\n{\"next\": \"done\"}\n```\nThanks.";
        assert_eq!(extract_json(input).unwrap(), r#"{"next": "done"}"#);
    }

    #[test]
    fn extract_from_untagged_fence() {
        let input = "```\n{\"next\": \"done\"}\n```";
        assert_eq!(extract_json(input).unwrap(), r#"{"next": "done"}"#);
    }

    #[test]
    fn extract_after_prose_with_braces_in_strings() {
        let input = r#"I'll hand over now. {"next": "done", "summary": "BUY {NYSE:KO} at $61"}"#;
        let json = extract_json(input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["summary"], "BUY {NYSE:KO} at $61");
    }

    #[test]
    fn extract_skips_braced_prose_before_decision() {
        let input = r#"The finder picked {KO, JPM}. {"next": "market_data_agent"}"#;
        assert_eq!(extract_json(input).unwrap(), r#"{"next": "market_data_agent"}"#);

        let decision = parse_route_decision(input, &roster()).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delegate {
                agent: "market_data_agent".to_string()
            }
        );
    }

    #[test]
    fn extract_rejects_plain_text() {
        assert!(extract_json("Let me think about which agent should go next.").is_err());
    }

    #[test]
    fn decision_matches_roster_case_insensitively() {
        let decision = parse_route_decision(r#"{"next": "Market_Data_Agent"}"#, &roster()).unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delegate {
                agent: "market_data_agent".to_string()
            }
        );
    }

    #[test]
    fn done_with_blank_summary_drops_it() {
        let decision = parse_route_decision(r#"{"next": "DONE", "summary": "  "}"#, &roster()).unwrap();
        assert_eq!(decision, RouteDecision::Done { summary: None });
    }

    #[test]
    fn unknown_agent_is_rejected() {
        let err = parse_route_decision(r#"{"next": "crypto_agent"}"#, &roster()).unwrap_err();
        assert!(matches!(err, AgentError::UnknownAgent(name) if name == "crypto_agent"));
    }

    #[test]
    fn missing_next_field_is_parse_error() {
        let err = parse_route_decision(r#"{"agent": "x"}"#, &roster()).unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }
}
