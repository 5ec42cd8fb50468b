//! Deterministic outgoing-edge selection (§4.D).
//!
//! Five steps, first match wins: condition match, preferred label,
//! suggested ids, unconditional residue, then all edges — each narrowed
//! set broken by [`tiebreak`] (descending weight, then ascending `to` id).

use crate::condition::evaluate;
use crate::context::Context;
use crate::graph::Edge;
use crate::outcome::Outcome;

/// Normalise an edge/choice label for accelerator-insensitive comparison:
/// lowercase, trim, then strip a leading `[K] `, `K) `, or `K - ` prefix.
pub fn normalize_label(label: &str) -> String {
    let trimmed = label.trim();
    let stripped = if let Some(rest) = trimmed.strip_prefix('[') {
        rest.find(']')
            .map(|end| rest[end + 1..].trim_start())
            .unwrap_or(trimmed)
    } else if trimmed.len() >= 2
        && trimmed.as_bytes()[1] == b')'
        && trimmed.as_bytes()[0].is_ascii_alphanumeric()
    {
        trimmed[2..].trim_start()
    } else if trimmed.len() >= 4 && &trimmed[1..4] == " - " && trimmed.as_bytes()[0].is_ascii_alphanumeric() {
        trimmed[4..].trim_start()
    } else {
        trimmed
    };
    stripped.to_ascii_lowercase()
}

/// Pick first by descending `weight`, then ascending `to` id.
fn tiebreak<'a>(candidates: &[&'a Edge]) -> Option<&'a Edge> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| {
            b.attrs
                .weight
                .cmp(&a.attrs.weight)
                .then_with(|| a.to.cmp(&b.to))
        })
}

/// Select the next edge to follow after `from_node` finished with `outcome`,
/// given the run's `context`. Returns `None` iff the node has no outgoing
/// edges (or none survive steps 1-5, which for a well-formed graph only
/// happens when there are zero outgoing edges at all).
pub fn select<'a>(edges: &[&'a Edge], outcome: &Outcome, context: &Context) -> Option<&'a Edge> {
    if edges.is_empty() {
        return None;
    }

    // Step 1: condition match.
    let matching: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| {
            e.attrs
                .condition
                .as_deref()
                .map(|c| evaluate(c, outcome, context))
                .unwrap_or(false)
        })
        .collect();
    if !matching.is_empty() {
        return tiebreak(&matching);
    }

    // Step 2: preferred label.
    if let Some(preferred) = &outcome.preferred_label {
        let normalized_preferred = normalize_label(preferred);
        if let Some(edge) = edges.iter().copied().find(|e| {
            e.attrs
                .label
                .as_deref()
                .map(|l| normalize_label(l) == normalized_preferred)
                .unwrap_or(false)
        }) {
            return Some(edge);
        }
    }

    // Step 3: suggested next ids, in order.
    for suggested in &outcome.suggested_next_ids {
        if let Some(edge) = edges.iter().copied().find(|e| &e.to == suggested) {
            return Some(edge);
        }
    }

    // Step 4: unconditional residue.
    let unconditional: Vec<&Edge> = edges
        .iter()
        .copied()
        .filter(|e| e.attrs.condition.is_none())
        .collect();
    if !unconditional.is_empty() {
        return tiebreak(&unconditional);
    }

    // Step 5: all edges.
    tiebreak(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeAttrs;
    use crate::outcome::OutcomeStatus;

    fn edge(to: &str, condition: Option<&str>, weight: i64, label: Option<&str>) -> Edge {
        Edge {
            from: "decision".to_string(),
            to: to.to_string(),
            attrs: EdgeAttrs {
                label: label.map(|s| s.to_string()),
                condition: condition.map(|s| s.to_string()),
                weight,
                ..Default::default()
            },
        }
    }

    #[test]
    fn condition_match_wins_and_ties_break_by_weight_then_id() {
        let win = edge("win", Some("outcome=success"), 0, None);
        let retry = edge("retry", Some("outcome=fail"), 2, None);
        let retry2 = edge("retry2", Some("outcome=fail"), 1, None);
        let edges = vec![&win, &retry, &retry2];
        let outcome = Outcome {
            status: Some(OutcomeStatus::Fail),
            ..Default::default()
        };
        let picked = select(&edges, &outcome, &Context::new()).unwrap();
        assert_eq!(picked.to, "retry");
    }

    #[test]
    fn preferred_label_normalisation_strips_accelerator() {
        let yes = edge("approved", None, 0, Some("[Y] Yes"));
        let no = edge("rejected", None, 0, Some("[N] No"));
        let edges = vec![&yes, &no];
        let outcome = Outcome {
            preferred_label: Some("yes".to_string()),
            ..Default::default()
        };
        let picked = select(&edges, &outcome, &Context::new()).unwrap();
        assert_eq!(picked.to, "approved");
    }

    #[test]
    fn suggested_ids_checked_in_order() {
        let a = edge("a", None, 0, None);
        let b = edge("b", None, 0, None);
        let edges = vec![&a, &b];
        let outcome = Outcome {
            suggested_next_ids: vec!["b".to_string(), "a".to_string()],
            ..Default::default()
        };
        let picked = select(&edges, &outcome, &Context::new()).unwrap();
        assert_eq!(picked.to, "b");
    }

    #[test]
    fn falls_back_to_unconditional_residue() {
        let conditioned = edge("special", Some("outcome=never"), 5, None);
        let fallback = edge("default", None, 0, None);
        let edges = vec![&conditioned, &fallback];
        let picked = select(&edges, &Outcome::default(), &Context::new()).unwrap();
        assert_eq!(picked.to, "default");
    }

    #[test]
    fn no_outgoing_edges_returns_none() {
        assert!(select(&[], &Outcome::default(), &Context::new()).is_none());
    }

    #[test]
    fn normalize_label_strips_all_accelerator_forms() {
        assert_eq!(normalize_label("[Y] Yes"), "yes");
        assert_eq!(normalize_label("Y) Yes"), "yes");
        assert_eq!(normalize_label("Y - Yes"), "yes");
        assert_eq!(normalize_label("  Yes  "), "yes");
    }
}
