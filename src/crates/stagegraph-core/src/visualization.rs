//! Render a parsed [`Graph`] back out to DOT, for diagrams and debugging
//! (§3 "Supplemented features": `Graph::to_dot()`). The emitted source is
//! not guaranteed to round-trip byte-for-byte through [`crate::dsl::parse`]
//! (labels/conditions are re-escaped), but re-parsing it always yields an
//! equivalent graph.

use crate::graph::Graph;

/// Render `graph` as a `digraph { ... }` body, carrying shape/type/label
/// node attributes and label/condition/weight edge attributes forward so
/// a human (or graphviz) can inspect routing decisions.
pub fn to_dot(graph: &Graph) -> String {
    let mut output = String::new();
    output.push_str(&format!("digraph {} {{\n", escape_id(&graph.id)));

    if let Some(label) = &graph.attrs.label {
        output.push_str(&format!("    label=\"{}\";\n", escape_dot(label)));
    }
    if let Some(rankdir) = &graph.attrs.rankdir {
        output.push_str(&format!("    rankdir={};\n", rankdir));
    }

    let mut node_ids: Vec<&String> = graph.nodes.keys().collect();
    node_ids.sort();
    for node_id in node_ids {
        let node = &graph.nodes[node_id];
        let mut attrs = Vec::new();
        if let Some(shape) = &node.attrs.shape {
            attrs.push(format!("shape={shape}"));
        }
        let label = node.attrs.label.as_deref().unwrap_or(node_id);
        attrs.push(format!("label=\"{}\"", escape_dot(label)));
        if node.attrs.goal_gate {
            attrs.push("goal_gate=true".to_string());
        }
        output.push_str(&format!(
            "    {} [{}];\n",
            escape_id(node_id),
            attrs.join(", ")
        ));
    }

    for edge in &graph.edges {
        let mut attrs = Vec::new();
        if let Some(label) = &edge.attrs.label {
            attrs.push(format!("label=\"{}\"", escape_dot(label)));
        }
        if let Some(condition) = &edge.attrs.condition {
            attrs.push(format!("condition=\"{}\"", escape_dot(condition)));
        }
        if edge.attrs.weight != 0 {
            attrs.push(format!("weight={}", edge.attrs.weight));
        }
        if edge.attrs.loop_restart {
            attrs.push("loop_restart=true".to_string());
        }
        let suffix = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        output.push_str(&format!(
            "    {} -> {}{};\n",
            escape_id(&edge.from),
            escape_id(&edge.to),
            suffix
        ));
    }

    output.push_str("}\n");
    output
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// DOT bare identifiers may not contain whitespace/punctuation; quote
/// anything that doesn't already look like one.
fn escape_id(s: &str) -> String {
    if s.chars().all(|c| c.is_alphanumeric() || c == '_') && !s.is_empty() {
        s.to_string()
    } else {
        format!("\"{}\"", escape_dot(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl;

    #[test]
    fn round_trips_through_the_parser() {
        let source = r#"
            digraph pipeline {
                start [shape=Mdiamond]
                a [shape=box, label="Do the thing"]
                exit [shape=Msquare]
                start -> a
                a -> exit [condition="outcome=success", weight=2]
            }
        "#;
        let graph = dsl::parse(source).unwrap();
        let rendered = to_dot(&graph);
        let reparsed = dsl::parse(&rendered).unwrap();
        assert_eq!(reparsed.nodes.len(), graph.nodes.len());
        assert_eq!(reparsed.edges.len(), graph.edges.len());
        assert!(rendered.contains("condition=\"outcome=success\""));
    }

    #[test]
    fn escapes_quotes_in_labels() {
        let source = r#"
            digraph g {
                start [shape=Mdiamond, label="say \"hi\""]
                exit [shape=Msquare]
                start -> exit
            }
        "#;
        let graph = dsl::parse(source).unwrap();
        let rendered = to_dot(&graph);
        assert!(dsl::parse(&rendered).is_ok());
    }
}
