//! Parser for the DOT-subset pipeline DSL (§6 EXTERNAL INTERFACES).
//!
//! Grammar supported (a deliberate, restricted subset of the standard
//! graph-description language):
//!
//! ```text
//! digraph <id> { ... }          // wrapper optional; a bare statement list is also accepted
//! node_id [k=v, ...]
//! a -> b [k=v, ...]
//! a -> b -> c [k=v, ...]        // chained edges share the same attribute list
//! graph [k=v, ...]
//! node [k=v, ...]               // node defaults, applied to every node declared after
//! subgraph <id> { ... }         // statements are hoisted into the parent graph
//! // line comment, /* block comment */
//! ```
//!
//! This module owns tokenizing and statement parsing; it does not attempt to
//! be a general DOT implementation — only the shapes above. Anything else
//! (ports, HTML labels, strict/graph keywords, multi-line string concat) is
//! rejected with [`EngineError::Parse`].

use crate::error::{EngineError, Result};
use crate::graph::{Edge, EdgeAttrs, Graph, GraphAttrs, Node, NodeAttrs};
use std::collections::HashMap;
use std::time::Duration;

/// Strip `//` and `/* */` comments, respecting double-quoted strings so a
/// `//` or `/*` inside a label doesn't truncate the statement.
fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    out.push(next);
                    chars.next();
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                while let Some(n) = chars.next() {
                    if n == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse a `key=value` attribute list, e.g. `label="win", weight=2`.
/// Values may be double-quoted, bare identifiers, or numbers.
fn parse_attr_list(body: &str) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    let mut rest = body.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| EngineError::Parse(format!("malformed attribute list: `{body}`")))?;
        let key = rest[..eq].trim().trim_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let (value, consumed) = if rest.starts_with('"') {
            let mut end = 1;
            let bytes: Vec<char> = rest.chars().collect();
            let mut value = String::new();
            while end < bytes.len() {
                let c = bytes[end];
                if c == '\\' && end + 1 < bytes.len() {
                    value.push(bytes[end + 1]);
                    end += 2;
                    continue;
                }
                if c == '"' {
                    end += 1;
                    break;
                }
                value.push(c);
                end += 1;
            }
            (value, end)
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            (rest[..end].trim().to_string(), end)
        };
        attrs.insert(key, value);
        rest = rest[consumed.min(rest.len())..].trim_start();
        if let Some(stripped) = rest.strip_prefix(',') {
            rest = stripped.trim_start();
        }
    }
    Ok(attrs)
}

/// Parse a duration literal with suffix `ms|s|m|h|d` (§6).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (num, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else if let Some(n) = s.strip_suffix('d') {
        (n, "d")
    } else {
        return None;
    };
    let value: u64 = num.trim().parse().ok()?;
    Some(match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        "d" => Duration::from_secs(value * 86400),
        _ => unreachable!(),
    })
}

fn apply_node_attr(attrs: &mut NodeAttrs, key: &str, value: &str) {
    match key {
        "label" => attrs.label = Some(value.to_string()),
        "shape" => attrs.shape = Some(value.to_string()),
        "type" => attrs.type_ = Some(value.to_string()),
        "prompt" => attrs.prompt = Some(value.to_string()),
        "max_retries" => attrs.max_retries = value.parse().ok(),
        "goal_gate" => attrs.goal_gate = value.eq_ignore_ascii_case("true") || value == "1",
        "retry_target" => attrs.retry_target = Some(value.to_string()),
        "fallback_retry_target" => attrs.fallback_retry_target = Some(value.to_string()),
        "fidelity" => attrs.fidelity = Some(value.to_string()),
        "thread_id" => attrs.thread_id = Some(value.to_string()),
        "class" => attrs.class = Some(value.to_string()),
        "timeout" => attrs.timeout = parse_duration(value),
        "llm_model" => attrs.llm_model = Some(value.to_string()),
        "llm_provider" => attrs.llm_provider = Some(value.to_string()),
        "reasoning_effort" => attrs.reasoning_effort = Some(value.to_string()),
        "auto_status" => attrs.auto_status = Some(value.to_string()),
        "allow_partial" => attrs.allow_partial = value.eq_ignore_ascii_case("true") || value == "1",
        "tool_command" => attrs.tool_command = Some(value.to_string()),
        "human.default_choice" => attrs.human_default_choice = Some(value.to_string()),
        "join_policy" => attrs.join_policy = Some(value.to_string()),
        "error_policy" => attrs.error_policy = Some(value.to_string()),
        "max_parallel" => attrs.max_parallel = value.parse().ok(),
        _ => {
            attrs.extra.insert(key.to_string(), value.to_string());
        }
    }
}

fn apply_edge_attr(attrs: &mut EdgeAttrs, key: &str, value: &str) {
    match key {
        "label" => attrs.label = Some(value.to_string()),
        "condition" => attrs.condition = Some(value.to_string()),
        "weight" => attrs.weight = value.parse().unwrap_or(0),
        "fidelity" => attrs.fidelity = Some(value.to_string()),
        "thread_id" => attrs.thread_id = Some(value.to_string()),
        "loop_restart" => attrs.loop_restart = value.eq_ignore_ascii_case("true") || value == "1",
        _ => {}
    }
}

fn apply_graph_attr(attrs: &mut GraphAttrs, key: &str, value: &str) {
    match key {
        "goal" => attrs.goal = Some(value.to_string()),
        "label" => attrs.label = Some(value.to_string()),
        "default_max_retry" => attrs.default_max_retry = value.parse().ok(),
        "retry_target" => attrs.retry_target = Some(value.to_string()),
        "fallback_retry_target" => attrs.fallback_retry_target = Some(value.to_string()),
        "default_fidelity" => attrs.default_fidelity = Some(value.to_string()),
        "rankdir" => attrs.rankdir = Some(value.to_string()),
        _ => {}
    }
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Split a statement body into top-level `;`-or-newline-terminated
/// statements, respecting brace nesting (for `subgraph { ... }`) and quotes.
fn split_statements(body: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    for c in body.chars() {
        if in_string {
            current.push(c);
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ';' | '\n' if depth == 0 => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Parse a chain `a -> b -> c [attrs]` into its node ids and the shared
/// attribute list text (if any).
fn parse_edge_chain(stmt: &str) -> Option<(Vec<String>, Option<String>)> {
    if !stmt.contains("->") {
        return None;
    }
    let (chain_part, attr_part) = match stmt.find('[') {
        Some(idx) if stmt.trim_end().ends_with(']') => {
            (&stmt[..idx], Some(stmt[idx + 1..stmt.rfind(']').unwrap()].to_string()))
        }
        _ => (stmt, None),
    };
    let ids: Vec<String> = chain_part
        .split("->")
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if ids.len() < 2 {
        return None;
    }
    Some((ids, attr_part))
}

struct ParseCtx {
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    edges: Vec<Edge>,
    graph_attrs: GraphAttrs,
    node_defaults: HashMap<String, String>,
}

fn ensure_node<'a>(ctx: &'a mut ParseCtx, id: &str) -> &'a mut Node {
    if !ctx.nodes.contains_key(id) {
        let mut attrs = NodeAttrs::default();
        for (k, v) in &ctx.node_defaults {
            apply_node_attr(&mut attrs, k, v);
        }
        ctx.nodes.insert(
            id.to_string(),
            Node {
                id: id.to_string(),
                attrs,
            },
        );
        ctx.node_order.push(id.to_string());
    }
    ctx.nodes.get_mut(id).unwrap()
}

fn process_statements(stmts: &[String], ctx: &mut ParseCtx) -> Result<()> {
    for stmt in stmts {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        if let Some(rest) = stmt.strip_prefix("subgraph") {
            let brace = rest
                .find('{')
                .ok_or_else(|| EngineError::Parse(format!("malformed subgraph: `{stmt}`")))?;
            let close = rest
                .rfind('}')
                .ok_or_else(|| EngineError::Parse(format!("unterminated subgraph: `{stmt}`")))?;
            let inner = &rest[brace + 1..close];
            let inner_stmts = split_statements(inner);
            process_statements(&inner_stmts, ctx)?;
            continue;
        }

        if let Some((ids, attr_text)) = parse_edge_chain(stmt) {
            let attrs_map = match attr_text {
                Some(t) => parse_attr_list(&t)?,
                None => HashMap::new(),
            };
            for pair in ids.windows(2) {
                ensure_node(ctx, &pair[0]);
                ensure_node(ctx, &pair[1]);
                let mut edge_attrs = EdgeAttrs::default();
                for (k, v) in &attrs_map {
                    apply_edge_attr(&mut edge_attrs, k, v);
                }
                ctx.edges.push(Edge {
                    from: pair[0].clone(),
                    to: pair[1].clone(),
                    attrs: edge_attrs,
                });
            }
            continue;
        }

        if let Some(bracket) = stmt.find('[') {
            let head = stmt[..bracket].trim();
            let close = stmt
                .rfind(']')
                .ok_or_else(|| EngineError::Parse(format!("unterminated attribute list: `{stmt}`")))?;
            let body = &stmt[bracket + 1..close];
            let attrs_map = parse_attr_list(body)?;

            if head == "graph" {
                for (k, v) in &attrs_map {
                    apply_graph_attr(&mut ctx.graph_attrs, k, v);
                }
            } else if head == "node" {
                for (k, v) in &attrs_map {
                    ctx.node_defaults.insert(k.clone(), v.clone());
                }
            } else {
                let id = head.trim_matches('"').to_string();
                if id.is_empty() || !id.chars().all(is_id_char) {
                    return Err(EngineError::Parse(format!("invalid node id: `{head}`")));
                }
                let node = ensure_node(ctx, &id);
                for (k, v) in &attrs_map {
                    apply_node_attr(&mut node.attrs, k, v);
                }
            }
            continue;
        }

        // Bare node declaration with no attribute list, e.g. `done`.
        let id = stmt.trim_matches('"').to_string();
        if !id.is_empty() && id.chars().all(is_id_char) {
            ensure_node(ctx, &id);
        }
    }
    Ok(())
}

/// Parse DSL source text into a validated [`Graph`].
pub fn parse(source: &str) -> Result<Graph> {
    let cleaned = strip_comments(source);
    let trimmed = cleaned.trim();

    let (graph_id, body) = if let Some(rest) = trimmed.strip_prefix("digraph") {
        let rest = rest.trim_start();
        let brace = rest
            .find('{')
            .ok_or_else(|| EngineError::Parse("missing `{` after `digraph`".to_string()))?;
        let id = rest[..brace].trim().trim_matches('"').to_string();
        let close = rest
            .rfind('}')
            .ok_or_else(|| EngineError::Parse("unterminated `digraph { ... }`".to_string()))?;
        (
            if id.is_empty() { "pipeline".to_string() } else { id },
            rest[brace + 1..close].to_string(),
        )
    } else {
        ("pipeline".to_string(), trimmed.to_string())
    };

    let statements = split_statements(&body);
    let mut ctx = ParseCtx {
        nodes: HashMap::new(),
        node_order: Vec::new(),
        edges: Vec::new(),
        graph_attrs: GraphAttrs::default(),
        node_defaults: HashMap::new(),
    };
    process_statements(&statements, &mut ctx)?;

    let graph = Graph {
        id: graph_id,
        nodes: ctx.nodes,
        edges: ctx.edges,
        attrs: ctx.graph_attrs,
    };
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;

    #[test]
    fn parses_diamond_with_conditions() {
        let src = r#"
            digraph pipeline {
                goal="ship it"
                start [shape=Mdiamond]
                A [shape=box]
                decision [shape=diamond]
                win [shape=box]
                retry [shape=box]
                retry2 [shape=box]
                done [shape=Msquare]

                start -> A
                A -> decision
                decision -> win [condition="outcome=success"]
                decision -> retry [condition="outcome=fail", weight=2]
                decision -> retry2 [condition="outcome=fail", weight=1]
                win -> done
                retry -> A
                retry2 -> A
            }
        "#;
        let graph = parse(src).unwrap();
        assert_eq!(graph.attrs.goal.as_deref(), Some("ship it"));
        assert_eq!(graph.nodes.len(), 7);
        assert_eq!(graph.outgoing("decision").len(), 3);
        assert_eq!(
            graph.nodes["start"].attrs.resolve_type(),
            Some(NodeType::Start)
        );
    }

    #[test]
    fn strips_comments_inside_labels_safely() {
        let src = r#"
            digraph g {
                // top comment
                start [shape=Mdiamond, label="not // a comment"]
                done [shape=Msquare]
                start -> done
            }
        "#;
        let graph = parse(src).unwrap();
        assert_eq!(
            graph.nodes["start"].attrs.label.as_deref(),
            Some("not // a comment")
        );
    }

    #[test]
    fn chained_edges_share_attrs() {
        let src = "digraph g { start [shape=Mdiamond] mid [shape=box] done [shape=Msquare] start -> mid -> done [weight=3] }";
        let graph = parse(src).unwrap();
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.edges.iter().all(|e| e.attrs.weight == 3));
    }

    #[test]
    fn rejects_graph_without_start() {
        let src = "digraph g { a [shape=box] b [shape=Msquare] a -> b }";
        assert!(parse(src).is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("bogus"), None);
    }
}
