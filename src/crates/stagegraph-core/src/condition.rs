//! The condition expression grammar and evaluator (§4.C).
//!
//! ```text
//! expr    := orExpr
//! orExpr  := andExpr (' OR ' andExpr)*
//! andExpr := atom (' AND ' atom)*
//! atom    := key OP value | key 'contains' value | key
//! OP      := '=' | '!='
//! key     := identifier ('.' identifier)*
//! value   := quoted-string | identifier | number
//! ```
//!
//! `key=value` resolves `key` against the outcome (special keys `outcome`,
//! `preferred_label`), then against context, defaulting to `""`; comparison
//! is case-insensitive. A bare key is truthy unless its resolved value is
//! empty or the literal `"false"`/`"0"`. The empty expression is always true.

use crate::context::Context;
use crate::outcome::Outcome;

#[derive(Debug, Clone)]
enum Atom {
    Eq { key: String, value: String },
    Ne { key: String, value: String },
    Contains { key: String, value: String },
    Truthy { key: String },
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn parse_atom(src: &str) -> Atom {
    let src = src.trim();
    if let Some(idx) = src.find("!=") {
        return Atom::Ne {
            key: src[..idx].trim().to_string(),
            value: unquote(&src[idx + 2..]),
        };
    }
    if let Some(idx) = src.find('=') {
        return Atom::Eq {
            key: src[..idx].trim().to_string(),
            value: unquote(&src[idx + 1..]),
        };
    }
    // Word-boundary search for ` contains ` avoids matching keys/values
    // that merely embed the substring "contains".
    let lower = src.to_ascii_lowercase();
    if let Some(idx) = lower.find(" contains ") {
        return Atom::Contains {
            key: src[..idx].trim().to_string(),
            value: unquote(&src[idx + " contains ".len()..]),
        };
    }
    Atom::Truthy {
        key: src.trim().to_string(),
    }
}

fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> String {
    match key {
        "outcome" => outcome
            .status
            .map(|s| s.as_context_value().to_string())
            .unwrap_or_default(),
        "preferred_label" => outcome.preferred_label.clone().unwrap_or_default(),
        other => context.get_string(other, ""),
    }
}

fn eval_atom(atom: &Atom, outcome: &Outcome, context: &Context) -> bool {
    match atom {
        Atom::Eq { key, value } => {
            resolve_key(key, outcome, context).eq_ignore_ascii_case(value)
        }
        Atom::Ne { key, value } => {
            !resolve_key(key, outcome, context).eq_ignore_ascii_case(value)
        }
        Atom::Contains { key, value } => resolve_key(key, outcome, context)
            .to_ascii_lowercase()
            .contains(&value.to_ascii_lowercase()),
        Atom::Truthy { key } => {
            let resolved = resolve_key(key, outcome, context);
            !resolved.is_empty() && resolved != "false" && resolved != "0"
        }
    }
}

/// Evaluate a condition expression against an outcome+context. Returns
/// `true` for the empty expression.
pub fn evaluate(expr: &str, outcome: &Outcome, context: &Context) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }
    expr.split(" OR ").any(|and_group| {
        and_group
            .split(" AND ")
            .all(|atom_src| eval_atom(&parse_atom(atom_src), outcome, context))
    })
}
