//! The Tool Output Truncator (§4.I): keeps a tool's result small enough
//! to put in front of the model without discarding the output entirely —
//! the full text always still reaches the event stream via
//! `TOOL_CALL_OUTPUT_DELTA`, truncation only shrinks what lands in
//! history.
//!
//! Three modes, picked per tool (a `shell` command wants the tail; a
//! `grep` result wants to keep both ends so the caller can see the first
//! and last matches):
//!
//! - [`TruncateMode::Head`] — keep the first `max` bytes.
//! - [`TruncateMode::Tail`] — keep the last `max` bytes.
//! - [`TruncateMode::HeadTail`] — keep half from each end.
//! - [`TruncateMode::Lines`] — keep the first and last `max` *lines*
//!   rather than bytes.
//!
//! §8 invariant 8 is the law every mode must satisfy:
//! `truncate(x, max, mode).len() <= max + BANNER.len()`, and
//! `truncate(x, max, mode) == x` whenever `x.len() <= max`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateMode {
    Head,
    Tail,
    HeadTail,
    Lines,
}

impl fmt::Display for TruncateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Head => "head",
            Self::Tail => "tail",
            Self::HeadTail => "head_tail",
            Self::Lines => "lines",
        };
        write!(f, "{s}")
    }
}

/// Truncate `text` to at most `max` bytes of original content (plus the
/// banner), per `mode`. `max` is clamped to at least 1 so a banner always
/// has somewhere to attach.
pub fn truncate(text: &str, max: usize, mode: TruncateMode) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let max = max.max(1);

    match mode {
        TruncateMode::Head => {
            let cut = floor_char_boundary(text, max);
            let omitted = text.len() - cut;
            format!("{}{}", &text[..cut], banner(omitted))
        }
        TruncateMode::Tail => {
            let start = ceil_char_boundary(text, text.len() - max);
            let omitted = start;
            format!("{}{}", banner(omitted), &text[start..])
        }
        TruncateMode::HeadTail => {
            let half = max / 2;
            let head_cut = floor_char_boundary(text, half);
            let tail_start = ceil_char_boundary(text, text.len().saturating_sub(max - half));
            let omitted = tail_start.saturating_sub(head_cut);
            format!(
                "{}{}{}",
                &text[..head_cut],
                banner(omitted),
                &text[tail_start..]
            )
        }
        TruncateMode::Lines => truncate_lines(text, max),
    }
}

/// Like [`truncate`] but `max` counts lines rather than bytes, keeping
/// roughly the same number from the head and the tail.
fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let max_lines = max_lines.max(1);
    let head_n = max_lines / 2;
    let tail_n = max_lines - head_n;
    let omitted = lines.len() - head_n - tail_n;
    let head = lines[..head_n].join("\n");
    let tail = lines[lines.len() - tail_n..].join("\n");
    format!(
        "{head}\n... [{omitted} lines omitted, see event stream for full output] ...\n{tail}"
    )
}

fn banner(omitted_bytes: usize) -> String {
    format!(
        "\n... [{omitted_bytes} bytes omitted, see event stream for full output] ...\n"
    )
}

/// Largest index `<= n` that lands on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, n: usize) -> usize {
    let mut n = n.min(s.len());
    while n > 0 && !s.is_char_boundary(n) {
        n -= 1;
    }
    n
}

/// Smallest index `>= n` that lands on a UTF-8 char boundary.
fn ceil_char_boundary(s: &str, n: usize) -> usize {
    let mut n = n.min(s.len());
    while n < s.len() && !s.is_char_boundary(n) {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_returned_unchanged() {
        let text = "short";
        assert_eq!(truncate(text, 100, TruncateMode::Tail), text);
        assert_eq!(truncate(text, 100, TruncateMode::Head), text);
        assert_eq!(truncate(text, 100, TruncateMode::HeadTail), text);
        assert_eq!(truncate(text, 100, TruncateMode::Lines), text);
    }

    #[test]
    fn head_keeps_the_start() {
        let text = "a".repeat(200);
        let out = truncate(&text, 50, TruncateMode::Head);
        assert!(out.starts_with(&"a".repeat(50)));
    }

    #[test]
    fn tail_keeps_the_end() {
        let mut text = "a".repeat(150);
        text.push_str("TAIL");
        let out = truncate(&text, 10, TruncateMode::Tail);
        assert!(out.ends_with("TAIL"));
    }

    #[test]
    fn head_tail_keeps_both_ends() {
        let text = format!("HEAD{}TAIL", "x".repeat(500));
        let out = truncate(&text, 20, TruncateMode::HeadTail);
        assert!(out.starts_with("HEAD"));
        assert!(out.ends_with("TAIL"));
    }

    #[test]
    fn length_law_holds_across_modes_and_sizes() {
        let text = "x".repeat(10_000);
        for mode in [
            TruncateMode::Head,
            TruncateMode::Tail,
            TruncateMode::HeadTail,
        ] {
            for max in [1, 10, 100, 1000, 9999] {
                let out = truncate(&text, max, mode);
                // "\n... [NNNN bytes omitted, see event stream for full output] ...\n"
                // is well under 100 bytes even for a 5-digit omitted count.
                let banner_len = 100;
                assert!(
                    out.len() <= max + banner_len,
                    "mode {mode:?} max {max} produced {} bytes",
                    out.len()
                );
            }
        }
    }

    #[test]
    fn never_splits_a_multibyte_char() {
        let text = "日".repeat(1000);
        for mode in [TruncateMode::Head, TruncateMode::Tail, TruncateMode::HeadTail] {
            let out = truncate(&text, 17, mode);
            assert!(out.is_char_boundary(out.len()));
        }
    }

    #[test]
    fn lines_mode_keeps_head_and_tail_lines() {
        let text: String = (0..100).map(|i| format!("line{i}\n")).collect();
        let out = truncate_lines(&text, 10);
        assert!(out.contains("line0"));
        assert!(out.contains("line99"));
        assert!(out.contains("omitted"));
    }
}

#[cfg(test)]
mod truncation_law_properties {
    use super::*;
    use proptest::prelude::*;

    fn arb_mode() -> impl Strategy<Value = TruncateMode> {
        prop_oneof![
            Just(TruncateMode::Head),
            Just(TruncateMode::Tail),
            Just(TruncateMode::HeadTail),
        ]
    }

    proptest! {
        // §8 invariant 8: truncation never grows past `max` plus a
        // bounded banner, for any byte/char mix and any mode.
        #[test]
        fn truncated_output_never_exceeds_max_plus_banner(
            text in ".{0,2000}",
            max in 1usize..500,
            mode in arb_mode(),
        ) {
            let out = truncate(&text, max, mode);
            prop_assert!(out.len() <= max + 100);
        }

        // §8 invariant 8: untouched when already within budget.
        #[test]
        fn text_within_budget_is_returned_verbatim(
            text in ".{0,200}",
            slack in 0usize..100,
        ) {
            let max = text.len() + slack;
            for mode in [TruncateMode::Head, TruncateMode::Tail, TruncateMode::HeadTail] {
                prop_assert_eq!(truncate(&text, max, mode), text.clone());
            }
        }

        // Never split a multi-byte char, regardless of where the cut lands.
        #[test]
        fn never_splits_a_char_boundary(
            text in "[a-z日本語🦀]{0,300}",
            max in 1usize..200,
            mode in arb_mode(),
        ) {
            let out = truncate(&text, max, mode);
            prop_assert!(out.is_char_boundary(out.len()));
        }
    }
}
