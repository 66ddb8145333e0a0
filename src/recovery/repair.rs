// src/recovery/repair.rs
//! Pure text repairs for almost-JSON. Each step is `&str -> String`, keeps no
//! state, and treats quoted strings (with escapes) as opaque.
//!
//! Steps run in `RepairStep::ORDER`; later steps assume earlier ones ran.

/// One named repair, applied in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairStep {
    /// `{"a": 1,}` -> `{"a": 1}`
    StripTrailingCommas,
    /// `{"a": "trunc` -> `{"a": ""`, dangling keys and commas dropped
    TruncateDanglingTail,
    /// `{"a": [1` -> `{"a": [1]}`
    BalanceBrackets,
}

impl RepairStep {
    pub const ORDER: [RepairStep; 3] = [
        RepairStep::StripTrailingCommas,
        RepairStep::TruncateDanglingTail,
        RepairStep::BalanceBrackets,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RepairStep::StripTrailingCommas => "trailing-comma removal",
            RepairStep::TruncateDanglingTail => "dangling-string truncation",
            RepairStep::BalanceBrackets => "bracket balancing",
        }
    }

    pub fn apply(self, text: &str) -> String {
        match self {
            RepairStep::StripTrailingCommas => strip_trailing_commas(text),
            RepairStep::TruncateDanglingTail => truncate_dangling_tail(text),
            RepairStep::BalanceBrackets => balance_brackets(text),
        }
    }
}

/// Drop every comma whose next non-whitespace char is `}` or `]`.
/// Single pass: a comma stays pending until the next significant char decides it.
pub fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    // byte offset in `out` of a comma that may still be dropped
    let mut pending: Option<usize> = None;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c.is_whitespace() {
            out.push(c);
            continue;
        }
        match c {
            '}' | ']' => {
                if let Some(at) = pending.take() {
                    // only whitespace follows the comma, so this shift is short
                    out.remove(at);
                }
            }
            ',' => {
                pending = Some(out.len());
                out.push(c);
                continue;
            }
            '"' => in_string = true,
            _ => {}
        }
        pending = None;
        out.push(c);
    }
    out
}

/// Clean up whatever a token limit cut off mid-way:
/// - an unterminated string value (after `:`) becomes `""`
/// - an unterminated key or array element is dropped
/// - a complete key with no value is dropped
/// - trailing commas go, a trailing `:` gets an empty string value
pub fn truncate_dangling_tail(text: &str) -> String {
    let mut out = text.trim_end().to_string();
    let state = scan(&out);

    if let Some(start) = state.open_string {
        let is_value = preceding_char(&out, start) == Some(':');
        out.truncate(start);
        if is_value {
            out.push_str("\"\"");
        }
    } else if let Some(start) = state.last_string_start.filter(|_| out.ends_with('"')) {
        let in_object = state.stack.last() == Some(&'{');
        if in_object && matches!(preceding_char(&out, start), Some('{') | Some(',')) {
            out.truncate(start);
        }
    }

    loop {
        let len = out.trim_end().len();
        out.truncate(len);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.push_str(" \"\"");
        }
        break;
    }
    out
}

/// Append `]` then `}` for every opener without a closer. Count-based.
pub fn balance_brackets(text: &str) -> String {
    let state = scan(text);
    let mut out = text.trim_end().to_string();
    for _ in 0..state.open_brackets.saturating_sub(state.close_brackets) {
        out.push(']');
    }
    for _ in 0..state.open_braces.saturating_sub(state.close_braces) {
        out.push('}');
    }
    out
}

#[derive(Debug, Default)]
struct ScanState {
    /// Byte offset of the opening quote when the text ends inside a string.
    open_string: Option<usize>,
    last_string_start: Option<usize>,
    /// Unclosed openers, innermost last.
    stack: Vec<char>,
    open_braces: usize,
    close_braces: usize,
    open_brackets: usize,
    close_brackets: usize,
}

fn scan(text: &str) -> ScanState {
    let mut st = ScanState::default();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                st.open_string = None;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                st.open_string = Some(i);
                st.last_string_start = Some(i);
            }
            '{' => {
                st.stack.push('{');
                st.open_braces += 1;
            }
            '[' => {
                st.stack.push('[');
                st.open_brackets += 1;
            }
            '}' => {
                if st.stack.last() == Some(&'{') {
                    st.stack.pop();
                }
                st.close_braces += 1;
            }
            ']' => {
                if st.stack.last() == Some(&'[') {
                    st.stack.pop();
                }
                st.close_brackets += 1;
            }
            _ => {}
        }
    }
    st
}

fn preceding_char(text: &str, idx: usize) -> Option<char> {
    text[..idx].trim_end().chars().last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_commas_removed_outside_strings_only() {
        assert_eq!(strip_trailing_commas(r#"{"a": 1,}"#), r#"{"a": 1}"#);
        assert_eq!(strip_trailing_commas("[1, 2,\n ]"), "[1, 2\n ]");
        assert_eq!(
            strip_trailing_commas(r#"{"note": "keep ,} this"}"#),
            r#"{"note": "keep ,} this"}"#
        );
    }

    #[test]
    fn consecutive_commas_keep_all_but_the_last() {
        assert_eq!(strip_trailing_commas("[1,,]"), "[1,]");
        assert_eq!(strip_trailing_commas(r#"{"a": "x",  }"#), r#"{"a": "x"  }"#);
    }

    #[test]
    fn long_comma_runs_are_handled_in_one_pass() {
        let body = "1,   ".repeat(50_000);
        let input = format!("[{body}]");
        let out = strip_trailing_commas(&input);
        assert_eq!(out.len(), input.len() - 1);
        assert!(out.ends_with("1   ]"));
        assert_eq!(out.matches(',').count(), 49_999);

        let spaced = format!("[1,{}]", " ".repeat(200_000));
        assert_eq!(strip_trailing_commas(&spaced), format!("[1{}]", " ".repeat(200_000)));
    }

    #[test]
    fn unterminated_value_becomes_empty_string() {
        let out = truncate_dangling_tail(r#"{"a": 1, "summary": "The portfolio is we"#);
        assert_eq!(out, r#"{"a": 1, "summary": """#);
    }

    #[test]
    fn dangling_key_is_dropped() {
        assert_eq!(truncate_dangling_tail(r#"{"a": 1, "b"#), r#"{"a": 1"#);
        assert_eq!(truncate_dangling_tail(r#"{"a": 1, "b""#), r#"{"a": 1"#);
    }

    #[test]
    fn array_string_elements_are_not_keys() {
        assert_eq!(truncate_dangling_tail(r#"{"a": ["x", "y""#), r#"{"a": ["x", "y""#);
        assert_eq!(truncate_dangling_tail(r#"{"a": ["x", "y"#), r#"{"a": ["x""#);
    }

    #[test]
    fn trailing_colon_and_commas() {
        assert_eq!(truncate_dangling_tail(r#"{"a": 1,  "#), r#"{"a": 1"#);
        assert_eq!(truncate_dangling_tail(r#"{"a":"#), r#"{"a": """#);
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let out = truncate_dangling_tail(r#"{"q": "say \"hi"#);
        assert_eq!(out, r#"{"q": """#);
    }

    #[test]
    fn balance_appends_missing_closers() {
        assert_eq!(balance_brackets(r#"{"a": {"b": 1}"#), r#"{"a": {"b": 1}}"#);
        assert_eq!(balance_brackets(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
        // brackets inside strings do not count
        assert_eq!(balance_brackets(r#"{"a": "{[" "#), r#"{"a": "{["}"#);
    }

    #[test]
    fn balanced_text_is_untouched() {
        let s = r#"{"a": [1, {"b": 2}]}"#;
        assert_eq!(balance_brackets(s), s);
        assert_eq!(strip_trailing_commas(s), s);
        assert_eq!(truncate_dangling_tail(s), s);
    }

    #[test]
    fn order_is_fixed() {
        assert_eq!(
            RepairStep::ORDER,
            [
                RepairStep::StripTrailingCommas,
                RepairStep::TruncateDanglingTail,
                RepairStep::BalanceBrackets
            ]
        );
    }
}
