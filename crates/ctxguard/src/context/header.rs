//! Parser for tool-result headers.
//!
//! The agent loop writes each tool result into history as a text block
//! that starts with a header, followed by the result body in the next
//! block(s):
//!
//! ```text
//! [read_file for 'src/main.rs'] Result:
//! [search_files for 'TODO' in '*.rs'] Result:
//! [update_todo_list] Result:
//! ```
//!
//! Grammar (first line only, anchored at the start of the text):
//!
//! ```text
//! header   := '[' NAME ( " for '" ARG "'" )? TRAILING? ']' ' '? "Result:"
//! NAME     := [A-Za-z0-9_-]+
//! ARG      := any text up to the first closing quote
//! TRAILING := any text up to the first ']' that is followed by "Result:"
//! ```

/// A recognized tool-result header, borrowing from the block text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolResultHeader<'a> {
    pub tool_name: &'a str,
    pub argument: Option<&'a str>,
    pub trailing: Option<&'a str>,
}

/// Parse a tool-result header at the start of `text`.
pub fn parse_header(text: &str) -> Option<ToolResultHeader<'_>> {
    let line = text.lines().next()?;
    let body = line.strip_prefix('[')?;
    let inner = header_inner(body)?;

    let name_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(inner.len());
    if name_len == 0 {
        return None;
    }
    let (tool_name, rest) = inner.split_at(name_len);

    if rest.is_empty() {
        return Some(ToolResultHeader {
            tool_name,
            argument: None,
            trailing: None,
        });
    }

    if let Some(quoted) = rest.strip_prefix(" for '") {
        let close = quoted.find('\'')?;
        let (argument, after) = quoted.split_at(close);
        let trailing = after.strip_prefix('\'').unwrap_or(after);
        return Some(ToolResultHeader {
            tool_name,
            argument: Some(argument),
            trailing: non_blank(trailing),
        });
    }

    Some(ToolResultHeader {
        tool_name,
        argument: None,
        trailing: non_blank(rest),
    })
}

/// Whether `text` starts with a tool-result header.
pub fn is_header(text: &str) -> bool {
    parse_header(text).is_some()
}

/// The text between `[` and the first `]` that is followed by `Result:`
/// (optionally after one space).
fn header_inner(body: &str) -> Option<&str> {
    body.match_indices(']').find_map(|(idx, _)| {
        let (inner, after) = body.split_at(idx);
        let after = after.strip_prefix(']')?;
        let after = after.strip_prefix(' ').unwrap_or(after);
        after.starts_with("Result:").then_some(inner)
    })
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_argument() {
        let h = parse_header("[read_file for 'a.ts'] Result:").unwrap();
        assert_eq!(h.tool_name, "read_file");
        assert_eq!(h.argument, Some("a.ts"));
        assert_eq!(h.trailing, None);
    }

    #[test]
    fn name_only() {
        let h = parse_header("[update_todo_list] Result:").unwrap();
        assert_eq!(h.tool_name, "update_todo_list");
        assert_eq!(h.argument, None);
    }

    #[test]
    fn trailing_text_after_argument_is_not_swallowed_into_argument() {
        let h = parse_header("[search_files for 'TODO' in '*.rs'] Result:").unwrap();
        assert_eq!(h.tool_name, "search_files");
        assert_eq!(h.argument, Some("TODO"));
        assert_eq!(h.trailing, Some("in '*.rs'"));
    }

    #[test]
    fn trailing_text_without_argument() {
        let h = parse_header("[list_files (recursive)] Result:").unwrap();
        assert_eq!(h.tool_name, "list_files");
        assert_eq!(h.argument, None);
        assert_eq!(h.trailing, Some("(recursive)"));
    }

    #[test]
    fn brackets_inside_argument() {
        let h = parse_header("[read_file for 'src/[id]/page.tsx'] Result:").unwrap();
        assert_eq!(h.argument, Some("src/[id]/page.tsx"));
    }

    #[test]
    fn space_before_result_is_optional() {
        assert!(is_header("[read_file for 'a']Result:"));
        assert!(is_header("[read_file for 'a'] Result:\nbody on next line"));
    }

    #[test]
    fn empty_argument() {
        let h = parse_header("[execute_command for ''] Result:").unwrap();
        assert_eq!(h.argument, Some(""));
    }

    #[test]
    fn rejects_non_headers() {
        assert!(!is_header(""));
        assert!(!is_header("plain text"));
        assert!(!is_header(" [read_file for 'a'] Result:"));
        assert!(!is_header("[read_file for 'a']"));
        assert!(!is_header("[read_file for 'a'] Output:"));
        assert!(!is_header("[] Result:"));
        assert!(!is_header("[read_file for 'unterminated] Result:"));
        assert!(!is_header("[read_file for 'a']\nResult:"));
    }

    #[test]
    fn placeholder_never_matches() {
        assert!(!is_header(crate::context::condense::CONDENSED_PLACEHOLDER));
    }

    #[test]
    fn multibyte_arguments_are_safe() {
        let h = parse_header("[read_file for 'données/é.txt'] Result:").unwrap();
        assert_eq!(h.argument, Some("données/é.txt"));
    }
}
