// Source text generation from the syntax tree.
// Printing concatenates every leaf's prefix and text in document order, which
// makes parse followed by print the identity on its input.

use super::*;

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;

    /// Source without the whitespace that precedes the first token.
    fn trimmed_source(&self) -> String {
        self.to_source().trim_start().to_string()
    }
}

impl ToSource for SyntaxNode {
    fn to_source(&self) -> String {
        let mut out = String::new();
        write_source(self, &mut out);
        out
    }
}

impl ToSource for Arc<SyntaxNode> {
    fn to_source(&self) -> String {
        self.as_ref().to_source()
    }
}

fn write_source(node: &SyntaxNode, out: &mut String) {
    if let Some(token) = node.token() {
        out.push_str(&token.prefix);
        out.push_str(&token.text);
        return;
    }
    for child in node.children() {
        write_source(child, out);
    }
}

/// Indentation that follows the last line break of a prefix.
pub fn indentation_of(prefix: &str) -> &str {
    match prefix.rfind('\n') {
        Some(pos) => &prefix[pos + 1..],
        None => "",
    }
}

/// Re-indent every line break in `prefix` from `from` to `to`.
///
/// Lines indented deeper than `from` keep their extra indentation. Lines that
/// do not start with `from` are left alone.
pub fn reindent(prefix: &str, from: &str, to: &str) -> String {
    if !prefix.contains('\n') {
        return prefix.to_string();
    }
    let mut out = String::with_capacity(prefix.len());
    for (i, line) in prefix.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            match line.strip_prefix(from) {
                Some(rest) => {
                    out.push_str(to);
                    out.push_str(rest);
                }
                None => out.push_str(line),
            }
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Escape text for use inside a Java string literal.
pub fn escape_java_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_java_string`] for the escapes it produces.
pub fn unescape_java_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
