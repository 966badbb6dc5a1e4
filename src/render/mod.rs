//! Display tree for tutor text
//!
//! Splits model output into prose, math and code segments so a client can
//! hand each piece to the right renderer (KaTeX for math, a code block for
//! fenced code). This is a pure function: same input, same tree.
//!
//! Recognized markup:
//! - ```` ```lang ... ``` ```` fenced code blocks
//! - `$$...$$` block math and `$...$` inline math (`\$` is a literal dollar)
//! - `` `code` `` inline code spans
//! - `[label](url)` links
//!
//! Anything unclosed is kept as plain text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Text { text: String },
    InlineMath { tex: String },
    BlockMath { tex: String },
    InlineCode { code: String },
    CodeBlock {
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    Link { label: String, url: String },
}

pub fn render(text: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        let parsed = match c {
            '`' if rest.starts_with("```") => code_block(rest),
            '`' => delimited(rest, "`", |code| Node::InlineCode { code }),
            '$' if rest.starts_with("$$") => delimited(rest, "$$", |tex| Node::BlockMath {
                tex: tex.trim().to_string(),
            }),
            '$' => delimited(rest, "$", |tex| Node::InlineMath { tex }),
            '[' => link(rest),
            '\\' if rest[1..].starts_with('$') => {
                plain.push('$');
                rest = &rest[2..];
                continue;
            }
            _ => None,
        };

        match parsed {
            Some((node, consumed)) => {
                flush(&mut plain, &mut nodes);
                nodes.push(node);
                rest = &rest[consumed..];
            }
            None => {
                // Unclosed delimiters fall through as text
                let width = if rest.starts_with("```") {
                    3
                } else if rest.starts_with("$$") {
                    2
                } else {
                    c.len_utf8()
                };
                plain.push_str(&rest[..width]);
                rest = &rest[width..];
            }
        }
    }

    flush(&mut plain, &mut nodes);
    nodes
}

fn flush(plain: &mut String, nodes: &mut Vec<Node>) {
    if !plain.is_empty() {
        nodes.push(Node::Text {
            text: std::mem::take(plain),
        });
    }
}

/// `open` + content + `open`, with non-empty content
fn delimited<F>(input: &str, open: &str, make: F) -> Option<(Node, usize)>
where
    F: FnOnce(String) -> Node,
{
    let body = &input[open.len()..];
    let end = body.find(open)?;
    let content = &body[..end];
    if content.trim().is_empty() {
        return None;
    }
    Some((make(content.to_string()), open.len() * 2 + end))
}

fn code_block(input: &str) -> Option<(Node, usize)> {
    let body = &input[3..];
    let end = body.find("```")?;
    let inner = &body[..end];

    let (language, code) = match inner.split_once('\n') {
        Some((first, code)) => {
            let lang = first.trim();
            ((!lang.is_empty()).then(|| lang.to_string()), code)
        }
        None => (None, inner),
    };

    Some((
        Node::CodeBlock {
            language,
            code: code.trim_end_matches('\n').to_string(),
        },
        3 + end + 3,
    ))
}

fn link(input: &str) -> Option<(Node, usize)> {
    let close = input.find("](")?;
    let label = &input[1..close];
    if label.contains('\n') || label.contains('[') {
        return None;
    }
    let after = &input[close + 2..];
    let end = after.find(')')?;
    let url = after[..end].trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    Some((
        Node::Link {
            label: label.to_string(),
            url: url.to_string(),
        },
        close + 2 + end + 1,
    ))
}
