//! Rendering model output for the platform's markup dialects.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*?)```").expect("code fence pattern compiles"));

/// Characters MarkdownV2 treats as syntax.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// The markup variant a reply is rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderDialect {
    /// Loose HTML-like tags; fenced code becomes `<pre>`.
    #[default]
    Html,
    /// Strict markup where every reserved character must be escaped.
    MarkdownV2,
}

impl RenderDialect {
    /// The platform's name for this dialect.
    #[must_use]
    pub fn parse_mode(&self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::MarkdownV2 => "MarkdownV2",
        }
    }
}

/// Renders `text` for `dialect`. Total: never fails.
#[must_use]
pub fn format(text: &str, dialect: RenderDialect) -> String {
    match dialect {
        RenderDialect::Html => wrap_code_blocks(text),
        RenderDialect::MarkdownV2 => escape_reserved(text),
    }
}

fn wrap_code_blocks(text: &str) -> String {
    CODE_FENCE
        .replace_all(text, |caps: &regex::Captures<'_>| format!("<pre>{}</pre>", &caps[1]))
        .into_owned()
}

fn escape_reserved(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_becomes_pre() {
        let out = format("Try:\n```\nls -la\n```\ndone", RenderDialect::Html);
        assert_eq!(out, "Try:\n<pre>\nls -la\n</pre>\ndone");
        assert!(!out.contains("```"));
    }

    #[test]
    fn multiple_blocks_are_matched_non_greedily() {
        let out = format("```a``` and ```b```", RenderDialect::Html);
        assert_eq!(out, "<pre>a</pre> and <pre>b</pre>");
    }

    #[test]
    fn language_tag_stays_inside_block() {
        let out = format("```rust\nfn main() {}\n```", RenderDialect::Html);
        assert_eq!(out, "<pre>rust\nfn main() {}\n</pre>");
    }

    #[test]
    fn unterminated_fence_passes_through() {
        let text = "half a ```fence";
        assert_eq!(format(text, RenderDialect::Html), text);
    }

    #[test]
    fn plain_text_is_unchanged_in_html() {
        let text = "1 < 2 & (3 > 2)";
        assert_eq!(format(text, RenderDialect::Html), text);
    }

    #[test]
    fn every_reserved_character_is_escaped_once() {
        let input: String = RESERVED.iter().collect();
        let out = format(&input, RenderDialect::MarkdownV2);
        let expected: String = RESERVED.iter().flat_map(|c| ['\\', *c]).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn other_characters_are_untouched() {
        let text = "Hello, world: 42 ünïcode \\ ok";
        assert_eq!(format(text, RenderDialect::MarkdownV2), text);
    }

    #[test]
    fn mixed_text_escapes_only_reserved() {
        assert_eq!(
            format("v1.2 (beta)!", RenderDialect::MarkdownV2),
            "v1\\.2 \\(beta\\)\\!"
        );
    }

    #[test]
    fn parse_modes() {
        assert_eq!(RenderDialect::Html.parse_mode(), "HTML");
        assert_eq!(RenderDialect::MarkdownV2.parse_mode(), "MarkdownV2");
    }
}
