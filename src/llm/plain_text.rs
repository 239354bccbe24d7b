//! Reduce model output to plain text a messenger can display.
//!
//! Models occasionally answer with LaTeX or Markdown even when told not
//! to. Both waste characters and render as noise on the device.

use std::sync::LazyLock;

use regex::Regex;

static TEXT_CMD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\text\{([^}]*)\}").expect("valid regex"));
static BRACED_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\^_]\\?\{([^}]*)\}").expect("valid regex"));
static CARET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\^(\w)").expect("valid regex"));
static DISPLAY_MATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\$([^$]+)\$\$").expect("valid regex"));
static INLINE_MATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([^$\d][^$]*)\$").expect("valid regex"));
static MARKDOWN_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").expect("valid regex"));
static MARKDOWN_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const REPLACEMENTS: &[(&str, &str)] = &[
    (r"\leftrightarrow", "<->"),
    (r"\rightarrow", "->"),
    (r"\leftarrow", "<-"),
    (r"\cdot", "*"),
    (r"\times", "x"),
    (r"\approx", "≈"),
    (r"\equiv", "="),
    (r"\infty", "inf"),
    (r"\neq", "≠"),
    (r"\div", "/"),
    (r"\pm", "+/-"),
    (r"\leq", "≤"),
    (r"\geq", "≥"),
    (r"\le", "≤"),
    (r"\ge", "≥"),
];

/// Strip markup and collapse whitespace to single spaces.
pub fn to_plain_text(text: &str) -> String {
    let mut text = TEXT_CMD.replace_all(text, "$1").into_owned();
    for (command, replacement) in REPLACEMENTS {
        text = text.replace(command, replacement);
    }
    let text = DISPLAY_MATH.replace_all(&text, "$1");
    let text = INLINE_MATH.replace_all(&text, "$1");
    let text = BRACED_SCRIPT.replace_all(&text, "$1");
    let text = CARET.replace_all(&text, "$1");
    let text = MARKDOWN_EMPHASIS.replace_all(&text, "$1$2");
    let text = MARKDOWN_HEADING.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}
