//! Display rendering: status lines, thinking block, citations, markers, and
//! the MarkdownV2-safe fallback escape.

use streambot_core::Citation;

/// Rotating status entries appended to a live message while it streams.
/// Purely cosmetic; the order is fixed and the index cycles.
pub const STATUS_LINES: [&str; 12] = [
    "🤔 Thinking…",
    "🔍 Analyzing…",
    "🧠 Reasoning…",
    "✍️ Writing…",
    "📝 Drafting…",
    "💡 Connecting ideas…",
    "📚 Consulting sources…",
    "🧩 Piecing it together…",
    "⚙️ Working…",
    "🔎 Reviewing…",
    "✨ Polishing…",
    "⏳ Almost there…",
];

/// Marker appended when the user stopped the stream.
pub const STOPPED_MARKER: &str = "[stopped]";

/// Status entry for `index`, cycling through [`STATUS_LINES`].
pub fn status_line(index: usize) -> &'static str {
    STATUS_LINES[index % STATUS_LINES.len()]
}

/// Appends a status line to a rendered body. An empty body becomes the status
/// line alone.
pub fn append_status(body: &str, status: &str) -> String {
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{}\n\n{}", body, status)
    }
}

/// Strips the trailing status line from a rendered message.
///
/// Heuristic preserved from the source behaviour: a body containing a newline
/// is assumed to carry real content with the status on its trailing line,
/// which is dropped; a single-line body is taken to be status-only and is
/// dropped wholesale. Real single-line content that arrived without a newline
/// misfires here; callers that can, pass the unrendered body instead.
pub fn strip_status_line(rendered: &str) -> &str {
    match rendered.rfind('\n') {
        Some(pos) => rendered[..pos].trim_end_matches('\n'),
        None => "",
    }
}

/// Rendered display length, counted in chars (the unit of the platform ceiling).
pub fn display_len(s: &str) -> usize {
    s.chars().count()
}

/// Renders the thinking buffer as a quoted block, one `> ` prefix per line.
pub fn quote_thinking(thinking: &str) -> String {
    thinking
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Char length of the quoted thinking block for a raw thinking buffer.
pub fn quoted_len(thinking: &str) -> usize {
    if thinking.is_empty() {
        0
    } else {
        display_len(&quote_thinking(thinking))
    }
}

/// Builds the message body: quoted thinking block, blank line, then the answer.
pub fn render_body(thinking: &str, text: &str) -> String {
    match (thinking.is_empty(), text.is_empty()) {
        (true, _) => text.to_string(),
        (false, true) => quote_thinking(thinking),
        (false, false) => format!("{}\n\n{}", quote_thinking(thinking), text),
    }
}

/// Numbered source list appended to the final render; empty when no citations.
pub fn render_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nSources:");
    for (i, citation) in citations.iter().enumerate() {
        match &citation.title {
            Some(title) => out.push_str(&format!("\n{}. {} — {}", i + 1, title, citation.url)),
            None => out.push_str(&format!("\n{}. {}", i + 1, citation.url)),
        }
    }
    out
}

/// Error block appended to the last good content on a terminal failure.
pub fn error_suffix(message: &str) -> String {
    format!("\n\n⚠️ Error: {}", message)
}

/// Escapes all MarkdownV2 special characters so arbitrary model output can be
/// sent with the markdown parse mode enabled.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Fallback render used after a markup parse failure: both parts fully
/// escaped, composed the same way as the primary render.
pub fn safe_render(thinking: &str, text: &str) -> String {
    render_body(&escape_markdown(thinking), &escape_markdown(text))
}
