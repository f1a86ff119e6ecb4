//! Text cleaning applied once at ingestion.

use std::borrow::Cow;

use pulldown_cmark::{Event, Options, Parser, TagEnd};

/// Remove NUL bytes. Postgres `TEXT` columns reject them, so this runs on
/// every document before chunking.
#[must_use]
pub fn strip_null_bytes(text: &str) -> Cow<'_, str> {
    if text.contains('\0') {
        Cow::Owned(text.replace('\0', ""))
    } else {
        Cow::Borrowed(text)
    }
}

/// Reduce markdown to plain text for embedding. Formatting markers, link
/// destinations, and image references are dropped; visible text and code
/// content are kept.
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let options =
        Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(text, options);

    let mut out = String::with_capacity(text.len());
    for event in parser {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::TableRow,
            ) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::End(TagEnd::TableCell) => {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }

    out.trim().to_string()
}
