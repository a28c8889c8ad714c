//! HTML → Markdown conversion for message bodies.

/// Wide enough that html2text never wraps a realistic line.
const UNWRAPPED_WIDTH: usize = 10_000;

/// Convert a Teams HTML body to Markdown-ish text.
///
/// Lines are not wrapped. If the HTML cannot be parsed the input is returned
/// unchanged.
pub fn html_to_markdown(html: &str) -> String {
    if !html.contains('<') {
        return html.to_string();
    }

    match html2text::from_read(html.as_bytes(), UNWRAPPED_WIDTH) {
        Ok(text) => text.trim_end_matches('\n').to_string(),
        Err(err) => {
            tracing::debug!(error = %err, "unable to convert message body, keeping raw html");
            html.to_string()
        }
    }
}
