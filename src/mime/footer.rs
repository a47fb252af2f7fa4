//! Per-recipient unsubscribe footers.

/// Footer text for one recipient, in both renditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    plain: String,
    html: String,
}

impl Footer {
    /// Build the footer for `recipient` (already formatted as
    /// `Name <address>`), the list's reason and the unsubscribe link.
    pub fn new(recipient: &str, reason: &str, unsubscribe_url: &str) -> Self {
        let sentence = format!("This message was sent to {recipient} {reason}.");
        let plain = format!(
            "\r\n----------------------------------------\r\n\
             {sentence}\r\n\
             To unsubscribe, visit {unsubscribe_url}\r\n"
        );
        let html = format!(
            "<div style=\"margin-top:2em;padding-top:0.5em;border-top:1px solid #ccc;\
             font-size:0.85em;color:#666\">{}<br>To unsubscribe, visit {}</div>",
            escape_html(&sentence),
            escape_html(unsubscribe_url)
        );
        Self { plain, html }
    }

    /// Text appended to a `text/plain` part.
    pub fn plain(&self) -> &str {
        &self.plain
    }

    /// Markup inserted before `</body>` of a `text/html` part.
    pub fn html(&self) -> &str {
        &self.html
    }
}

/// Escape the five HTML special characters.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
