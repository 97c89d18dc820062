//! `<title>` element rewriting.

use std::sync::LazyLock;

use regex::Regex;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)(<title\b[^>]*>)(.*?)(</title\s*>)").expect("title regex"));

/// Inner text of the first `<title>` element.
pub fn current_title(html: &str) -> Option<&str> {
    TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Why a title could not be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleError {
    Missing,
    Unchanged,
}

/// Replace the inner text of the first `<title>` element.
pub fn replace_title(html: &str, title: &str) -> Result<String, TitleError> {
    let caps = TITLE_RE.captures(html).ok_or(TitleError::Missing)?;
    let (Some(inner), Some(open), Some(close)) = (caps.get(2), caps.get(1), caps.get(3)) else {
        return Err(TitleError::Missing);
    };
    let escaped = escape_text(title.trim());
    if inner.as_str().trim() == escaped {
        return Err(TitleError::Unchanged);
    }
    let mut out = String::with_capacity(html.len() + escaped.len());
    out.push_str(&html[..open.end()]);
    out.push_str(&escaped);
    out.push_str(&html[close.start()..]);
    Ok(out)
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_first_title_only() {
        let html = "<head><TITLE>Old</TITLE></head><svg><title>icon</title></svg>";
        let out = replace_title(html, "New & Shiny").expect("replace");
        assert_eq!(
            out,
            "<head><TITLE>New &amp; Shiny</TITLE></head><svg><title>icon</title></svg>"
        );
        assert_eq!(current_title(&out), Some("New &amp; Shiny"));
    }

    #[test]
    fn missing_or_same_title_is_refused() {
        assert_eq!(replace_title("<p>hi</p>", "x"), Err(TitleError::Missing));
        assert_eq!(
            replace_title("<title> Home </title>", "Home"),
            Err(TitleError::Unchanged)
        );
    }
}
