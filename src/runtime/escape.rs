use std::fmt::Write;

/// Escapes `& < > " '` for HTML text and attribute values.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encodes every UTF-8 byte outside ASCII alphanumerics, `-` and `.`.
pub fn uri_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>"), "&lt;b&gt;");
        assert_eq!(
            html_escape(r#"Tom & "Jerry's""#),
            "Tom &amp; &quot;Jerry&#39;s&quot;"
        );
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn test_uri_escape() {
        assert_eq!(uri_escape("a b/c"), "a%20b%2Fc");
        assert_eq!(uri_escape("file-1.txt"), "file-1.txt");
        assert_eq!(uri_escape("é"), "%C3%A9");
        assert_eq!(uri_escape("日本"), "%E6%97%A5%E6%9C%AC");
        assert_eq!(uri_escape("a_b~"), "a%5Fb%7E");
    }
}
