//! HTML feature extraction.
//!
//! Reduces a capture body to a weighted bag of lowercase tokens. The
//! extractor never fails: malformed markup is parsed tolerantly and an
//! unusable buffer simply yields an empty bag.

use ego_tree::NodeRef;
use scraper::{Html, Node};
use std::collections::HashMap;
use unicode_general_category::{get_general_category, GeneralCategory};

/// Extract the weighted token bag of an HTML document.
///
/// Text is gathered from every text node outside `<script>`/`<style>`
/// subtrees and comments, lowercased and cleaned of punctuation, then the
/// whole buffer is unescaped as a C-style string literal so that literal
/// `\xNN` sequences found in scraped content decode to their code points.
pub fn extract_html_features(html: &str) -> HashMap<String, u32> {
    let document = Html::parse_document(html);

    let mut buffer = String::with_capacity(html.len() / 2);
    collect_text(document.tree.root(), &mut buffer);

    let cleaned = unquote(&buffer).unwrap_or(buffer);

    let mut features = HashMap::new();
    for token in cleaned.split_whitespace() {
        *features.entry(token.to_string()).or_insert(0) += 1;
    }
    features
}

fn collect_text(node: NodeRef<'_, Node>, buffer: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Element(element) => {
                let name = element.name();
                if name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style") {
                    continue;
                }
                collect_text(child, buffer);
            }
            Node::Text(text) => scan_text(text, buffer),
            // Comments, doctypes and processing instructions carry no features.
            _ => {}
        }
    }
}

/// Lowercase a text node and append its cleaned tokens to the buffer.
///
/// `/` is elided, a backslash is kept only when it introduces an `\x`
/// escape, and any other control or punctuation code point becomes a
/// word break.
fn scan_text(text: &str, buffer: &mut String) {
    for raw_token in text.to_lowercase().split_whitespace() {
        let chars: Vec<char> = raw_token.chars().collect();
        for (i, &ch) in chars.iter().enumerate() {
            if ch == '/' {
                continue;
            }
            if ch == '\\' && chars.get(i + 1) == Some(&'x') {
                buffer.push('\\');
                continue;
            }
            if ch.is_control() || is_punctuation(ch) {
                buffer.push(' ');
                continue;
            }
            buffer.push(ch);
        }
        buffer.push(' ');
    }
}

fn is_punctuation(ch: char) -> bool {
    matches!(
        get_general_category(ch),
        GeneralCategory::ConnectorPunctuation
            | GeneralCategory::DashPunctuation
            | GeneralCategory::OpenPunctuation
            | GeneralCategory::ClosePunctuation
            | GeneralCategory::InitialPunctuation
            | GeneralCategory::FinalPunctuation
            | GeneralCategory::OtherPunctuation
    )
}

/// Decode the buffer as the body of a double-quoted C string literal.
///
/// Returns `None` on any malformed escape, in which case the caller keeps
/// the buffer untouched. A trailing bare backslash is malformed, not a
/// panic.
fn unquote(buffer: &str) -> Option<String> {
    if !buffer.contains('\\') {
        return None;
    }

    let mut decoded = String::with_capacity(buffer.len());
    let mut chars = buffer.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            decoded.push(ch);
            continue;
        }
        match chars.next()? {
            'x' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                decoded.push(char::from_u32(hi * 16 + lo)?);
            }
            'n' => decoded.push('\n'),
            't' => decoded.push('\t'),
            'r' => decoded.push('\r'),
            '0' => decoded.push('\0'),
            '\\' => decoded.push('\\'),
            '"' => decoded.push('"'),
            '\'' => decoded.push('\''),
            _ => return None,
        }
    }
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_repeated_elements_and_spaces() {
        let html = "<html><title>my title</title><body>\nabc\ntest\n\n123\nabc\n  space\n</body></html>";
        let want = bag(&[
            ("123", 1),
            ("abc", 2),
            ("my", 1),
            ("test", 1),
            ("title", 1),
            ("space", 1),
        ]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_punctuation_becomes_word_breaks() {
        let html = "<html><body>abc a.b.c. abc. test 123 abc</body></html>";
        let want = bag(&[
            ("123", 1),
            ("a", 1),
            ("abc", 3),
            ("b", 1),
            ("c", 1),
            ("test", 1),
        ]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_plain_text_input() {
        let want = bag(&[("just", 1), ("a", 1), ("string", 1)]);
        assert_eq!(extract_html_features("just a string"), want);
    }

    #[test]
    fn test_comments_scripts_and_styles_are_skipped() {
        let html = r#"<html><head>
</head><body>
<!--[if lt IE 9]>
<!-- Important Owl stylesheet -->
<link rel="stylesheet" href="css/owl.carousel.css">
<!-- Default Theme -->
<link rel="stylesheet" href="css/owl.theme.css">
<script src="js/html5shiv.js"></script>
<script src="js/respond.min.js"></script>
<![endif]-->
<p>Thank you for closing the message box.</p>
<a href="/subpage">test</a>
</body></html>"#;
        let want = bag(&[
            ("box", 1),
            ("closing", 1),
            ("for", 1),
            ("message", 1),
            ("test", 1),
            ("thank", 1),
            ("the", 1),
            ("you", 1),
        ]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_script_body_is_skipped() {
        let html = "<html><body><script>var x = 'hidden';</script><style>.a{color:red}</style>visible</body></html>";
        let want = bag(&[("visible", 1)]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_escape_sequences_and_unicode() {
        let html = "<html><title>Invalid /\\x94Invalid\\x0b\"</title><body>\n今日は\n\n</body></html>";
        let want = bag(&[("\u{94}invalid", 1), ("invalid", 1), ("今日は", 1)]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_backslash_without_x_is_a_word_break() {
        let html = "<Html>\n    <something>weird is happening \\c\\x0b\n    <span>tag</span><span>tag</span>\n    </HTML>";
        let want = bag(&[
            ("c", 1),
            ("weird", 1),
            ("is", 1),
            ("happening", 1),
            ("tag", 2),
        ]);
        assert_eq!(extract_html_features(html), want);
    }

    #[test]
    fn test_trailing_bare_backslash_does_not_decode() {
        // The scanner turns the lone backslash into a break, so no escape
        // ever reaches the decoder with a truncated payload.
        let features = extract_html_features("<html><body>abc\\</body></html>");
        assert_eq!(features, bag(&[("abc", 1)]));
    }

    #[test]
    fn test_empty_and_unparseable_input() {
        assert!(extract_html_features("").is_empty());
        assert!(extract_html_features("<><><!").is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let html = "<html><body>abc test 123 abc</body></html>";
        assert_eq!(extract_html_features(html), extract_html_features(html));
    }
}
