//! Markdown → Telegram HTML.
//!
//! Telegram accepts a small HTML subset (`b`, `i`, `s`, `code`, `pre`,
//! `a`).  Input is escaped first; code spans are set aside before the
//! inline rules run so their contents are never reformatted.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static FENCED_CODE: Lazy<Regex> = Lazy::new(|| re(r"(?s)```[\w+\-]*\n?(.*?)```"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| re(r"`([^`\n]+)`"));
static HEADER: Lazy<Regex> = Lazy::new(|| re(r"(?m)^#{1,6}\s+(.+)$"));
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| re(r"\*\*(.+?)\*\*"));
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| re(r"__(.+?)__"));
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| re(r"(?m)(^|[^\w*])\*([^*\n]+?)\*($|[^\w*])"));
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| re(r"(?m)(^|[^\w_])_([^_\n]+?)_($|[^\w_])"));
static STRIKE: Lazy<Regex> = Lazy::new(|| re(r"~~(.+?)~~"));
static LINK: Lazy<Regex> = Lazy::new(|| re(r"\[([^\]\n]+)\]\(([^)\s]+)\)"));
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| re("\u{0}(\\d+)\u{0}"));
static TAG: Lazy<Regex> = Lazy::new(|| re(r"</?[a-zA-Z][^>]*>"));

fn re(pattern: &str) -> Regex {
    // Patterns are compile-time constants covered by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid markup pattern {pattern:?}: {e}"))
}

/// Escape the characters Telegram's HTML parser treats specially.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_html`].
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Drop tags and decode entities, for resending rendered text unformatted.
pub fn html_to_plain(html: &str) -> String {
    unescape_html(&TAG.replace_all(html, ""))
}

/// Render Markdown as Telegram-compatible HTML.
pub fn markdown_to_telegram_html(text: &str) -> String {
    let mut stash: Vec<String> = Vec::new();
    let mut stash_with = |rendered: String| {
        stash.push(rendered);
        format!("\u{0}{}\u{0}", stash.len() - 1)
    };

    let escaped = escape_html(text);
    let out = FENCED_CODE
        .replace_all(&escaped, |c: &Captures| stash_with(format!("<pre>{}</pre>", &c[1])))
        .into_owned();
    let out = INLINE_CODE
        .replace_all(&out, |c: &Captures| stash_with(format!("<code>{}</code>", &c[1])))
        .into_owned();

    let out = HEADER.replace_all(&out, "<b>$1</b>");
    let out = BOLD_STARS.replace_all(&out, "<b>$1</b>");
    let out = BOLD_UNDERSCORES.replace_all(&out, "<b>$1</b>");
    let out = ITALIC_STAR.replace_all(&out, "$1<i>$2</i>$3");
    let out = ITALIC_UNDERSCORE.replace_all(&out, "$1<i>$2</i>$3");
    let out = STRIKE.replace_all(&out, "<s>$1</s>");
    let out = LINK.replace_all(&out, r#"<a href="$2">$1</a>"#);

    PLACEHOLDER
        .replace_all(&out, |c: &Captures| {
            c[1].parse::<usize>()
                .ok()
                .and_then(|i| stash.get(i).cloned())
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("a < b && c > \"d\""), "a &lt; b &amp;&amp; c &gt; &quot;d&quot;");
    }

    #[test]
    fn inline_styles() {
        assert_eq!(markdown_to_telegram_html("**bold** and *it*"), "<b>bold</b> and <i>it</i>");
        assert_eq!(markdown_to_telegram_html("~~gone~~"), "<s>gone</s>");
        assert_eq!(markdown_to_telegram_html("__b__ _i_"), "<b>b</b> <i>i</i>");
    }

    #[test]
    fn snake_case_words_are_not_italicised() {
        assert_eq!(markdown_to_telegram_html("call my_func_name now"), "call my_func_name now");
    }

    #[test]
    fn headers_become_bold() {
        assert_eq!(markdown_to_telegram_html("# Title\nbody"), "<b>Title</b>\nbody");
    }

    #[test]
    fn code_is_escaped_and_left_alone() {
        let html = markdown_to_telegram_html("```rust\nlet x = *a * b;\nif x < 1 {}\n```");
        assert_eq!(html, "<pre>let x = *a * b;\nif x &lt; 1 {}\n</pre>");
        assert_eq!(markdown_to_telegram_html("use `**not bold**`"), "use <code>**not bold**</code>");
    }

    #[test]
    fn plain_fallback_strips_tags() {
        let html = markdown_to_telegram_html("**a < b** and `x`");
        assert_eq!(html_to_plain(&html), "a < b and x");
    }

    #[test]
    fn links() {
        assert_eq!(
            markdown_to_telegram_html("[docs](https://example.com/a?b=1&c=2)"),
            r#"<a href="https://example.com/a?b=1&amp;c=2">docs</a>"#
        );
    }

    #[test]
    fn all_patterns_compile() {
        for r in [
            &FENCED_CODE, &INLINE_CODE, &HEADER, &BOLD_STARS, &BOLD_UNDERSCORES,
            &ITALIC_STAR, &ITALIC_UNDERSCORE, &STRIKE, &LINK, &PLACEHOLDER, &TAG,
        ] {
            Lazy::force(r);
        }
    }
}
