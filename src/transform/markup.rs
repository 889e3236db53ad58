use std::sync::LazyLock;

use regex::Regex;

/// Elements whose content is whitespace sensitive or not markup at all.
static RAW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pre\b.*?</pre>|<textarea\b.*?</textarea>|<script\b.*?</script>|<style\b.*?</style>")
        .expect("invalid raw element regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid comment regex"));

static BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*\n\s*<").expect("invalid whitespace regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}|\n").expect("invalid whitespace regex"));

static DEFAULT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s+type=["']text/(?:javascript|css)["']"#).expect("invalid type regex")
});

/// Minifies HTML markup.
///
/// Removes comments (conditional comments are kept), collapses whitespace,
/// drops line breaks between tags and the default `type` attribute of script
/// and style tags. The content of `pre`, `textarea`, `script` and `style`
/// elements is left untouched.
pub fn minify(text: &str) -> String {
    let mut raw = Vec::new();

    // Raw elements are swapped for tag-shaped placeholders so the whitespace
    // rules treat them like any other element.
    let masked = RAW.replace_all(text, |caps: &regex::Captures| {
        raw.push(DEFAULT_TYPE.replace(&caps[0], "").into_owned());
        format!("<\u{0}{}>", raw.len() - 1)
    });

    let mut out = collapse(&masked);
    for (i, element) in raw.iter().enumerate() {
        out = out.replacen(&format!("<\u{0}{i}>"), element, 1);
    }

    out.trim().to_string()
}

fn collapse(text: &str) -> String {
    let text = COMMENT.replace_all(text, |caps: &regex::Captures| {
        let comment = &caps[0];
        if comment.starts_with("<!--[if") {
            comment.to_string()
        } else {
            String::new()
        }
    });
    let text = BETWEEN_TAGS.replace_all(&text, "><");
    let text = WHITESPACE.replace_all(&text, " ");
    text.into_owned()
}
