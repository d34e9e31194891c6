use scraper::{Html, Node, Selector};

lazy_static::lazy_static! {
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
}

/// Visible text of an HTML document with whitespace collapsed to single spaces.
/// Script, style and noscript contents are dropped.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut raw = String::with_capacity(html.len() / 2);
    for node in doc.tree.root().descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .map_or(false, |name| matches!(name, "script" | "style" | "noscript"));
            if hidden {
                continue;
            }
            raw.push_str(text);
            raw.push(' ');
        }
    }
    collapse_whitespace(&raw)
}

/// Text of the first `<title>` element, or an empty string.
pub fn title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
