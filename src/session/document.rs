//! Owned snapshots of parsed pages
//!
//! [`Document`] and [`Element`] keep raw HTML and parse it on demand, so they can
//! be held across await points inside worker tasks.

use crate::session::SessionError;
use scraper::{ElementRef, Html, Node, Selector};

/// Parses a CSS selector, reporting the offending text on failure
pub fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|e| SessionError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Collapses runs of whitespace into single spaces and trims the ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Source of the current page together with the URL it was read from
#[derive(Debug, Clone)]
pub struct Document {
    url: String,
    source: String,
}

impl Document {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// All elements matching `selector`, in document order
    pub fn select(&self, selector: &str) -> Result<Vec<Element>, SessionError> {
        let selector = parse_selector(selector)?;
        let html = Html::parse_document(&self.source);
        let elements = html.select(&selector).map(Element::from_ref).collect();
        Ok(elements)
    }

    pub fn select_one(&self, selector: &str) -> Result<Option<Element>, SessionError> {
        Ok(self.select(selector)?.into_iter().next())
    }

    /// Number of elements matching `selector`
    pub fn count(&self, selector: &str) -> Result<usize, SessionError> {
        let selector = parse_selector(selector)?;
        let html = Html::parse_document(&self.source);
        let count = html.select(&selector).count();
        Ok(count)
    }

    /// Visible text of `<body>`; non-HTML sources are returned as-is
    pub fn body_text(&self) -> String {
        if !self.source.trim_start().starts_with('<') {
            return self.source.trim().to_string();
        }
        let html = Html::parse_document(&self.source);
        match Selector::parse("body") {
            Ok(body) => html
                .select(&body)
                .next()
                .map(|el| text_lines(el))
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

/// Outer HTML of one element
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    html: String,
}

impl Element {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    fn from_ref(el: ElementRef<'_>) -> Self {
        Self { html: el.html() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Runs `f` against the element re-parsed as a fragment
    fn with_root<R>(&self, f: impl FnOnce(ElementRef<'_>) -> R) -> Option<R> {
        let fragment = Html::parse_fragment(&self.html);
        let root = fragment
            .root_element()
            .children()
            .find_map(ElementRef::wrap)?;
        Some(f(root))
    }

    /// Concatenated text with whitespace collapsed
    pub fn text(&self) -> String {
        self.with_root(|el| normalize_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default()
    }

    /// Non-empty text nodes, each trimmed, one per line
    pub fn text_lines(&self) -> String {
        self.with_root(text_lines).unwrap_or_default()
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.with_root(|el| el.value().attr(name).map(str::to_string))
            .flatten()
    }

    /// Descendants matching `selector`
    pub fn select(&self, selector: &str) -> Result<Vec<Element>, SessionError> {
        let selector = parse_selector(selector)?;
        Ok(self
            .with_root(|root| {
                root.select(&selector)
                    .filter(|el| el.id() != root.id())
                    .map(Element::from_ref)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    pub fn select_one(&self, selector: &str) -> Result<Option<Element>, SessionError> {
        Ok(self.select(selector)?.into_iter().next())
    }

    /// Text of the first descendant matching `selector`, if non-empty
    pub fn select_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .select_one(selector)?
            .map(|el| el.text())
            .filter(|t| !t.is_empty()))
    }

    /// Text of the element right after the first descendant matching `selector`
    pub fn following_sibling_text(&self, selector: &str) -> Result<Option<String>, SessionError> {
        let selector = parse_selector(selector)?;
        Ok(self
            .with_root(|root| {
                let anchor = root.select(&selector).next()?;
                let sibling = anchor.next_siblings().find_map(ElementRef::wrap)?;
                Some(normalize_whitespace(&sibling.text().collect::<String>()))
            })
            .flatten())
    }

    /// Text that follows a `<span>` whose own text equals `label`
    ///
    /// Matches markup like `<span>Manufacturer #:</span> WPW10321304`.
    pub fn labelled_value(&self, label: &str) -> Option<String> {
        let span = Selector::parse("span").ok()?;
        self.with_root(|root| {
            let label_el = root
                .select(&span)
                .find(|el| normalize_whitespace(&el.text().collect::<String>()) == label)?;
            let value = match label_el.next_sibling()?.value() {
                Node::Text(text) => text.to_string(),
                Node::Element(_) => ElementRef::wrap(label_el.next_sibling()?)?
                    .text()
                    .collect::<String>(),
                _ => return None,
            };
            let value = normalize_whitespace(&value);
            (!value.is_empty()).then_some(value)
        })
        .flatten()
    }
}

fn text_lines(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
  <h1 class="title-main">  Whirlpool   Dishwasher </h1>
  <div id="Troubleshooting"></div>
  <div>This part fixes the following symptoms:<br>Leaking | Noisy</div>
  <div class="mega-m__part">
    <a class="mega-m__part__name" href="/PS1.htm">Door Gasket</a>
    <div><span>PartSelect #:</span> PS11752778</div>
    <div><span>Manufacturer #:</span> WPW10321304</div>
  </div>
  <div class="qna">
    <div class="js-searchKeys">Does it fit?</div>
    <div>For model number WDT780SAEM1</div>
  </div>
</body></html>
"#;

    #[test]
    fn test_select_and_text() {
        let doc = Document::new("https://x.test/", PAGE);
        let title = doc.select_one("h1.title-main").unwrap().unwrap();
        assert_eq!(title.text(), "Whirlpool Dishwasher");
        assert_eq!(doc.count("div").unwrap(), 8);
    }

    #[test]
    fn test_adjacent_sibling_selector() {
        let doc = Document::new("https://x.test/", PAGE);
        let block = doc.select_one("div#Troubleshooting + div").unwrap().unwrap();
        assert_eq!(
            block.text_lines(),
            "This part fixes the following symptoms:\nLeaking | Noisy"
        );
    }

    #[test]
    fn test_element_select_and_attr() {
        let doc = Document::new("https://x.test/", PAGE);
        let part = doc.select_one("div.mega-m__part").unwrap().unwrap();
        let link = part.select_one("a.mega-m__part__name").unwrap().unwrap();
        assert_eq!(link.attr("href").as_deref(), Some("/PS1.htm"));
        assert_eq!(link.text(), "Door Gasket");
        assert!(part.select("div.mega-m__part").unwrap().is_empty());
    }

    #[test]
    fn test_labelled_value() {
        let doc = Document::new("https://x.test/", PAGE);
        let part = doc.select_one("div.mega-m__part").unwrap().unwrap();
        assert_eq!(part.labelled_value("PartSelect #:").as_deref(), Some("PS11752778"));
        assert_eq!(
            part.labelled_value("Manufacturer #:").as_deref(),
            Some("WPW10321304")
        );
        assert!(part.labelled_value("Missing:").is_none());
    }

    #[test]
    fn test_following_sibling_text() {
        let doc = Document::new("https://x.test/", PAGE);
        let qna = doc.select_one("div.qna").unwrap().unwrap();
        assert_eq!(
            qna.following_sibling_text("div.js-searchKeys").unwrap().as_deref(),
            Some("For model number WDT780SAEM1")
        );
    }

    #[test]
    fn test_body_text_passes_json_through() {
        let doc = Document::new("https://x.test/api", r#"{"a": 1}"#);
        assert_eq!(doc.body_text(), r#"{"a": 1}"#);

        let html = Document::new("https://x.test/", "<html><body><pre>{\"a\": 1}</pre></body></html>");
        assert_eq!(html.body_text(), "{\"a\": 1}");
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Document::new("https://x.test/", PAGE);
        assert!(matches!(
            doc.select("div[["),
            Err(SessionError::InvalidSelector { .. })
        ));
    }
}
