//! Parser for the troubleshooting block of a part page
//!
//! The block is one run of text holding three lists behind fixed marker
//! phrases: the symptoms the part fixes, the products it works with, and the
//! part numbers it replaces.

use regex::Regex;
use std::sync::OnceLock;

const FIXES_PATTERN: &str = r"(?s)This part fixes the following symptoms:\s*(.*?)\s*This part works with the following products:";
const PRODUCTS_PATTERN: &str = r"(?s)This part works with the following products:\s*(.*?)\s*Part#";
const REPLACES_PATTERN: &str = r"(?s)replaces these:\s*(.*?)\s*(?:Show less|Back to Top|$)";

struct Patterns {
    fixes: Regex,
    products: Regex,
    replaces: Regex,
    product_separators: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                fixes: Regex::new(FIXES_PATTERN).ok()?,
                products: Regex::new(PRODUCTS_PATTERN).ok()?,
                replaces: Regex::new(REPLACES_PATTERN).ok()?,
                product_separators: Regex::new(r"[\n|]+").ok()?,
            })
        })
        .as_ref()
}

fn tidy<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The three lists of a troubleshooting block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Troubleshooting {
    pub fixes: Vec<String>,
    pub products: Vec<String>,
    pub replacements: Vec<String>,
}

impl Troubleshooting {
    /// Comma-joined `(fixes, part_replacements, products)` as stored on a part
    pub fn joined(&self) -> (String, String, String) {
        (
            self.fixes.join(", "),
            self.replacements.join(", "),
            self.products.join(", "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty() && self.products.is_empty() && self.replacements.is_empty()
    }
}

/// Extracts the three lists from the block's text
///
/// A list whose marker is absent comes back empty.
pub fn parse_troubleshooting(text: &str) -> Troubleshooting {
    let Some(p) = patterns() else {
        return Troubleshooting::default();
    };

    let fixes = p
        .fixes
        .captures(text)
        .and_then(|c| c.get(1))
        // Symptoms are `|`-delimited; a line break can fall inside one
        .map(|m| tidy(m.as_str().split('|')))
        .unwrap_or_default();

    let products = p
        .products
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| tidy(p.product_separators.split(m.as_str())))
        .unwrap_or_default();

    let replacements = p
        .replaces
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|item| {
                    let item = item.trim();
                    // A trailing expander label shares the last item's node
                    if item.contains("Show") {
                        item.lines().next().unwrap_or("").trim()
                    } else {
                        item
                    }
                })
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Troubleshooting {
        fixes,
        products,
        replacements,
    }
}
