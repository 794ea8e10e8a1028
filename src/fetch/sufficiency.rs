//! Content sufficiency checks
//!
//! A checker decides whether fetched markup is usable or whether the ladder
//! should escalate to a more expensive tier. Each site category has its own
//! checker variant, selected by `DomainType`.

use scraper::Html;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visible phrases of anti-bot interstitials and block pages
const BLOCK_PHRASES: &[&str] = &[
    "verify you are human",
    "are you a robot",
    "access denied",
    "unusual traffic from your computer",
    "checking your browser before accessing",
    "please enable cookies",
    "request unsuccessful. incapsula",
];

/// Challenge script/markup identifiers, matched against the raw markup
const CHALLENGE_MARKUP: &[&str] = &["cf-browser-verification", "captcha-delivery", "px-captcha"];

/// Pages with more visible text than this are never treated as block pages
const BLOCK_PAGE_MAX_TEXT: usize = 1500;

/// Site category selecting a sufficiency checker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainType {
    /// Any site: enough visible text and no block markers
    #[default]
    Generic,
    /// News sites: article bodies made of paragraphs
    News,
    /// Investor-relations and financial report pages
    Financial,
    /// Stock quote pages
    Stock,
}

impl DomainType {
    /// Minimum visible text length when no override is configured
    pub fn default_min_text_len(&self) -> usize {
        match self {
            Self::Generic => 200,
            Self::News => 500,
            Self::Financial => 300,
            Self::Stock => 200,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::News => "news",
            Self::Financial => "financial",
            Self::Stock => "stock",
        }
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "news" => Ok(Self::News),
            "financial" => Ok(Self::Financial),
            "stock" => Ok(Self::Stock),
            other => Err(format!("unknown domain type '{}'", other)),
        }
    }
}

/// Why content was judged insufficient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsufficientReason {
    /// Visible text shorter than required
    TooShort { len: usize, min: usize },
    /// A known block/challenge phrase was found
    BlockMarker(&'static str),
    /// Structural markers expected for this site category are missing
    MissingMarkers(DomainType),
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len, min } => {
                write!(f, "visible text too short ({} < {} chars)", len, min)
            }
            Self::BlockMarker(marker) => write!(f, "block marker found: '{}'", marker),
            Self::MissingMarkers(domain) => write!(f, "missing {} content markers", domain),
        }
    }
}

/// Sufficiency checker for one site category
#[derive(Debug, Clone)]
pub struct ContentChecker {
    domain_type: DomainType,
    min_text_len: usize,
}

impl ContentChecker {
    pub fn new(domain_type: DomainType) -> Self {
        Self {
            domain_type,
            min_text_len: domain_type.default_min_text_len(),
        }
    }

    /// Overrides the minimum visible text length
    pub fn with_min_text_len(mut self, min_text_len: usize) -> Self {
        self.min_text_len = min_text_len;
        self
    }

    /// Checks fetched markup
    ///
    /// Block markers are checked first, then visible text length, then the
    /// category-specific structural markers. Block markers only count on
    /// short pages: phrases must be visible text, challenge identifiers may
    /// sit anywhere in the markup.
    pub fn check(&self, html: &str) -> Result<(), InsufficientReason> {
        let lowered = html.to_lowercase();
        let (text, len) = visible_text(html);

        if len <= BLOCK_PAGE_MAX_TEXT {
            let marker = BLOCK_PHRASES
                .iter()
                .find(|m| text.contains(*m))
                .or_else(|| CHALLENGE_MARKUP.iter().find(|m| lowered.contains(*m)));
            if let Some(marker) = marker {
                return Err(InsufficientReason::BlockMarker(marker));
            }
        }

        if len < self.min_text_len {
            return Err(InsufficientReason::TooShort {
                len,
                min: self.min_text_len,
            });
        }

        let has_markers = match self.domain_type {
            DomainType::Generic => true,
            DomainType::News => lowered.contains("<article") || lowered.matches("<p").count() >= 3,
            DomainType::Financial => [
                "annual report",
                "financial",
                "investor",
                "balance sheet",
                "revenue",
                "<table",
                ".pdf",
            ]
            .iter()
            .any(|m| lowered.contains(m)),
            DomainType::Stock => ["price", "market cap", "volume", "shares", "<table"]
                .iter()
                .any(|m| lowered.contains(m)),
        };

        if has_markers {
            Ok(())
        } else {
            Err(InsufficientReason::MissingMarkers(self.domain_type))
        }
    }
}

/// Lowercased visible text and its length in trimmed characters
///
/// Text inside `script`, `style`, `noscript` and `template` is not visible.
fn visible_text(html: &str) -> (String, usize) {
    let document = Html::parse_document(html);
    let mut text = String::new();
    let mut len = 0;

    for node in document.root_element().descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .map(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"))
            .unwrap_or(false);
        let fragment = fragment.trim();
        if hidden || fragment.is_empty() {
            continue;
        }

        len += fragment.chars().count();
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&fragment.to_lowercase());
    }

    (text, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<html><head><title>t</title></head><body>{}</body></html>", body)
    }

    fn words(n: usize) -> String {
        "lorem ipsum ".repeat(n)
    }

    #[test]
    fn test_generic_accepts_text_page() {
        let checker = ContentChecker::new(DomainType::Generic);
        assert!(checker.check(&page(&format!("<p>{}</p>", words(30)))).is_ok());
    }

    #[test]
    fn test_generic_rejects_js_shell() {
        let checker = ContentChecker::new(DomainType::Generic);
        let html = format!(
            r#"<html><body><div id="root"></div><script>{}</script></body></html>"#,
            "var x = 1;".repeat(100)
        );
        assert!(matches!(
            checker.check(&html),
            Err(InsufficientReason::TooShort { .. })
        ));
    }

    #[test]
    fn test_block_marker_rejected() {
        let checker = ContentChecker::new(DomainType::Generic).with_min_text_len(0);
        let html = page("<h1>Please verify you are human</h1>");
        assert_eq!(
            checker.check(&html),
            Err(InsufficientReason::BlockMarker("verify you are human"))
        );
    }

    #[test]
    fn test_challenge_script_rejected() {
        let checker = ContentChecker::new(DomainType::Generic).with_min_text_len(0);
        let html = page(r#"<script src="https://ct.captcha-delivery.com/c.js"></script><p>One moment</p>"#);
        assert_eq!(
            checker.check(&html),
            Err(InsufficientReason::BlockMarker("captcha-delivery"))
        );
    }

    #[test]
    fn test_hidden_or_incidental_phrases_ignored() {
        let checker = ContentChecker::new(DomainType::Generic);

        let noscript = page(&format!(
            "<noscript>Please enable cookies and JavaScript</noscript><p>{}</p>",
            words(30)
        ));
        assert!(checker.check(&noscript).is_ok());

        let attribute = page(&format!(
            "<div data-msg=\"access denied\"></div><p>{}</p>",
            words(30)
        ));
        assert!(checker.check(&attribute).is_ok());

        let article = page(&format!(
            "<p>{}</p><p>The court found that access denied to the records was unlawful.</p>",
            words(200)
        ));
        assert!(checker.check(&article).is_ok());
    }

    #[test]
    fn test_news_needs_article_structure() {
        let checker = ContentChecker::new(DomainType::News).with_min_text_len(10);
        assert!(checker
            .check(&page(&format!("<div>{}</div>", words(10))))
            .is_err());
        assert!(checker
            .check(&page(&format!("<article>{}</article>", words(10))))
            .is_ok());
        assert!(checker
            .check(&page("<p>one paragraph</p><p>two paragraph</p><p>three</p>"))
            .is_ok());
    }

    #[test]
    fn test_financial_markers() {
        let checker = ContentChecker::new(DomainType::Financial).with_min_text_len(10);
        assert_eq!(
            checker.check(&page(&words(10))),
            Err(InsufficientReason::MissingMarkers(DomainType::Financial))
        );
        assert!(checker
            .check(&page("<a href='/q3.pdf'>Quarterly results and more text</a>"))
            .is_ok());
    }

    #[test]
    fn test_stock_markers() {
        let checker = ContentChecker::new(DomainType::Stock).with_min_text_len(5);
        assert!(checker.check(&page("Last price 12.30 USD today")).is_ok());
        assert!(checker.check(&page("Nothing useful here at all")).is_err());
    }

    #[test]
    fn test_domain_type_parsing() {
        assert_eq!("NEWS".parse::<DomainType>(), Ok(DomainType::News));
        assert_eq!("financial".parse::<DomainType>(), Ok(DomainType::Financial));
        assert!("weather".parse::<DomainType>().is_err());
    }

    #[test]
    fn test_visible_text_ignores_scripts() {
        let html = "<html><body><script>abcdef</script><style>p{}</style>Hello <b>World</b></body></html>";
        assert_eq!(visible_text(html), ("hello world".to_string(), 10));
    }
}
