//! Reduces a fetched document to a [`Signature`].
//!
//! Selection is driven by a [`SelectionRule`]: a CSS landmark that must be
//! present, an optional item selector for repeated entries, and per-item
//! field rules. A missing landmark is a [`ParseError`], never an empty
//! signature, so a redesigned page cannot be mistaken for "no change".

use std::path::Path;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ParseError, ParseResult};
use crate::types::{Item, Signature};

/// Text inside these elements never contributes to a signature
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Versionable structural query describing the watched content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRule {
    /// Bump when the rule changes so old signatures are not compared
    #[serde(default = "default_version")]
    pub version: u32,

    /// CSS selector that must match at least once
    pub landmark: String,

    /// CSS selector for repeated, unordered entries inside the landmark
    #[serde(default)]
    pub item: Option<String>,

    /// Fields extracted from each entry
    #[serde(default)]
    pub fields: Vec<FieldRule>,

    /// Regex patterns for volatile substrings (timestamps, counters)
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_true")]
    pub lowercase: bool,

    /// Accept a landmark with zero matching entries
    #[serde(default)]
    pub allow_empty: bool,
}

/// How to pull one named value out of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,

    /// CSS selector relative to the entry; the first match is used.
    /// `None` means the entry itself.
    #[serde(default)]
    pub selector: Option<String>,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Regex the value must match; the value becomes capture `group`
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub group: usize,

    /// Entries missing a required field are skipped
    #[serde(default = "default_true")]
    pub required: bool,

    /// Keep original case even when the rule lowercases
    #[serde(default)]
    pub keep_case: bool,
}

impl FieldRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: None,
            attribute: None,
            pattern: None,
            group: 0,
            required: true,
            keep_case: false,
        }
    }

    pub fn select(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>, group: usize) -> Self {
        self.pattern = Some(pattern.into());
        self.group = group;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn keep_case(mut self) -> Self {
        self.keep_case = true;
        self
    }
}

impl SelectionRule {
    /// Normalized text of a landmark.
    pub fn text_of(landmark: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            landmark: landmark.into(),
            item: None,
            fields: Vec::new(),
            exclude: Vec::new(),
            lowercase: true,
            allow_empty: false,
        }
    }

    /// Whole `<body>` text; used when no rule file is configured.
    pub fn whole_body() -> Self {
        Self::text_of("body")
    }

    pub fn with_items(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    pub fn with_field(mut self, field: FieldRule) -> Self {
        self.fields.push(field);
        self
    }

    pub fn excluding(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn from_json(json: &str) -> ParseResult<Self> {
        serde_json::from_str(json).map_err(|e| ParseError::InvalidRule(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> ParseResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ParseError::InvalidRule(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

struct CompiledField {
    rule: FieldRule,
    selector: Option<Selector>,
    pattern: Option<Regex>,
}

/// A compiled [`SelectionRule`].
pub struct Extractor {
    rule: SelectionRule,
    landmark: Selector,
    item: Option<Selector>,
    fields: Vec<CompiledField>,
    exclude: Vec<Regex>,
}

impl Extractor {
    pub fn new(rule: SelectionRule) -> ParseResult<Self> {
        let landmark = parse_selector(&rule.landmark)?;
        let item = rule.item.as_deref().map(parse_selector).transpose()?;

        let mut fields = Vec::with_capacity(rule.fields.len());
        for field in &rule.fields {
            if field.name.is_empty() {
                return Err(ParseError::InvalidRule("field name is empty".to_string()));
            }
            let pattern = field.pattern.as_deref().map(Regex::new).transpose()?;
            if let Some(pattern) = &pattern {
                if field.group >= pattern.captures_len() {
                    return Err(ParseError::InvalidRule(format!(
                        "field {} uses group {} but pattern has {} group(s)",
                        field.name,
                        field.group,
                        pattern.captures_len() - 1
                    )));
                }
            }
            fields.push(CompiledField {
                selector: field.selector.as_deref().map(parse_selector).transpose()?,
                pattern,
                rule: field.clone(),
            });
        }

        let exclude = rule
            .exclude
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rule,
            landmark,
            item,
            fields,
            exclude,
        })
    }

    pub fn rule(&self) -> &SelectionRule {
        &self.rule
    }

    /// Reduce an HTML document to its signature.
    pub fn extract(&self, html: &str) -> ParseResult<Signature> {
        let document = Html::parse_document(html);

        let landmarks: Vec<ElementRef> = document.select(&self.landmark).collect();
        if landmarks.is_empty() {
            return Err(ParseError::LandmarkMissing {
                selector: self.rule.landmark.clone(),
            });
        }

        let signature = match (&self.item, self.fields.is_empty()) {
            (None, true) => {
                let text = landmarks
                    .iter()
                    .map(|el| self.normalize(&element_text(*el), false))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                Signature::text(self.rule.version, text)
            }
            (None, false) => {
                let items = landmarks.iter().filter_map(|el| self.build_item(*el)).collect();
                self.items_signature(items)?
            }
            (Some(item_selector), _) => {
                let items = landmarks
                    .iter()
                    .flat_map(|el| el.select(item_selector))
                    .filter_map(|el| self.build_item(el))
                    .collect();
                self.items_signature(items)?
            }
        };

        debug!(
            landmark = %self.rule.landmark,
            items = signature.item_count(),
            hash = %signature.hash.short(),
            "Signature extracted"
        );

        Ok(signature)
    }

    fn items_signature(&self, items: Vec<Item>) -> ParseResult<Signature> {
        if items.is_empty() && !self.rule.allow_empty {
            return Err(ParseError::EmptySelection {
                selector: self
                    .rule
                    .item
                    .clone()
                    .unwrap_or_else(|| self.rule.landmark.clone()),
            });
        }
        Ok(Signature::items(self.rule.version, items))
    }

    fn build_item(&self, entry: ElementRef) -> Option<Item> {
        if self.fields.is_empty() {
            let text = self.normalize(&element_text(entry), false);
            if text.is_empty() {
                return None;
            }
            return Some(Item::from([("text".to_string(), text)]));
        }

        let mut item = Item::new();
        for field in &self.fields {
            match self.field_value(entry, field) {
                Some(value) => {
                    item.insert(field.rule.name.clone(), value);
                }
                None if field.rule.required => return None,
                None => {}
            }
        }
        Some(item)
    }

    fn field_value(&self, entry: ElementRef, field: &CompiledField) -> Option<String> {
        let element = match &field.selector {
            Some(selector) => entry.select(selector).next()?,
            None => entry,
        };

        let raw = match &field.rule.attribute {
            Some(attribute) => element.value().attr(attribute)?.to_string(),
            None => element_text(element),
        };

        let cleaned = self.clean(&raw);
        let value = match &field.pattern {
            Some(pattern) => pattern
                .captures(&cleaned)?
                .get(field.rule.group)?
                .as_str()
                .trim()
                .to_string(),
            None => cleaned,
        };

        if value.is_empty() {
            return None;
        }
        Some(self.fold_case(value, field.rule.keep_case))
    }

    fn normalize(&self, raw: &str, keep_case: bool) -> String {
        self.fold_case(self.clean(raw), keep_case)
    }

    /// Unify spaces, drop excluded substrings, collapse whitespace.
    fn clean(&self, raw: &str) -> String {
        let mut text = raw.replace(['\u{a0}', '\u{2003}', '\u{2009}'], " ");
        for pattern in &self.exclude {
            text = pattern.replace_all(&text, " ").into_owned();
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn fold_case(&self, value: String, keep_case: bool) -> String {
        if self.rule.lowercase && !keep_case {
            value.to_lowercase()
        } else {
            value
        }
    }
}

fn parse_selector(selector: &str) -> ParseResult<Selector> {
    Selector::parse(selector).map_err(|e| ParseError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Visible text of an element, separated by spaces.
fn element_text(element: ElementRef) -> String {
    let mut parts = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    parts.join(" ")
}
