//! Extraction rulesets: externally supplied selector + pattern configuration.
//!
//! A [`Ruleset`] is plain data (deserializable from JSON or TOML) describing
//! which fields to pull from a document and where to find asset references.
//! It must be compiled into a [`CompiledRuleset`] before use; compilation
//! fails fast on a bad selector or pattern, before any fetch happens.

use regex::Regex;
use scraper::Selector;
use serde::Deserialize;

use super::error::ExtractError;

/// Default attribute consulted by asset rules.
fn default_asset_attribute() -> String {
    "src".to_string()
}

/// A rule producing one field of the extracted record.
///
/// The rule is a tagged shape over {selector-only, selector+pattern}: when
/// `pattern` is present, it refines the selected text and the first capture
/// group (or the whole match) becomes the field value.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    /// Field name; keys are unique within a record.
    pub name: String,
    /// CSS selector locating the element.
    pub selector: String,
    /// Attribute to read instead of the element's text content.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Optional regular-expression refinement.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// A rule collecting asset (image) references.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetRule {
    /// CSS selector locating asset elements.
    pub selector: String,
    /// Attribute holding the asset URI (defaults to `src`).
    #[serde(default = "default_asset_attribute")]
    pub attribute: String,
}

/// Externally supplied extraction configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Ruleset {
    /// Field rules, applied in order.
    pub fields: Vec<FieldRule>,
    /// Asset reference rules.
    #[serde(default)]
    pub assets: Vec<AssetRule>,
}

impl Ruleset {
    /// Compiles all selectors and patterns.
    ///
    /// An empty (or whitespace-only) selector is compiled to a rule that
    /// never matches: it yields a missing field at extraction time rather
    /// than an error here.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::RulesetInvalid`] naming the first rule whose
    /// selector or pattern fails to parse.
    pub fn compile(&self) -> Result<CompiledRuleset, ExtractError> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for rule in &self.fields {
            let selector = compile_selector(&rule.selector)
                .map_err(|e| ExtractError::ruleset_invalid(format!("field '{}': {e}", rule.name)))?;
            let pattern = match &rule.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| {
                    ExtractError::ruleset_invalid(format!("field '{}' pattern: {e}", rule.name))
                })?),
                None => None,
            };
            fields.push(CompiledFieldRule {
                name: rule.name.clone(),
                selector,
                attribute: rule.attribute.clone(),
                pattern,
            });
        }

        let mut assets = Vec::with_capacity(self.assets.len());
        for (index, rule) in self.assets.iter().enumerate() {
            let selector = compile_selector(&rule.selector)
                .map_err(|e| ExtractError::ruleset_invalid(format!("asset rule {index}: {e}")))?;
            assets.push(CompiledAssetRule {
                selector,
                attribute: rule.attribute.clone(),
            });
        }

        Ok(CompiledRuleset { fields, assets })
    }
}

/// Parses a selector, mapping the empty string to "never matches".
fn compile_selector(raw: &str) -> Result<Option<Selector>, String> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Selector::parse(raw)
        .map(Some)
        .map_err(|e| format!("selector '{raw}': {e}"))
}

/// A field rule with its selector and pattern parsed.
#[derive(Debug, Clone)]
pub struct CompiledFieldRule {
    pub(crate) name: String,
    /// `None` means the rule never matches (empty selector in the source).
    pub(crate) selector: Option<Selector>,
    pub(crate) attribute: Option<String>,
    pub(crate) pattern: Option<Regex>,
}

/// An asset rule with its selector parsed.
#[derive(Debug, Clone)]
pub struct CompiledAssetRule {
    pub(crate) selector: Option<Selector>,
    pub(crate) attribute: String,
}

/// A fully compiled ruleset, ready to apply to documents.
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    pub(crate) fields: Vec<CompiledFieldRule>,
    pub(crate) assets: Vec<CompiledAssetRule>,
}

impl CompiledRuleset {
    /// Number of field rules.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of asset rules.
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ruleset_deserializes_from_json() {
        let json = r#"{
            "fields": [
                {"name": "title", "selector": "h1.title"},
                {"name": "isbn", "selector": "span.meta", "pattern": "ISBN ([0-9-]+)"}
            ],
            "assets": [
                {"selector": "img.cover"}
            ]
        }"#;
        let ruleset: Ruleset = serde_json::from_str(json).unwrap();
        assert_eq!(ruleset.fields.len(), 2);
        assert_eq!(ruleset.assets[0].attribute, "src");
    }

    #[test]
    fn test_compile_valid_ruleset() {
        let ruleset = Ruleset {
            fields: vec![FieldRule {
                name: "title".to_string(),
                selector: "h1".to_string(),
                attribute: None,
                pattern: Some(r"\w+".to_string()),
            }],
            assets: vec![AssetRule {
                selector: "img".to_string(),
                attribute: "src".to_string(),
            }],
        };
        let compiled = ruleset.compile().unwrap();
        assert_eq!(compiled.field_count(), 1);
        assert_eq!(compiled.asset_count(), 1);
    }

    #[test]
    fn test_compile_rejects_bad_selector() {
        let ruleset = Ruleset {
            fields: vec![FieldRule {
                name: "broken".to_string(),
                selector: "h1[".to_string(),
                attribute: None,
                pattern: None,
            }],
            assets: vec![],
        };
        let error = ruleset.compile().unwrap_err();
        assert!(matches!(error, ExtractError::RulesetInvalid { .. }));
        assert!(error.to_string().contains("broken"));
    }

    #[test]
    fn test_compile_rejects_bad_pattern() {
        let ruleset = Ruleset {
            fields: vec![FieldRule {
                name: "title".to_string(),
                selector: "h1".to_string(),
                attribute: None,
                pattern: Some("(unclosed".to_string()),
            }],
            assets: vec![],
        };
        let error = ruleset.compile().unwrap_err();
        assert!(matches!(error, ExtractError::RulesetInvalid { .. }));
    }

    #[test]
    fn test_compile_empty_selector_is_never_match_not_error() {
        let ruleset = Ruleset {
            fields: vec![FieldRule {
                name: "optional".to_string(),
                selector: "   ".to_string(),
                attribute: None,
                pattern: None,
            }],
            assets: vec![],
        };
        let compiled = ruleset.compile().unwrap();
        assert!(compiled.fields[0].selector.is_none());
    }
}
