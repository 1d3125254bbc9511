//! Ruleset-driven field extraction from HTML documents.
//!
//! The extractor parses the raw payload into a tolerant DOM tree (html5ever
//! error-recovery rules via `scraper`: unclosed tags are auto-closed, invalid
//! nesting is corrected) and applies a [`CompiledRuleset`] to populate the
//! field mapping and collect asset references. A selector that matches
//! nothing yields a missing field, never an error.
//!
//! Pattern refinements use the `regex` crate, which guarantees linear-time
//! matching: adversarial or pathological markup cannot cause super-linear
//! extraction time. This is a requirement, not an implementation detail - the
//! extractor processes untrusted external content.
//!
//! Asset references are collected, resolved against the document URI, and
//! returned; fetching them is the coordinator's job.

mod error;
mod ruleset;

pub use error::ExtractError;
pub use ruleset::{AssetRule, CompiledRuleset, FieldRule, Ruleset};

use std::collections::{BTreeMap, HashSet};

use scraper::{ElementRef, Html};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::dedup::Fingerprint;
use crate::fetch::FetchedDocument;

/// How many leading bytes are sniffed for binary content.
const SNIFF_WINDOW: usize = 512;

/// The structured result of extracting one document.
///
/// A draft record becomes immutable once fingerprinted and persisted; the
/// draft itself only lives for the duration of one pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRecord {
    /// URI the source document was fetched from.
    pub source_uri: String,
    /// Extracted field mapping; keys are unique and sorted.
    pub fields: BTreeMap<String, String>,
    /// Absolute URIs of referenced assets, in document order, deduplicated.
    pub asset_refs: Vec<String>,
}

impl DraftRecord {
    /// Computes the canonical content fingerprint of this record.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_record(&self.fields, &self.asset_refs)
    }
}

/// Extracts a structured record from a fetched document.
///
/// # Errors
///
/// - [`ExtractError::UnparsableDocument`] if the content-type is not HTML or
///   the payload looks like binary garbage. Malformed HTML is *not* an error.
#[instrument(skip(document, ruleset), fields(uri = %document.source_uri, bytes = document.bytes.len()))]
pub fn extract(
    document: &FetchedDocument,
    ruleset: &CompiledRuleset,
) -> Result<DraftRecord, ExtractError> {
    reject_non_html(document)?;

    let text = String::from_utf8_lossy(&document.bytes);
    let dom = Html::parse_document(&text);

    let mut fields = BTreeMap::new();
    for rule in &ruleset.fields {
        let Some(selector) = &rule.selector else {
            trace!(field = %rule.name, "empty selector, field skipped");
            continue;
        };
        let Some(element) = dom.select(selector).next() else {
            trace!(field = %rule.name, "selector matched nothing, field skipped");
            continue;
        };

        let raw = match &rule.attribute {
            Some(attribute) => element.attr(attribute).map(ToString::to_string),
            None => Some(element_text(element)),
        };
        let Some(raw) = raw else { continue };

        let value = match &rule.pattern {
            Some(pattern) => match pattern.captures(&raw) {
                Some(captures) => captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string()),
                None => None,
            },
            None => Some(raw),
        };

        if let Some(value) = value {
            fields.insert(rule.name.clone(), value);
        }
    }

    let asset_refs = collect_asset_refs(&dom, ruleset, &document.source_uri);

    debug!(
        fields = fields.len(),
        assets = asset_refs.len(),
        "extraction complete"
    );

    Ok(DraftRecord {
        source_uri: document.source_uri.clone(),
        fields,
        asset_refs,
    })
}

/// Rejects payloads that are not HTML documents.
///
/// A declared non-HTML content-type is rejected outright. Without a declared
/// type the leading bytes are sniffed: NUL bytes mean binary garbage.
fn reject_non_html(document: &FetchedDocument) -> Result<(), ExtractError> {
    if let Some(content_type) = &document.content_type {
        let lowered = content_type.to_lowercase();
        if !(lowered.contains("html") || lowered.contains("xml")) {
            return Err(ExtractError::unparsable(
                &document.source_uri,
                format!("content-type '{content_type}' is not HTML"),
            ));
        }
    }

    let window = &document.bytes[..document.bytes.len().min(SNIFF_WINDOW)];
    if window.contains(&0) {
        return Err(ExtractError::unparsable(
            &document.source_uri,
            "payload contains NUL bytes (binary content)",
        ));
    }

    Ok(())
}

/// Collects asset references in document order, resolved and deduplicated.
fn collect_asset_refs(dom: &Html, ruleset: &CompiledRuleset, source_uri: &str) -> Vec<String> {
    let base = Url::parse(source_uri).ok();
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for rule in &ruleset.assets {
        let Some(selector) = &rule.selector else { continue };
        for element in dom.select(selector) {
            let Some(value) = element.attr(&rule.attribute) else {
                continue;
            };
            let Some(resolved) = resolve_asset_uri(base.as_ref(), value) else {
                continue;
            };
            if seen.insert(resolved.clone()) {
                refs.push(resolved);
            }
        }
    }

    refs
}

/// Resolves an asset reference against the document base URI.
///
/// Returns `None` for references that do not resolve to http(s) - fragments,
/// data: URIs and the like are not fetchable assets.
fn resolve_asset_uri(base: Option<&Url>, value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let resolved = match base {
        Some(base) => base.join(trimmed).ok()?,
        None => Url::parse(trimmed).ok()?,
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Concatenates an element's text nodes with collapsed whitespace.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
