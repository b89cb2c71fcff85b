//! Analysis collaborator boundary
//!
//! The hub never parses, searches, or pattern-matches code itself; it calls
//! an external engine through [`AnalysisCollaborator`] and awaits a result or
//! failure. Implementations are opaque to the hub beyond these signatures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options controlling a single analysis run. These participate in the cache
/// fingerprint, so two requests with different options never share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub include_relationships: bool,
    pub include_patterns: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_relationships: true,
            include_patterns: false,
        }
    }
}

impl AnalysisOptions {
    /// Canonical form used as a fingerprint part
    pub fn fingerprint_part(&self) -> String {
        format!(
            "rel={};pat={}",
            self.include_relationships, self.include_patterns
        )
    }
}

/// Options for symbol search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub language: Option<String>,
    pub max_results: Option<usize>,
}

impl SearchOptions {
    pub fn fingerprint_part(&self) -> String {
        format!(
            "lang={};max={}",
            self.language.as_deref().unwrap_or(""),
            self.max_results.unwrap_or(0)
        )
    }
}

/// Options for pattern matching
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatternOptions {
    pub language: Option<String>,
    pub max_results: Option<usize>,
}

impl PatternOptions {
    pub fn fingerprint_part(&self) -> String {
        format!(
            "lang={};max={}",
            self.language.as_deref().unwrap_or(""),
            self.max_results.unwrap_or(0)
        )
    }
}

/// A position within a source file (zero-based)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Result of a full or incremental analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub file_id: String,
    pub language: String,
    pub symbol_count: usize,
    /// Engine-specific symbol payload, passed through untouched
    #[serde(default)]
    pub symbols: serde_json::Value,
    /// Engine-specific relationship payload, passed through untouched
    #[serde(default)]
    pub relationships: serde_json::Value,
}

/// One symbol search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMatch {
    pub name: String,
    pub kind: String,
    pub file_id: String,
    pub score: f64,
}

/// One structural pattern hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    pub pattern: String,
    pub file_id: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// References and definitions for a symbol at a position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesResult {
    #[serde(default)]
    pub references: Vec<serde_json::Value>,
    #[serde(default)]
    pub definitions: Vec<serde_json::Value>,
}

/// The external parsing/search/pattern engine boundary.
///
/// Calls may take arbitrarily long; the hub runs each one on its own task so
/// a slow engine never blocks dispatch for other connections.
#[async_trait]
pub trait AnalysisCollaborator: Send + Sync {
    /// Full analysis of a code snapshot
    async fn analyze(
        &self,
        code: &str,
        language: &str,
        file_id: &str,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult>;

    /// Re-analysis driven by a coalesced batch of edits
    async fn incremental_analyze(
        &self,
        file_id: &str,
        changes: &serde_json::Value,
        language: &str,
    ) -> Result<AnalysisResult>;

    /// Free-text symbol search
    async fn search_symbols(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SymbolMatch>>;

    /// Structural pattern matching over a scope
    async fn find_matches(
        &self,
        pattern: &str,
        scope: &str,
        options: &PatternOptions,
    ) -> Result<Vec<PatternMatch>>;

    /// Find references to the symbol at a position
    async fn find_references(
        &self,
        code: &str,
        language: &str,
        file_id: &str,
        position: Position,
    ) -> Result<ReferencesResult>;
}

/// Collaborator that returns empty results for every call.
///
/// Used by the standalone daemon so it can run without an engine attached;
/// real deployments wire their engines in through [`AnalysisCollaborator`].
pub struct NullCollaborator;

#[async_trait]
impl AnalysisCollaborator for NullCollaborator {
    async fn analyze(
        &self,
        _code: &str,
        language: &str,
        file_id: &str,
        _options: &AnalysisOptions,
    ) -> Result<AnalysisResult> {
        Ok(AnalysisResult {
            file_id: file_id.to_string(),
            language: language.to_string(),
            symbol_count: 0,
            symbols: serde_json::Value::Array(vec![]),
            relationships: serde_json::Value::Array(vec![]),
        })
    }

    async fn incremental_analyze(
        &self,
        file_id: &str,
        _changes: &serde_json::Value,
        language: &str,
    ) -> Result<AnalysisResult> {
        Ok(AnalysisResult {
            file_id: file_id.to_string(),
            language: language.to_string(),
            symbol_count: 0,
            symbols: serde_json::Value::Array(vec![]),
            relationships: serde_json::Value::Array(vec![]),
        })
    }

    async fn search_symbols(
        &self,
        _query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<SymbolMatch>> {
        Ok(vec![])
    }

    async fn find_matches(
        &self,
        _pattern: &str,
        _scope: &str,
        _options: &PatternOptions,
    ) -> Result<Vec<PatternMatch>> {
        Ok(vec![])
    }

    async fn find_references(
        &self,
        _code: &str,
        _language: &str,
        _file_id: &str,
        _position: Position,
    ) -> Result<ReferencesResult> {
        Ok(ReferencesResult::default())
    }
}
