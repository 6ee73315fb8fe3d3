use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ProfessionEntry {
    abbrev: String,
    id: serde_json::Value,
}

/// Profession abbreviation (as printed on license reports) to CRM profession id.
///
/// Loaded once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ProfessionTable {
    by_abbrev: HashMap<String, String>,
}

impl ProfessionTable {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let entries: Vec<ProfessionEntry> =
            serde_json::from_str(text).context("parse profession table")?;
        let mut by_abbrev = HashMap::with_capacity(entries.len());
        for e in entries {
            let id = match e.id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            // First entry wins for duplicate abbreviations.
            by_abbrev.entry(e.abbrev).or_insert(id);
        }
        Ok(Self { by_abbrev })
    }

    /// Missing file is tolerated: every abbreviation then passes through unchanged.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Profession table {} not found; professions will pass through unmapped",
                path.display()
            );
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let table = Self::from_json(&text).with_context(|| format!("load {}", path.display()))?;
        if table.is_empty() {
            tracing::warn!(
                "Profession table {} is empty; professions will pass through unmapped",
                path.display()
            );
            return Ok(table);
        }
        tracing::info!(
            "Loaded {} profession mappings from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.by_abbrev.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_abbrev.is_empty()
    }

    /// Unknown abbreviations are returned as-is.
    pub fn map(&self, abbrev: &str) -> String {
        match self.by_abbrev.get(abbrev) {
            Some(id) => id.clone(),
            None => {
                tracing::warn!("No profession id for abbreviation {abbrev:?}; passing it through");
                abbrev.to_string()
            }
        }
    }
}
