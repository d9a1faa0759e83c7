//! Core data types flowing through the fetch → process → write pipeline.

use indexmap::IndexMap;
use std::fmt;

/// Ordered field → value mapping; insertion order becomes column order.
pub type FieldMap = IndexMap<String, String>;

pub const COL_IDENTIFIER: &str = "Identificador";
pub const COL_LINK: &str = "Link licitación";
pub const COL_MODIFIED: &str = "Modificado";

/// One input row identifying a procurement notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub identifier: String,
    pub detail_url: String,
}

impl SeedRecord {
    pub fn new(identifier: impl Into<String>, detail_url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            detail_url: detail_url.into(),
        }
    }
}

/// Kind of detail document an extraction record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Modification,
    Award,
    Criteria,
}

impl Category {
    /// Instance prefix stem used in result columns ("Mod 1/…", "Adj 2/…").
    pub fn prefix_stem(&self) -> &'static str {
        match self {
            Category::Modification => "Mod",
            Category::Award => "Adj",
            Category::Criteria => "Crit",
        }
    }

    /// Document label used for the "Fecha <label>" column.
    pub fn document_label(&self) -> &'static str {
        match self {
            Category::Modification => "Modificación",
            Category::Award => "Adjudicación",
            Category::Criteria => "Criterios",
        }
    }
}

/// Flat record extracted from one detail document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRecord {
    pub link: String,
    pub identifier: String,
    pub category: Category,
    pub fields: FieldMap,
}

impl ExtractionRecord {
    pub fn new(link: &str, identifier: &str, category: Category) -> Self {
        Self {
            link: link.to_string(),
            identifier: identifier.to_string(),
            category,
            fields: FieldMap::new(),
        }
    }

    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    /// Workbook row: link and identifier first, then the extracted fields.
    pub fn to_row(&self) -> FieldMap {
        let mut row = FieldMap::new();
        row.insert(COL_LINK.to_string(), self.link.clone());
        row.insert(COL_IDENTIFIER.to_string(), self.identifier.clone());
        for (k, v) in &self.fields {
            row.insert(k.clone(), v.clone());
        }
        row
    }
}

/// Row-level failure reported inline on a [`ResultRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    SslVerification,
    Request,
    MainPage,
    Other(String),
}

/// Whether a notice was amended, or why it could not be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modified {
    Yes,
    No,
    Error(RowError),
}

impl Modified {
    pub fn is_error(&self) -> bool {
        matches!(self, Modified::Error(_))
    }
}

impl fmt::Display for Modified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modified::Yes => write!(f, "Sí"),
            Modified::No => write!(f, "No"),
            Modified::Error(RowError::SslVerification) => write!(f, "Error - SSL Verification Failed"),
            Modified::Error(RowError::Request) => write!(f, "Error"),
            Modified::Error(RowError::MainPage) => write!(f, "Error - Failed to fetch main page"),
            Modified::Error(RowError::Other(msg)) => write!(f, "Error - {}", msg),
        }
    }
}

/// Primary output unit: one per seed record.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub identifier: String,
    pub link: String,
    pub modified: Modified,
    pub fields: FieldMap,
}

impl ResultRow {
    pub fn new(seed: &SeedRecord, modified: Modified) -> Self {
        Self {
            identifier: seed.identifier.clone(),
            link: seed.detail_url.clone(),
            modified,
            fields: FieldMap::new(),
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Number of distinct instance prefixes ("Mod 1", "Mod 2", …) for a stem.
    pub fn instance_count(&self, stem: &str) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        for key in self.fields.keys() {
            if let Some((prefix, _)) = key.split_once('/') {
                let is_instance = prefix
                    .strip_prefix(stem)
                    .and_then(|rest| rest.strip_prefix(' '))
                    .is_some_and(|n| n.parse::<usize>().is_ok());
                if is_instance && !seen.contains(&prefix) {
                    seen.push(prefix);
                }
            }
        }
        seen.len()
    }

    pub fn to_row(&self) -> FieldMap {
        let mut row = FieldMap::new();
        row.insert(COL_IDENTIFIER.to_string(), self.identifier.clone());
        row.insert(COL_LINK.to_string(), self.link.clone());
        row.insert(COL_MODIFIED.to_string(), self.modified.to_string());
        for (k, v) in &self.fields {
            row.insert(k.clone(), v.clone());
        }
        row
    }
}

/// Per-document presence summary produced by the criteria extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriteriaSummary {
    pub link: String,
    pub identifier: String,
    pub has_value_judgement: bool,
    pub has_formulas: bool,
    pub error: Option<String>,
}

impl CriteriaSummary {
    pub fn to_row(&self) -> FieldMap {
        let yes_no = |b: bool| (if b { "Sí" } else { "No" }).to_string();
        let mut row = FieldMap::new();
        row.insert(COL_LINK.to_string(), self.link.clone());
        row.insert(COL_IDENTIFIER.to_string(), self.identifier.clone());
        row.insert(
            "Criterios evaluables mediante un juicio de valor".to_string(),
            yes_no(self.has_value_judgement),
        );
        row.insert(
            "Criterios evaluables mediante aplicación de fórmulas".to_string(),
            yes_no(self.has_formulas),
        );
        row.insert(
            "Criterios Adjudicación Error".to_string(),
            self.error.clone().unwrap_or_default(),
        );
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_renders_error_variants() {
        assert_eq!(Modified::Yes.to_string(), "Sí");
        assert_eq!(
            Modified::Error(RowError::SslVerification).to_string(),
            "Error - SSL Verification Failed"
        );
        assert_eq!(Modified::Error(RowError::Request).to_string(), "Error");
        assert_eq!(
            Modified::Error(RowError::Other("boom".into())).to_string(),
            "Error - boom"
        );
    }

    #[test]
    fn instance_count_ignores_dates_and_other_stems() {
        let seed = SeedRecord::new("1", "https://example.org/n/1");
        let mut row = ResultRow::new(&seed, Modified::Yes);
        row.fields.insert("Mod 1/Importe".into(), "10".into());
        row.fields.insert("Mod 1/Fecha".into(), "x".into());
        row.fields.insert("Mod 2/Error".into(), "Html link not found".into());
        row.fields.insert("Adj 1/Adjudicatario".into(), "ACME".into());
        row.fields.insert("Fecha Modificación".into(), "01/02/2023".into());
        assert_eq!(row.instance_count("Mod"), 2);
        assert_eq!(row.instance_count("Adj"), 1);
    }

    #[test]
    fn result_row_columns_start_with_identity() {
        let seed = SeedRecord::new("42", "https://example.org/n/42");
        let mut row = ResultRow::new(&seed, Modified::No);
        row.fields.insert("Fecha Anuncio".into(), "01/01/2024".into());
        let cols: Vec<_> = row.to_row().keys().cloned().collect();
        assert_eq!(cols, vec![COL_IDENTIFIER, COL_LINK, COL_MODIFIED, "Fecha Anuncio"]);
    }
}
