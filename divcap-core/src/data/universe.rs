//! Ticker universe: the input set for bulk fetches and multi-ticker runs.
//!
//! Accepted file formats:
//! - TOML with a top-level `tickers = ["KO", "PEP"]` array
//! - Plain text, one ticker per line, `#` starts a comment
//!
//! Tickers are trimmed, upper-cased, and de-duplicated keeping first
//! occurrence order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::CaptureError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    tickers: Vec<String>,
}

#[derive(Deserialize)]
struct UniverseFile {
    tickers: Vec<String>,
}

impl Universe {
    pub fn from_tickers<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let tickers = tickers
            .into_iter()
            .map(|t| t.as_ref().trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Self { tickers }
    }

    /// Load by extension: `.toml` as TOML, anything else as a text list.
    pub fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::InvalidInput(format!("read universe file {}: {e}", path.display()))
        })?;
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            Self::from_toml(&content)
        } else {
            Ok(Self::from_text(&content))
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, CaptureError> {
        let file: UniverseFile = toml::from_str(content)
            .map_err(|e| CaptureError::InvalidInput(format!("parse universe TOML: {e}")))?;
        Ok(Self::from_tickers(file.tickers))
    }

    pub fn from_text(content: &str) -> Self {
        Self::from_tickers(
            content
                .lines()
                .map(|l| l.split('#').next().unwrap_or_default()),
        )
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.tickers.iter().any(|t| t == ticker)
    }

    /// Tickers not in `done`, in universe order.
    pub fn remaining(&self, done: &BTreeSet<String>) -> Vec<String> {
        self.tickers
            .iter()
            .filter(|t| !done.contains(*t))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_list_with_comments() {
        let u = Universe::from_text("# staples\nko\nPEP  # cola\n\nKO\n");
        assert_eq!(u.tickers(), ["KO", "PEP"]);
    }

    #[test]
    fn toml_list() {
        let u = Universe::from_toml("tickers = [\"KO\", \"pep\", \"T\"]").unwrap();
        assert_eq!(u.len(), 3);
        assert!(u.contains("PEP"));
    }

    #[test]
    fn bad_toml_is_invalid_input() {
        assert!(matches!(
            Universe::from_toml("tickers = 5"),
            Err(CaptureError::InvalidInput(_))
        ));
    }

    #[test]
    fn remaining_preserves_order() {
        let u = Universe::from_tickers(["A", "B", "C", "D"]);
        let done: BTreeSet<String> = ["B", "D"].iter().map(|s| s.to_string()).collect();
        assert_eq!(u.remaining(&done), vec!["A", "C"]);
    }

    #[test]
    fn from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("u.toml");
        std::fs::write(&toml_path, "tickers = [\"KO\"]").unwrap();
        let txt_path = dir.path().join("u.txt");
        std::fs::write(&txt_path, "KO\nPEP\n").unwrap();
        assert_eq!(Universe::from_file(&toml_path).unwrap().len(), 1);
        assert_eq!(Universe::from_file(&txt_path).unwrap().len(), 2);
    }
}
