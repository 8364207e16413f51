use regex::Regex;

use crate::error::RulesError;

/// Finds dispute-case identifiers embedded in free text.
///
/// A match is the case marker (`D`, optionally `DP`, not preceded by
/// another letter), an optional separator, and the jurisdiction-specific
/// numeric pattern. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct CaseIdExtractor {
    pattern: Regex,
}

impl CaseIdExtractor {
    pub fn new(jurisdiction_pattern: &str) -> Result<Self, RulesError> {
        let pattern = Regex::new(&format!(
            r"(?i)(\A|[^A-Za-z])DP?\s*[-_/]?\s*({})",
            jurisdiction_pattern
        ))
        .map_err(|_| RulesError::InvalidCasePattern(jurisdiction_pattern.to_string()))?;

        Ok(Self { pattern })
    }

    /// Returns every case identifier referenced in `text`, in order
    /// of appearance.
    pub fn extract(&self, text: &str) -> Vec<u64> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(2))
            .filter_map(|m| m.as_str().parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CaseIdExtractor {
        CaseIdExtractor::new(r"\d{7}").unwrap()
    }

    #[test]
    fn test_marker_variants_match() {
        let e = extractor();
        assert_eq!(e.extract("payment D 1234567"), vec![1234567]);
        assert_eq!(e.extract("payment DP 1234567"), vec![1234567]);
        assert_eq!(e.extract("payment D-1234567"), vec![1234567]);
        assert_eq!(e.extract("payment d/1234567"), vec![1234567]);
        assert_eq!(e.extract("D1234567 at line start"), vec![1234567]);
    }

    #[test]
    fn test_letter_before_marker_does_not_match() {
        let e = extractor();
        assert!(e.extract("XD1234567").is_empty());
        assert!(e.extract("REFUND1234567").is_empty());
    }

    #[test]
    fn test_multiple_references() {
        let e = extractor();
        assert_eq!(
            e.extract("diff D 1234567 and D 7654321"),
            vec![1234567, 7654321]
        );
    }

    #[test]
    fn test_no_reference() {
        assert!(extractor().extract("plain payment text").is_empty());
    }
}
