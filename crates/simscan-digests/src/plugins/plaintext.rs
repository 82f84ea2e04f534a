//! Plain-text digesting and comparison.
//!
//! The digest is the file's text with blank and whitespace-only lines
//! removed; the comparer scores normalized edit distance over that text.
//! Good enough to catch copied and lightly-edited text submissions; code
//! files are treated as text too.

use std::collections::BTreeSet;

use crate::plugin::{
    DigestComparer, DigestExtractor, Extraction, PluginError, PluginSettings,
};

const DIGEST_TYPE: &str = "plaintext";

const DEFAULT_MIMETYPES: &[&str] = &["text/plain"];
const DEFAULT_MASKS: &[&str] = &[
    "*.txt", "*.py", "*.pyw", "*.c", "*.cpp", "*.cs", "*.java", "*.js",
];

/// Case-sensitive filename mask match supporting `*` and `?`.
fn mask_matches(mask: &str, name: &str) -> bool {
    fn inner(mask: &[u8], name: &[u8]) -> bool {
        match (mask.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&mask[1..], name) || (!name.is_empty() && inner(mask, &name[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&mask[1..], &name[1..]),
            (Some(m), Some(n)) if m == n => inner(&mask[1..], &name[1..]),
            _ => false,
        }
    }
    inner(mask.as_bytes(), name.as_bytes())
}

fn string_list(settings: &PluginSettings, key: &str, default: &[&str]) -> Vec<String> {
    settings
        .get(key)
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_else(|| default.iter().map(|s| (*s).to_string()).collect())
}

/// Extracts the `plaintext` digest from text-like files.
#[derive(Debug, Default)]
pub struct PlaintextExtractor {
    mimetypes: Vec<String>,
    masks: Vec<String>,
}

impl DigestExtractor for PlaintextExtractor {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn initialize(&mut self, settings: &PluginSettings) -> Result<(), PluginError> {
        self.mimetypes = string_list(settings, "mimetypes", DEFAULT_MIMETYPES);
        self.masks = string_list(settings, "masks", DEFAULT_MASKS);
        Ok(())
    }

    fn digest_types(&self) -> BTreeSet<String> {
        BTreeSet::from([DIGEST_TYPE.to_string()])
    }

    fn can_process(&self, filename: &str, mimetype: &str, _filesize: i64) -> bool {
        self.mimetypes.iter().any(|m| m == mimetype)
            || self.masks.iter().any(|mask| mask_matches(mask, filename))
    }

    fn process(
        &mut self,
        _filename: &str,
        _mimetype: &str,
        content: &[u8],
    ) -> Result<Extraction, PluginError> {
        let lines: Vec<&[u8]> = content
            .split(|b| *b == b'\n')
            .map(|line| trim_line(line))
            .filter(|line| !line.is_empty())
            .collect();
        let digest = lines.join(&b'\n');
        let mut extraction = Extraction::default();
        extraction.digests.insert(DIGEST_TYPE.to_string(), Some(digest));
        Ok(extraction)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let is_blank = |b: &u8| matches!(b, b' ' | b'\t' | b'\r' | b'\n');
    let start = line.iter().position(|b| !is_blank(b)).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !is_blank(b)).map_or(start, |i| i + 1);
    &line[start..end]
}

/// Scores similarity of two `plaintext` digests.
#[derive(Debug, Default)]
pub struct PlaintextComparer;

impl DigestComparer for PlaintextComparer {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn initialize(&mut self, _settings: &PluginSettings) -> Result<(), PluginError> {
        Ok(())
    }

    fn digest_types(&self) -> BTreeSet<String> {
        BTreeSet::from([DIGEST_TYPE.to_string()])
    }

    fn compare(
        &mut self,
        _digest_type: &str,
        _older_id: i64,
        older: &[u8],
        _newer_id: i64,
        newer: &[u8],
    ) -> Result<f64, PluginError> {
        let older = String::from_utf8_lossy(older);
        let newer = String::from_utf8_lossy(newer);
        Ok(strsim::normalized_levenshtein(&older, &newer))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ready_extractor() -> PlaintextExtractor {
        let mut extractor = PlaintextExtractor::default();
        extractor.initialize(&PluginSettings::new()).unwrap();
        extractor
    }

    #[test]
    fn masks_and_mimetypes_gate_processing() {
        let extractor = ready_extractor();
        assert!(extractor.can_process("report.txt", "application/octet-stream", 10));
        assert!(extractor.can_process("prog.java", "application/octet-stream", 10));
        assert!(extractor.can_process("whatever.bin", "text/plain", 10));
        assert!(!extractor.can_process("image.png", "image/png", 10));
    }

    #[test]
    fn mask_match_supports_star_and_question_mark() {
        assert!(mask_matches("*.txt", "a.txt"));
        assert!(mask_matches("*.txt", ".txt"));
        assert!(!mask_matches("*.txt", "a.txt.bak"));
        assert!(mask_matches("data?.csv", "data1.csv"));
        assert!(!mask_matches("data?.csv", "data12.csv"));
    }

    #[test]
    fn digest_drops_blank_lines_and_edge_whitespace() {
        let mut extractor = ready_extractor();
        let extraction = extractor
            .process("a.txt", "text/plain", b"  hello \r\n\n\t\nworld\n\n")
            .unwrap();
        let digest = extraction.digests["plaintext"].as_ref().unwrap();
        assert_eq!(digest.as_slice(), b"hello\nworld");
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn identical_digests_score_one() {
        let mut comparer = PlaintextComparer;
        let score = comparer
            .compare("plaintext", 1, b"hello\nworld", 2, b"hello\nworld")
            .unwrap();
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn appended_line_scores_strictly_between_half_and_one() {
        let mut comparer = PlaintextComparer;
        let score = comparer
            .compare("plaintext", 1, b"hello\nworld", 2, b"hello\nworld\nextra")
            .unwrap();
        assert!(score > 0.5 && score < 1.0, "score was {score}");
    }

    #[test]
    fn unrelated_text_scores_low() {
        let mut comparer = PlaintextComparer;
        let score = comparer
            .compare("plaintext", 1, b"alpha beta gamma", 2, b"zzz qqq xxx yyy www")
            .unwrap();
        assert!(score < 0.5, "score was {score}");
    }
}
