//! Edit-distance tolerant matching of query terms against field text

use strsim::normalized_damerau_levenshtein;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, strip accents and collapse whitespace
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Smallest edit distance between `pattern` and any substring of `text`
/// (Sellers' algorithm)
pub fn substring_distance(pattern: &[char], text: &[char]) -> usize {
    let m = pattern.len();
    if m == 0 {
        return 0;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut cur = vec![0usize; m + 1];
    let mut best = prev[m];

    for &tc in text {
        // a match may start anywhere in the text
        cur[0] = 0;
        for i in 1..=m {
            let substitution = prev[i - 1] + usize::from(pattern[i - 1] != tc);
            cur[i] = substitution.min(prev[i] + 1).min(cur[i - 1] + 1);
        }
        best = best.min(cur[m]);
        if best == 0 {
            return 0;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    best
}

/// A field prepared for repeated matching
#[derive(Debug, Clone, Default)]
pub struct FieldText {
    text: String,
    chars: Vec<char>,
    tokens: Vec<String>,
}

impl FieldText {
    pub fn new(raw: &str) -> Self {
        let text = normalize(raw);
        let chars = text.chars().collect();
        let tokens = text.split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect();
        Self { text, chars, tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Similarity in `[0, 1]` of a normalized term to this field: the better
    /// of approximate-substring and whole-token edit similarity
    pub fn similarity(&self, term: &str, term_chars: &[char]) -> f64 {
        if self.is_empty() || term_chars.is_empty() {
            return 0.0;
        }
        if self.text.contains(term) {
            return 1.0;
        }

        let distance = substring_distance(term_chars, &self.chars);
        let substring = 1.0 - distance as f64 / term_chars.len() as f64;

        let token = self
            .tokens
            .iter()
            .map(|token| normalized_damerau_levenshtein(term, token))
            .fold(0.0, f64::max);

        substring.max(token).clamp(0.0, 1.0)
    }
}
