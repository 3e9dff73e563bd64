/// Character-level edit distance (insert, delete, substitute all cost 1).
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous = (0..=b.len()).collect::<Vec<_>>();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity in `[0, 100]` after removing all whitespace from both inputs.
///
/// Two empty strings score 0, not 100.
pub fn score(hypothesis: &str, reference: &str) -> f64 {
    let hypothesis = strip_whitespace(hypothesis);
    let reference = strip_whitespace(reference);
    let total = hypothesis.len().max(reference.len());
    if total == 0 {
        return 0.0;
    }
    let distance = levenshtein(&hypothesis, &reference);
    (total - distance) as f64 / total as f64 * 100.0
}

fn strip_whitespace(text: &str) -> Vec<char> {
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}
