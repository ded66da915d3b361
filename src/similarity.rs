use crate::domain::Composer;
use std::collections::BTreeMap;

/// Jaro-Winkler similarity in `[0, 1]`. Case and diacritics are significant.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}

/// Composers whose stored name scores strictly above `threshold` against `name`,
/// keyed by composer id.
pub fn candidates(name: &str, composers: &[Composer], threshold: f64) -> BTreeMap<i64, String> {
    composers
        .iter()
        .filter(|c| similarity(&c.name, name) > threshold)
        .map(|c| (c.id, c.name.clone()))
        .collect()
}
