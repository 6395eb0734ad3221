// 🔎 Prefix Index - Longest-prefix lookup over old BNF codes
//
// Old codes range from 4-character section prefixes to full 15-character
// presentation codes, and shorter ones can contain longer ones. A fact code
// always resolves to the most specific old code that prefixes it, never to
// whichever rule happened to come first in the map.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct PrefixIndex {
    prefixes: BTreeSet<String>,
    lengths: Vec<usize>,
}

impl PrefixIndex {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes: BTreeSet<String> = prefixes
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        // Distinct lengths, longest first
        let mut lengths: Vec<usize> = prefixes.iter().map(String::len).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();

        PrefixIndex { prefixes, lengths }
    }

    /// Most specific indexed prefix of `code`, anchored at position 0
    ///
    /// # Example:
    /// ```
    /// use bnf_map_checker::prefix_index::PrefixIndex;
    ///
    /// let index = PrefixIndex::new(["0304", "030402"]);
    /// assert_eq!(index.longest_match("0304020Z0AAAAAA"), Some("030402"));
    /// assert_eq!(index.longest_match("0305000A0"), None);
    /// ```
    pub fn longest_match(&self, code: &str) -> Option<&str> {
        self.lengths
            .iter()
            .filter(|&&len| len <= code.len())
            .filter_map(|&len| code.get(..len))
            .find_map(|candidate| self.prefixes.get(candidate).map(String::as_str))
    }

    /// Every indexed prefix of `code`, longest first
    pub fn all_matches(&self, code: &str) -> Vec<&str> {
        self.lengths
            .iter()
            .filter(|&&len| len <= code.len())
            .filter_map(|&len| code.get(..len))
            .filter_map(|candidate| self.prefixes.get(candidate).map(String::as_str))
            .collect()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.prefixes.contains(prefix)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }
}
