/// Key/value mapping returned by prefix reads, ordered by key descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Builds the mapping; later duplicates of a key are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries: Vec<(String, String)> = entries.into_iter().collect();
        // stable sort keeps the first occurrence ahead of its duplicates
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.dedup_by(|later, first| later.0 == first.0);
        Self { entries }
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.entries
            .binary_search_by(|(k, _)| key.cmp(k.as_str()))
            .ok()
            .map(|i| self.entries[i].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl IntoIterator for Properties {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
