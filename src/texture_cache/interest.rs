use crate::source::ImageKey;

/// Ordered set of keys the cache should keep resident, with one primary key.
///
/// Keys are deduplicated on construction, first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestSet {
    keys: Vec<ImageKey>,
    primary: usize,
}

impl InterestSet {
    /// Interest in `keys`, the first one being primary.
    pub fn new(keys: impl IntoIterator<Item = ImageKey>) -> Self {
        let mut deduped: Vec<ImageKey> = Vec::new();
        for key in keys {
            if !deduped.contains(&key) {
                deduped.push(key);
            }
        }
        Self {
            keys: deduped,
            primary: 0,
        }
    }

    /// `[prev, current, next]` with absent neighbours dropped and `current`
    /// as primary.
    pub fn around(
        prev: Option<&ImageKey>,
        current: Option<&ImageKey>,
        next: Option<&ImageKey>,
    ) -> Self {
        let mut set = Self::new([prev, current, next].into_iter().flatten().cloned());
        if let Some(current) = current {
            set.primary = set.position(current).unwrap_or(0);
        }
        set
    }

    pub fn keys(&self) -> &[ImageKey] {
        &self.keys
    }

    pub fn primary(&self) -> Option<&ImageKey> {
        self.keys.get(self.primary)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.keys.contains(key)
    }

    /// Ordering distance of `key` from the primary key.
    pub fn distance(&self, key: &ImageKey) -> Option<usize> {
        self.position(key).map(|idx| idx.abs_diff(self.primary))
    }

    /// Keys nearest the primary first; equal distances favour the later key,
    /// i.e. the forward neighbour.
    pub(crate) fn by_priority(&self) -> Vec<(usize, &ImageKey)> {
        let mut ranked: Vec<(usize, usize, &ImageKey)> = self
            .keys
            .iter()
            .enumerate()
            .map(|(idx, key)| (idx.abs_diff(self.primary), idx, key))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        ranked
            .into_iter()
            .map(|(distance, _, key)| (distance, key))
            .collect()
    }

    /// The `capacity` highest-priority keys, original order preserved.
    pub(crate) fn truncated(&self, capacity: usize) -> Self {
        if self.keys.len() <= capacity {
            return self.clone();
        }
        let keep: Vec<&ImageKey> = self
            .by_priority()
            .into_iter()
            .take(capacity)
            .map(|(_, key)| key)
            .collect();
        let primary = self.primary();
        let keys: Vec<ImageKey> = self
            .keys
            .iter()
            .filter(|key| keep.contains(key))
            .cloned()
            .collect();
        let primary = primary
            .and_then(|p| keys.iter().position(|k| k == p))
            .unwrap_or(0);
        Self { keys, primary }
    }

    fn position(&self, key: &ImageKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

impl FromIterator<ImageKey> for InterestSet {
    fn from_iter<T: IntoIterator<Item = ImageKey>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> ImageKey {
        ImageKey::from(s)
    }

    #[test]
    fn around_filters_missing_neighbours() {
        let set = InterestSet::around(None, Some(&k("b")), Some(&k("c")));
        assert_eq!(set.keys(), &[k("b"), k("c")]);
        assert_eq!(set.primary(), Some(&k("b")));
    }

    #[test]
    fn around_dedups_two_photo_loops() {
        let set = InterestSet::around(Some(&k("a")), Some(&k("b")), Some(&k("a")));
        assert_eq!(set.keys(), &[k("a"), k("b")]);
        assert_eq!(set.primary(), Some(&k("b")));
        assert_eq!(set.distance(&k("a")), Some(1));
    }

    #[test]
    fn priority_prefers_forward_neighbour_on_ties() {
        let set = InterestSet::around(Some(&k("a")), Some(&k("b")), Some(&k("c")));
        let order: Vec<&ImageKey> = set.by_priority().into_iter().map(|(_, key)| key).collect();
        assert_eq!(order, vec![&k("b"), &k("c"), &k("a")]);
    }

    #[test]
    fn truncation_keeps_nearest_keys() {
        let set = InterestSet::around(Some(&k("a")), Some(&k("b")), Some(&k("c")));
        let two = set.truncated(2);
        assert_eq!(two.keys(), &[k("b"), k("c")]);
        assert_eq!(two.primary(), Some(&k("b")));
        let one = set.truncated(1);
        assert_eq!(one.keys(), &[k("b")]);
        assert!(set.truncated(0).is_empty());
    }
}
