use std::collections::HashMap;
use std::hash::Hash;

/// Value → count mapping that iterates in first-seen order.
///
/// Ranking is a stable sort over that order, so equal counts keep the
/// order in which their values first appeared.
#[derive(Debug, Clone)]
pub struct Distribution<T> {
    entries: Vec<(T, u64)>,
    index: HashMap<T, usize>,
    total: u64,
}

impl<T> Default for Distribution<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            total: 0,
        }
    }
}

impl<T: Eq + Hash + Clone> Distribution<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: T) {
        self.add_n(value, 1);
    }

    pub fn add_n(&mut self, value: T, n: u64) {
        self.total += n;
        match self.index.get(&value) {
            Some(&i) => self.entries[i].1 += n,
            None => {
                self.index.insert(value.clone(), self.entries.len());
                self.entries.push((value, n));
            }
        }
    }

    pub fn from_values<I: IntoIterator<Item = T>>(values: I) -> Self {
        values.into_iter().collect()
    }

    pub fn get(&self, value: &T) -> u64 {
        self.index.get(value).map(|&i| self.entries[i].1).unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn unique(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, u64)> {
        self.entries.iter().map(|(v, c)| (v, *c))
    }

    pub fn top_n(&self, n: usize) -> Vec<(T, u64)> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// Value with the highest count; the earliest one wins a tie.
    pub fn most_common(&self) -> Option<(&T, u64)> {
        let mut best: Option<(&T, u64)> = None;
        for (v, c) in self.iter() {
            if best.map_or(true, |(_, bc)| c > bc) {
                best = Some((v, c));
            }
        }
        best
    }

    pub fn into_entries(self) -> Vec<(T, u64)> {
        self.entries
    }
}

impl<'a> Distribution<&'a str> {
    /// Counts only non-empty strings.
    pub fn non_empty<I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        values.into_iter().filter(|v| !v.is_empty()).collect()
    }

    pub fn to_owned_entries(&self) -> Vec<(String, u64)> {
        self.iter().map(|(v, c)| (v.to_string(), c)).collect()
    }

    pub fn top_n_owned(&self, n: usize) -> Vec<(String, u64)> {
        self.top_n(n)
            .into_iter()
            .map(|(v, c)| (v.to_string(), c))
            .collect()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for Distribution<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut dist = Distribution::new();
        for v in iter {
            dist.add(v);
        }
        dist
    }
}

pub fn top_items<T, I>(values: I, n: usize) -> Vec<(T, u64)>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    Distribution::from_values(values).top_n(n)
}

/// `part / total * 100`, or 0.0 when `total` is zero.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_sum_to_input_length() {
        let values = ["a", "b", "a", "c", "a", "b"];
        let dist = Distribution::from_values(values);
        assert_eq!(dist.total(), 6);
        assert_eq!(dist.unique(), 3);
        assert_eq!(dist.get(&"a"), 3);
        assert_eq!(dist.get(&"z"), 0);
    }

    #[test]
    fn test_top_n_ties_keep_first_seen_order() {
        let values = ["x", "y", "z", "y", "x", "w"];
        let top = top_items(values, 10);
        assert_eq!(top, vec![("x", 2), ("y", 2), ("z", 1), ("w", 1)]);

        let top2 = top_items(values, 2);
        assert_eq!(top2.len(), 2);
        assert_eq!(top2, vec![("x", 2), ("y", 2)]);
    }

    #[test]
    fn test_top_n_is_idempotent() {
        let values = ["p", "q", "q", "r", "p", "s", "q"];
        let first = top_items(values, 3);
        let expanded: Vec<&str> = first
            .iter()
            .flat_map(|(v, c)| std::iter::repeat(*v).take(*c as usize))
            .collect();
        let second = top_items(expanded, 3);
        assert_eq!(first, second);
        let sum: u64 = first.iter().map(|(_, c)| c).sum();
        assert!(sum <= values.len() as u64);
    }

    #[test]
    fn test_most_common_prefers_earliest() {
        let dist = Distribution::from_values([3u32, 5, 5, 3, 7]);
        assert_eq!(dist.most_common(), Some((&3, 2)));
        assert_eq!(Distribution::<u32>::new().most_common(), None);
    }

    #[test]
    fn test_non_empty_filters_blank() {
        let dist = Distribution::non_empty(["", "example.com", "", "example.com"]);
        assert_eq!(dist.total(), 2);
        assert_eq!(dist.unique(), 1);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(0, 0), 0.0);
        assert!((percentage(1, 4) - 25.0).abs() < f64::EPSILON);
        assert!((percentage(4, 4) - 100.0).abs() < f64::EPSILON);
    }
}
