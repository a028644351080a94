//! Short, model-friendly stand-ins for ontology URLs.
//!
//! A map is built fresh for every inference call and never reused. Tokens
//! are derived from titles: lowercased, runs of non-alphanumerics collapsed
//! to `-`, and suffixed `-2`, `-3`, … on collision.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

const MAX_TOKEN_LEN: usize = 64;

/// Slugify a title into a candidate token.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_TOKEN_LEN {
            break;
        }
    }
    slug.truncate(MAX_TOKEN_LEN);
    slug.truncate(slug.trim_end_matches('-').len());
    slug
}

/// An injective token → target map with its inverse.
#[derive(Debug, Clone)]
pub struct SimplifiedIdMap<T> {
    forward: BTreeMap<String, T>,
    reverse: HashMap<T, String>,
    fallback: &'static str,
}

impl<T: Clone + Eq + Hash> SimplifiedIdMap<T> {
    /// `fallback` is used when a title has no alphanumeric characters.
    pub fn new(fallback: &'static str) -> Self {
        Self {
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
            fallback,
        }
    }

    /// Token for `target`, minting one from `title` on first sight.
    pub fn assign(&mut self, title: &str, target: T) -> String {
        if let Some(existing) = self.reverse.get(&target) {
            return existing.clone();
        }

        let mut base = slugify(title);
        if base.is_empty() {
            base = self.fallback.to_string();
        }

        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.forward.contains_key(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }

        self.forward.insert(candidate.clone(), target.clone());
        self.reverse.insert(target, candidate.clone());
        candidate
    }

    pub fn resolve(&self, token: &str) -> Option<&T> {
        self.forward.get(token)
    }

    pub fn token_for(&self, target: &T) -> Option<&str> {
        self.reverse.get(target).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Pairs in token order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_and_lowercases() {
        assert_eq!(slugify("Person"), "person");
        assert_eq!(slugify("Works For"), "works-for");
        assert_eq!(slugify("  E-mail   Address!! "), "e-mail-address");
        assert_eq!(slugify("Año 2024"), "a-o-2024");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn slugify_caps_length() {
        let long = "a".repeat(200);
        assert_eq!(slugify(&long).len(), MAX_TOKEN_LEN);
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let mut map = SimplifiedIdMap::new("type");
        assert_eq!(map.assign("Person", 1), "person");
        assert_eq!(map.assign("person", 2), "person-2");
        assert_eq!(map.assign("PERSON", 3), "person-3");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn same_target_reuses_token() {
        let mut map = SimplifiedIdMap::new("type");
        let a = map.assign("Person", "https://x/person/v/1");
        let b = map.assign("Human", "https://x/person/v/1");
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn untitled_uses_fallback() {
        let mut map = SimplifiedIdMap::new("property");
        assert_eq!(map.assign("", 1), "property");
        assert_eq!(map.assign("???", 2), "property-2");
    }

    #[test]
    fn map_is_injective_and_invertible() {
        let mut map = SimplifiedIdMap::new("type");
        let titles = ["Person", "Person", "Organization", "person 2", "Person-2"];
        for (i, title) in titles.iter().enumerate() {
            map.assign(title, i);
        }
        assert_eq!(map.len(), titles.len());
        for (token, target) in map.iter() {
            assert_eq!(map.token_for(target), Some(token));
            assert_eq!(map.resolve(token), Some(target));
        }
    }
}
