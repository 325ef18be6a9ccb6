// src/model/search.rs
//! Word search over entries

use super::entry::Entry;
use super::tree::{EntryId, Tree};

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub include_deleted: bool,
    pub include_protected: bool,
}

impl SearchQuery {
    pub fn new(text: &str) -> Self {
        SearchQuery {
            text: text.to_owned(),
            ..Default::default()
        }
    }

    fn words(&self) -> Vec<String> {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }

    fn matches(&self, entry: &Entry, words: &[String]) -> bool {
        if entry.is_deleted && !self.include_deleted {
            return false;
        }
        let haystacks: Vec<String> = entry
            .fields
            .iter()
            .filter(|f| self.include_protected || !f.is_protected)
            .map(|f| f.resolved_value().to_lowercase())
            .chain(std::iter::once(entry.tags.to_lowercase()))
            .collect();
        words
            .iter()
            .all(|word| haystacks.iter().any(|h| h.contains(word.as_str())))
    }

    /// Entries where every word matches some field; empty query finds nothing
    pub fn run(&self, tree: &Tree) -> Vec<EntryId> {
        let words = self.words();
        if words.is_empty() {
            return Vec::new();
        }
        tree.all_entries()
            .into_iter()
            .filter(|id| tree.entry(*id).is_some_and(|e| self.matches(e, &words)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Group;

    #[test]
    fn every_word_must_match_somewhere() {
        let mut tree = Tree::new(Group::new("Root"), true);
        let mut entry = Entry::new();
        entry.set_value("Title", "Bank Account");
        entry.set_value("UserName", "alice");
        entry.set_value("Password", "topsecret");
        let id = tree.add_entry(tree.root(), entry).unwrap();

        assert_eq!(SearchQuery::new("bank ALICE").run(&tree), vec![id]);
        assert!(SearchQuery::new("bank bob").run(&tree).is_empty());
        assert!(SearchQuery::new("topsecret").run(&tree).is_empty());
        let query = SearchQuery {
            include_protected: true,
            ..SearchQuery::new("topsecret")
        };
        assert_eq!(query.run(&tree), vec![id]);
        assert!(SearchQuery::new("   ").run(&tree).is_empty());
    }
}
