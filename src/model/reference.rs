// src/model/reference.rs
//! `{REF:<field>@<search-field>:<text>}` tokens
//!
//! Parsing is separate from resolution. Resolution is not recursive by
//! structure: nested references are followed through a hop counter, and a
//! value reached with no hops left turns into the depth sentinel. That
//! counter is also what stops reference cycles.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, trace};

use super::entry::Entry;
use super::field::ResolveStatus;
use super::tree::{EntryId, Tree};
use crate::consts::{
    FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USER_NAME,
    REFERENCE_DEPTH_SENTINEL, STANDARD_FIELDS,
};

const REFERENCE_PATTERN: &str = r"(?i)\{REF:([TUPANI])@([TUPANIO]):(.+?)\}";

fn reference_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(REFERENCE_PATTERN) {
            Ok(regex) => Some(regex),
            Err(err) => {
                error!("reference pattern does not compile: {err}");
                None
            }
        })
        .as_ref()
}

/// Field named by one letter of a reference token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceField {
    Title,
    UserName,
    Password,
    Url,
    Notes,
    Uuid,
    /// Any non-standard field (search side only)
    Other,
}

impl ReferenceField {
    fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "T" => Some(Self::Title),
            "U" => Some(Self::UserName),
            "P" => Some(Self::Password),
            "A" => Some(Self::Url),
            "N" => Some(Self::Notes),
            "I" => Some(Self::Uuid),
            "O" => Some(Self::Other),
            _ => None,
        }
    }

    fn field_name(self) -> Option<&'static str> {
        match self {
            Self::Title => Some(FIELD_TITLE),
            Self::UserName => Some(FIELD_USER_NAME),
            Self::Password => Some(FIELD_PASSWORD),
            Self::Url => Some(FIELD_URL),
            Self::Notes => Some(FIELD_NOTES),
            Self::Uuid | Self::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference {
    pub target: ReferenceField,
    pub search_field: ReferenceField,
    pub search_text: String,
    /// Byte range of the whole token in the parsed value
    pub range: Range<usize>,
}

impl FieldReference {
    /// Every reference token in `value`, in order of appearance
    pub fn parse_all(value: &str) -> Vec<FieldReference> {
        if !value.contains('{') {
            return Vec::new();
        }
        let Some(regex) = reference_regex() else {
            return Vec::new();
        };
        regex
            .captures_iter(value)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(FieldReference {
                    target: ReferenceField::from_code(caps.get(1)?.as_str())?,
                    search_field: ReferenceField::from_code(caps.get(2)?.as_str())?,
                    search_text: caps.get(3)?.as_str().to_owned(),
                    range: whole.range(),
                })
            })
            .collect()
    }

    fn matches(&self, entry: &Entry) -> bool {
        let needle = self.search_text.to_lowercase();
        match self.search_field {
            ReferenceField::Uuid => uuid_text(entry).eq_ignore_ascii_case(self.search_text.trim()),
            ReferenceField::Other => entry
                .fields
                .iter()
                .filter(|f| !STANDARD_FIELDS.contains(&f.name.as_str()))
                .any(|f| f.value().to_lowercase().contains(&needle)),
            field => field
                .field_name()
                .is_some_and(|name| entry.value(name).to_lowercase().contains(&needle)),
        }
    }

    /// First entry, in tree order, the token's search clause selects
    pub fn find_target(&self, tree: &Tree) -> Option<EntryId> {
        tree.all_entries()
            .into_iter()
            .find(|id| tree.entry(*id).is_some_and(|e| self.matches(e)))
    }
}

/// Uuid as written inside reference tokens: 32 uppercase hex digits
fn uuid_text(entry: &Entry) -> String {
    entry.uuid.as_simple().to_string().to_uppercase()
}

/// Substitutes every reference in `value`, following nested references
/// while `depth` allows
pub fn resolve_value(tree: &Tree, value: &str, depth: u8) -> (String, ResolveStatus) {
    let references = FieldReference::parse_all(value);
    if references.is_empty() {
        return (value.to_owned(), ResolveStatus::NoReferences);
    }
    if depth == 0 {
        trace!("reference depth exhausted");
        return (REFERENCE_DEPTH_SENTINEL.to_owned(), ResolveStatus::Resolved);
    }

    let mut status = ResolveStatus::Resolved;
    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;
    for reference in references {
        out.push_str(&value[cursor..reference.range.start]);
        cursor = reference.range.end;

        let target = reference.find_target(tree).and_then(|id| tree.entry(id));
        let Some(target) = target else {
            status = ResolveStatus::TargetMissing;
            out.push_str(&value[reference.range.clone()]);
            continue;
        };
        match reference.target.field_name() {
            Some(name) => {
                let (nested, _) = resolve_value(tree, target.value(name), depth - 1);
                out.push_str(&nested);
            }
            None => out.push_str(&uuid_text(target)),
        }
    }
    out.push_str(&value[cursor..]);
    (out, status)
}

/// Drops every memoized resolution in the tree, history included
pub fn unresolve_all(tree: &mut Tree) {
    for entry in tree.entries_mut() {
        let history = entry.history.iter_mut().flat_map(|old| old.fields.iter_mut());
        for field in entry.fields.iter_mut().chain(history) {
            field.unresolve();
        }
    }
}

/// Recomputes the resolved value of every field of every entry
pub fn resolve_all(tree: &mut Tree, max_depth: u8) {
    unresolve_all(tree);
    let mut results = Vec::new();
    for id in tree.all_entries() {
        let Some(entry) = tree.entry(id) else {
            continue;
        };
        for (index, field) in entry.fields.iter().enumerate() {
            let (resolved, status) = resolve_value(tree, field.value(), max_depth);
            if status != ResolveStatus::NoReferences {
                results.push((id, index, resolved, status));
            }
        }
    }
    for (id, index, resolved, status) in results {
        if let Some(field) = tree.entry_mut(id).and_then(|e| e.fields.get_mut(index)) {
            field.set_resolved(resolved, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Group;

    #[test]
    fn parses_tokens_case_insensitively() {
        let refs = FieldReference::parse_all("x {REF:P@t:Mail} y {ref:u@i:00AB}");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].target, ReferenceField::Password);
        assert_eq!(refs[0].search_field, ReferenceField::Title);
        assert_eq!(refs[0].search_text, "Mail");
        assert_eq!(refs[1].search_field, ReferenceField::Uuid);
        assert!(FieldReference::parse_all("{REF:O@T:x}").is_empty());
        assert!(FieldReference::parse_all("plain").is_empty());
    }

    #[test]
    fn unresolve_reaches_history_snapshots() {
        let mut tree = Tree::new(Group::new("Root"), true);
        let mut mail = Entry::new();
        mail.set_value("Title", "Mail");
        mail.set_value("Password", "secret");
        tree.add_entry(tree.root(), mail).unwrap();
        let mut alias = Entry::new();
        alias.set_value("Password", "{REF:P@T:Mail}");
        let alias_id = tree.add_entry(tree.root(), alias).unwrap();

        resolve_all(&mut tree, 3);
        tree.entry_mut(alias_id).unwrap().backup_state(10);
        let old = &tree.entry(alias_id).unwrap().history[0];
        assert_eq!(old.field("Password").unwrap().resolved_value(), "secret");

        unresolve_all(&mut tree);
        let old = tree.entry(alias_id).unwrap().history[0].field("Password").unwrap();
        assert_eq!(old.resolve_status(), ResolveStatus::NoReferences);
        assert_eq!(old.resolved_value(), "{REF:P@T:Mail}");
    }

    #[test]
    fn resolves_by_title_and_uuid() {
        let mut tree = Tree::new(Group::new("Root"), true);
        let mut mail = Entry::new();
        mail.set_value("Title", "Mail");
        mail.set_value("Password", "secret");
        let mail_uuid = mail.uuid;
        let mail_id = tree.add_entry(tree.root(), mail).unwrap();

        let mut alias = Entry::new();
        alias.set_value("Password", "<{REF:P@T:mail}>");
        alias.set_value(
            "Notes",
            &format!("{{REF:T@I:{}}}", mail_uuid.as_simple()),
        );
        alias.set_value("URL", "{REF:A@T:nothing-like-this}");
        let alias_id = tree.add_entry(tree.root(), alias).unwrap();

        resolve_all(&mut tree, 3);
        let alias = tree.entry(alias_id).unwrap();
        assert_eq!(alias.field("Password").unwrap().resolved_value(), "<secret>");
        assert_eq!(alias.field("Notes").unwrap().resolved_value(), "Mail");
        let url = alias.field("URL").unwrap();
        assert_eq!(url.resolve_status(), ResolveStatus::TargetMissing);
        assert_eq!(url.resolved_value(), "{REF:A@T:nothing-like-this}");

        tree.entry_mut(mail_id).unwrap().set_value("Password", "changed");
        resolve_all(&mut tree, 3);
        let alias = tree.entry(alias_id).unwrap();
        assert_eq!(alias.field("Password").unwrap().resolved_value(), "<changed>");
    }
}
