// src/model/mod.rs
//! Format-neutral database tree
//!
//! Groups and entries live in an arena ([`Tree`]) and refer to each other by
//! index. Parent links are plain ids, so the ownership direction stays
//! one-way: the arena owns every node, containers list their children.
pub mod attachment;
pub mod entry;
pub mod field;
pub mod group;
pub mod reference;
pub mod search;
pub mod times;
pub mod tree;

pub use attachment::Attachment;
pub use entry::{AutoType, AutoTypeAssociation, CustomDataItem, Entry};
pub use field::{EntryField, ResolveStatus};
pub use group::Group;
pub use reference::{FieldReference, ReferenceField};
pub use search::SearchQuery;
pub use times::Times;
pub use tree::{EntryId, GroupId, Tree};
