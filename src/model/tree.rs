// src/model/tree.rs
//! Arena holding the group/entry hierarchy
//!
//! Every node is owned by the arena and addressed by a typed index. Removed
//! nodes leave a `None` slot behind so outstanding ids never alias a newer
//! node. Invariant: a node's `parent` always names the group whose child
//! list contains it.

use uuid::Uuid;

use super::entry::Entry;
use super::group::Group;
use crate::error::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

#[derive(Debug, Clone)]
pub struct Tree {
    groups: Vec<Option<Group>>,
    entries: Vec<Option<Entry>>,
    root: GroupId,
    root_entries_allowed: bool,
}

impl Tree {
    pub fn new(mut root: Group, root_entries_allowed: bool) -> Self {
        root.parent = None;
        root.groups.clear();
        root.entries.clear();
        Tree {
            groups: vec![Some(root)],
            entries: Vec::new(),
            root: GroupId(0),
            root_entries_allowed,
        }
    }

    pub fn root(&self) -> GroupId {
        self.root
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0).and_then(Option::as_ref)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0).and_then(Option::as_mut)
    }

    fn group_ref(&self, id: GroupId) -> Result<&Group, TreeError> {
        self.group(id).ok_or(TreeError::UnknownGroup)
    }

    fn group_ref_mut(&mut self, id: GroupId) -> Result<&mut Group, TreeError> {
        self.group_mut(id).ok_or(TreeError::UnknownGroup)
    }

    fn entry_ref_mut(&mut self, id: EntryId) -> Result<&mut Entry, TreeError> {
        self.entry_mut(id).ok_or(TreeError::UnknownEntry)
    }

    pub fn add_group(&mut self, parent: GroupId, mut group: Group) -> Result<GroupId, TreeError> {
        let parent_deleted = self.group_ref(parent)?.is_deleted;
        group.parent = Some(parent);
        group.groups.clear();
        group.entries.clear();
        group.is_deleted = group.is_deleted || parent_deleted;
        let id = GroupId(self.groups.len());
        self.groups.push(Some(group));
        self.group_ref_mut(parent)?.groups.push(id);
        Ok(id)
    }

    pub fn add_entry(&mut self, parent: GroupId, mut entry: Entry) -> Result<EntryId, TreeError> {
        if parent == self.root && !self.root_entries_allowed {
            return Err(TreeError::EntryInRoot);
        }
        let parent_deleted = self.group_ref(parent)?.is_deleted;
        entry.parent = Some(parent);
        entry.is_deleted = entry.is_deleted || parent_deleted;
        let id = EntryId(self.entries.len());
        self.entries.push(Some(entry));
        self.group_ref_mut(parent)?.entries.push(id);
        Ok(id)
    }

    /// True if `group` is `ancestor` or lies somewhere below it
    pub fn is_within(&self, group: GroupId, ancestor: GroupId) -> bool {
        let mut current = Some(group);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.group(id).and_then(|g| g.parent);
        }
        false
    }

    pub fn move_group(&mut self, id: GroupId, destination: GroupId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootGroup);
        }
        self.group_ref(id)?;
        let destination_deleted = self.group_ref(destination)?.is_deleted;
        if self.is_within(destination, id) {
            return Err(TreeError::CyclicMove);
        }
        if let Some(old_parent) = self.group_ref(id)?.parent {
            self.group_ref_mut(old_parent)?.groups.retain(|g| *g != id);
        }
        let group = self.group_ref_mut(id)?;
        group.parent = Some(destination);
        group.times.location_changed = super::times::now();
        self.group_ref_mut(destination)?.groups.push(id);
        self.set_deleted_recursive(id, destination_deleted);
        Ok(())
    }

    pub fn move_entry(&mut self, id: EntryId, destination: GroupId) -> Result<(), TreeError> {
        if destination == self.root && !self.root_entries_allowed {
            return Err(TreeError::EntryInRoot);
        }
        let destination_deleted = self.group_ref(destination)?.is_deleted;
        let old_parent = self.entry(id).ok_or(TreeError::UnknownEntry)?.parent;
        if let Some(old_parent) = old_parent {
            self.group_ref_mut(old_parent)?.entries.retain(|e| *e != id);
        }
        let entry = self.entry_ref_mut(id)?;
        entry.parent = Some(destination);
        entry.is_deleted = destination_deleted;
        entry.times.location_changed = super::times::now();
        self.group_ref_mut(destination)?.entries.push(id);
        Ok(())
    }

    /// Sets the deleted flag on a group and everything below it
    pub fn set_deleted_recursive(&mut self, id: GroupId, is_deleted: bool) {
        for group_id in self.subtree_groups(id) {
            let entries = match self.group_mut(group_id) {
                Some(group) => {
                    group.is_deleted = is_deleted;
                    group.entries.clone()
                }
                None => continue,
            };
            for entry_id in entries {
                if let Some(entry) = self.entry_mut(entry_id) {
                    entry.is_deleted = is_deleted;
                }
            }
        }
    }

    /// Removes an entry from the tree and hands it back
    pub fn remove_entry(&mut self, id: EntryId) -> Result<Entry, TreeError> {
        let mut entry = self
            .entries
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(TreeError::UnknownEntry)?;
        if let Some(parent) = entry.parent.take() {
            self.group_ref_mut(parent)?.entries.retain(|e| *e != id);
        }
        Ok(entry)
    }

    /// Removes a group with its whole subtree; returns the uuids of every
    /// removed group and entry, the group itself first
    pub fn remove_group(&mut self, id: GroupId) -> Result<Vec<Uuid>, TreeError> {
        if id == self.root {
            return Err(TreeError::RootGroup);
        }
        let parent = self.group_ref(id)?.parent;
        let mut removed = Vec::new();
        for group_id in self.subtree_groups(id) {
            let Some(mut group) = self.groups.get_mut(group_id.0).and_then(Option::take) else {
                continue;
            };
            removed.push(group.uuid);
            for entry_id in group.entries.drain(..) {
                if let Some(mut entry) = self.entries.get_mut(entry_id.0).and_then(Option::take) {
                    removed.push(entry.uuid);
                    entry.erase();
                }
            }
        }
        if let Some(parent) = parent {
            self.group_ref_mut(parent)?.groups.retain(|g| *g != id);
        }
        Ok(removed)
    }

    /// Groups of the subtree rooted at `id` in pre-order, `id` first
    pub fn subtree_groups(&self, id: GroupId) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(group) = self.group(current) else {
                continue;
            };
            out.push(current);
            stack.extend(group.groups.iter().rev());
        }
        out
    }

    /// Entries below `id` in pre-order (a group's entries before its subgroups)
    pub fn subtree_entries(&self, id: GroupId) -> Vec<EntryId> {
        self.subtree_groups(id)
            .into_iter()
            .filter_map(|g| self.group(g))
            .flat_map(|g| g.entries.iter().copied())
            .collect()
    }

    pub fn all_groups(&self) -> Vec<GroupId> {
        self.subtree_groups(self.root)
    }

    pub fn all_entries(&self) -> Vec<EntryId> {
        self.subtree_entries(self.root)
    }

    /// Depth below the root; the root itself is 0
    pub fn depth(&self, id: GroupId) -> usize {
        let mut depth = 0;
        let mut current = self.group(id).and_then(|g| g.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.group(parent).and_then(|g| g.parent);
        }
        depth
    }

    pub fn find_group(&self, uuid: Uuid) -> Option<GroupId> {
        self.all_groups()
            .into_iter()
            .find(|id| self.group(*id).is_some_and(|g| g.uuid == uuid))
    }

    pub fn find_entry(&self, uuid: Uuid) -> Option<EntryId> {
        self.all_entries()
            .into_iter()
            .find(|id| self.entry(*id).is_some_and(|e| e.uuid == uuid))
    }

    pub fn group_count(&self) -> usize {
        self.groups.iter().flatten().count()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().flatten()
    }

    /// Zeroizes every secret-bearing value and empties the tree
    pub fn erase(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.erase();
        }
        self.entries.clear();
        self.groups.truncate(1);
        if let Some(root) = self.group_mut(self.root) {
            root.groups.clear();
            root.entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree, GroupId, GroupId, EntryId) {
        let mut tree = Tree::new(Group::new("Root"), true);
        let a = tree.add_group(tree.root(), Group::new("A")).unwrap();
        let b = tree.add_group(a, Group::new("B")).unwrap();
        let e = tree.add_entry(b, Entry::new()).unwrap();
        (tree, a, b, e)
    }

    #[test]
    fn parent_links_follow_moves() {
        let (mut tree, a, b, e) = sample();
        tree.move_entry(e, a).unwrap();
        assert_eq!(tree.entry(e).unwrap().parent(), Some(a));
        assert!(tree.group(b).unwrap().entries().is_empty());
        assert_eq!(tree.group(a).unwrap().entries(), &[e]);

        tree.move_group(b, tree.root()).unwrap();
        assert_eq!(tree.group(b).unwrap().parent(), Some(tree.root()));
        assert!(!tree.group(a).unwrap().groups().contains(&b));
    }

    #[test]
    fn group_cannot_move_into_itself() {
        let (mut tree, a, b, _) = sample();
        assert_eq!(tree.move_group(a, b), Err(TreeError::CyclicMove));
        assert_eq!(tree.move_group(a, a), Err(TreeError::CyclicMove));
        assert_eq!(tree.move_group(tree.root(), a), Err(TreeError::RootGroup));
    }

    #[test]
    fn deleted_flag_follows_destination() {
        let (mut tree, a, b, e) = sample();
        let bin = tree.add_group(tree.root(), Group::new("Bin")).unwrap();
        tree.set_deleted_recursive(bin, true);
        tree.move_group(a, bin).unwrap();
        assert!(tree.group(b).unwrap().is_deleted);
        assert!(tree.entry(e).unwrap().is_deleted);
        tree.move_group(a, tree.root()).unwrap();
        assert!(!tree.entry(e).unwrap().is_deleted);
    }

    #[test]
    fn remove_group_returns_subtree_uuids() {
        let (mut tree, a, b, e) = sample();
        let expected = vec![
            tree.group(a).unwrap().uuid,
            tree.group(b).unwrap().uuid,
            tree.entry(e).unwrap().uuid,
        ];
        assert_eq!(tree.remove_group(a).unwrap(), expected);
        assert!(tree.group(b).is_none());
        assert!(tree.entry(e).is_none());
        assert!(tree.group(tree.root()).unwrap().groups().is_empty());
    }

    #[test]
    fn root_entries_can_be_forbidden() {
        let mut tree = Tree::new(Group::new("Root"), false);
        assert_eq!(
            tree.add_entry(tree.root(), Entry::new()),
            Err(TreeError::EntryInRoot)
        );
    }
}
