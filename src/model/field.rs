// src/model/field.rs
//! Entry field with a memoized reference-resolved value

use zeroize::Zeroize;

#[cfg(test)]
thread_local! {
    /// Number of field wipes on this thread
    pub(crate) static WIPED_FIELDS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Outcome of the last reference resolution of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveStatus {
    /// Not resolved yet, or the value holds no reference tokens
    #[default]
    NoReferences,
    /// Tokens were found but resolution has not run on them
    Parsed,
    /// At least one token points to an entry that does not exist
    TargetMissing,
    Resolved,
}

#[derive(Clone, PartialEq, Eq)]
pub struct EntryField {
    pub name: String,
    value: String,
    pub is_protected: bool,
    resolved: Option<String>,
    status: ResolveStatus,
}

impl std::fmt::Debug for EntryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value: &str = if self.is_protected {
            "<protected>"
        } else {
            &self.value
        };
        f.debug_struct("EntryField")
            .field("name", &self.name)
            .field("value", &value)
            .field("is_protected", &self.is_protected)
            .field("status", &self.status)
            .finish()
    }
}

impl EntryField {
    pub fn new(name: &str, value: &str, is_protected: bool) -> Self {
        EntryField {
            name: name.to_owned(),
            value: value.to_owned(),
            is_protected,
            resolved: None,
            status: ResolveStatus::NoReferences,
        }
    }

    /// Raw value as stored in the file
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replaces the raw value and drops the memoized resolution
    pub fn set_value(&mut self, value: &str) {
        self.value.zeroize();
        self.value = value.to_owned();
        self.unresolve();
    }

    /// Value with references substituted, or the raw value when unresolved
    pub fn resolved_value(&self) -> &str {
        self.resolved.as_deref().unwrap_or(&self.value)
    }

    pub fn resolve_status(&self) -> ResolveStatus {
        self.status
    }

    pub fn unresolve(&mut self) {
        if let Some(mut resolved) = self.resolved.take() {
            resolved.zeroize();
        }
        self.status = ResolveStatus::NoReferences;
    }

    pub(crate) fn set_resolved(&mut self, resolved: String, status: ResolveStatus) {
        self.unresolve();
        self.resolved = Some(resolved);
        self.status = status;
    }

    pub fn erase(&mut self) {
        self.unresolve();
        self.value.zeroize();
        self.name.zeroize();
        #[cfg(test)]
        WIPED_FIELDS.with(|wiped| wiped.set(wiped.get() + 1));
    }
}

impl Drop for EntryField {
    fn drop(&mut self) {
        self.erase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editing_drops_the_memo() {
        let mut field = EntryField::new("Password", "{REF:P@I:00}", true);
        field.set_resolved("hunter2".into(), ResolveStatus::Resolved);
        assert_eq!(field.resolved_value(), "hunter2");
        field.set_value("plain");
        assert_eq!(field.resolved_value(), "plain");
        assert_eq!(field.resolve_status(), ResolveStatus::NoReferences);
    }

    #[test]
    fn dropping_a_field_wipes_it() {
        let before = WIPED_FIELDS.with(|wiped| wiped.get());
        drop(EntryField::new("Password", "hunter2", true));
        assert_eq!(WIPED_FIELDS.with(|wiped| wiped.get()), before + 1);
    }

    #[test]
    fn protected_values_are_not_printed() {
        let field = EntryField::new("Password", "hunter2", true);
        assert!(!format!("{field:?}").contains("hunter2"));
    }
}
