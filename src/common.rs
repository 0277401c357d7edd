//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent, deterministic output.
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Interned identifiers: block labels, variable names, function names.
///
/// Interning means comparisons and hashing are pointer-cheap and two
/// identifiers with the same text are always the same value, which matters
/// because the backend keys several maps (the name table, the live-range
/// table) by identifier.
pub type Id = internment::Intern<String>;

/// Build an [`Id`] from anything that can be turned into a `String`.
pub fn id(s: impl Into<String>) -> Id {
    internment::Intern::new(s.into())
}
