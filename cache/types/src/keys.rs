// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Identifies a transaction's position in the store's logical order.
/// A cache entry remembers the highest context that has touched it.
pub type ContextId = u64;

/// Identifier of one object in the backing data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// Key of one name binding in the backing data store's namespace.
///
/// `Last` is the designated end of the namespace. It sorts after every
/// name, so a range probe that runs off the end of the bound names lands
/// on it, and it is the only key whose fetch may be abandoned outright.
// Variant order matters: the derived Ord puts `Last` after every `Name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BindingKey {
    Name(String),
    Last,
}

impl BindingKey {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// The bound name, or `None` for the sentinel.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Last => None,
        }
    }

    pub fn is_last(&self) -> bool {
        matches!(self, Self::Last)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "binding:{name}"),
            Self::Last => write!(f, "binding:<last>"),
        }
    }
}

/// A key the cache can hold an entry under.
///
/// The entry state machine is key-agnostic; the one question it asks its
/// key is whether it is the sentinel last binding, the only entry whose
/// fetch may be abandoned outright.
pub trait EntryKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    /// True for the sentinel key marking the end of the binding namespace.
    fn is_last_binding(&self) -> bool {
        false
    }
}

impl EntryKey for ObjectId {}

impl EntryKey for BindingKey {
    fn is_last_binding(&self) -> bool {
        self.is_last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_key_order() {
        // Names sort lexicographically and the sentinel sorts after all of them.
        assert!(BindingKey::name("a") < BindingKey::name("b"));
        assert!(BindingKey::name("ab") < BindingKey::name("b"));
        assert!(BindingKey::name("zzz") < BindingKey::Last);
        assert_eq!(BindingKey::Last, BindingKey::Last);
    }

    #[test]
    fn last_binding_sentinel() {
        assert!(BindingKey::Last.is_last_binding());
        assert!(!BindingKey::name("users.alice").is_last_binding());
        assert!(!ObjectId::new(7).is_last_binding());
    }

    #[test]
    fn key_display() {
        assert_eq!(ObjectId::new(42).to_string(), "oid:42");
        assert_eq!(BindingKey::name("users.alice").to_string(), "binding:users.alice");
        assert_eq!(BindingKey::Last.to_string(), "binding:<last>");
    }
}
