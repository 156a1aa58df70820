//! Core types for the store tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step into a state value: a field of an object or an index of an array.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{:?}", name),
            Key::Index(index) => write!(f, "[{}]", index),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{}", name),
            Key::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Field(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Location of a store within its tree, as the keys walked from the root.
///
/// Two store handles refer to the same state exactly when their paths are equal.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Key>);

impl Path {
    /// The path of a root store.
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn from_keys(keys: Vec<Key>) -> Self {
        Path(keys)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys between the root and this path.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Path one level below this one.
    pub fn child(&self, key: Key) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Path(keys)
    }

    /// Path one level up, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// The final key, or `None` for the root.
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for key in &self.0 {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

/// Monotonic counter of commits to a root store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Generation(pub u64);

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.0)
    }
}

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

/// Unique identifier for a subscriber within one tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);
