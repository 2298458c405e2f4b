//! FILENAME: engine/src/style.rs
//! PURPOSE: Bounded lookup table from (column, key) to a cell format index.
//! CONTEXT: This file keeps the Flyweight idea of the cell model: cells never
//! carry formatting, only a small integer pointing into the package's
//! `cellXfs` list. The row writer asks this table for the override of every
//! cell it serializes, so a lookup is a plain array index once the key has
//! been interned.

use std::collections::HashMap;
use thiserror::Error;

/// Default column bound of a manager built with [`StyleManager::default`].
pub const DEFAULT_MAX_COLUMNS: usize = 1024;
/// Default bound on distinct keys.
pub const DEFAULT_MAX_KEYS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StyleError {
    /// Keys are formatting roles (usually sheet names), not user data.
    #[error("style key space exhausted: cannot register '{key}', limit is {limit} distinct keys")]
    KeySpaceExhausted { key: String, limit: usize },
}

/// Interned key handle. Only valid for the manager that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleKey(u16);

/// Dense `max_keys x max_columns` matrix of optional style ids.
#[derive(Debug, Clone)]
pub struct StyleManager {
    max_columns: usize,
    max_keys: usize,
    keys: HashMap<String, StyleKey>,
    /// One row of `max_columns` slots per interned key.
    slots: Vec<Box<[Option<u32>]>>,
}

impl StyleManager {
    pub fn new(max_columns: usize, max_keys: usize) -> Self {
        StyleManager {
            max_columns,
            max_keys,
            keys: HashMap::new(),
            slots: Vec::new(),
        }
    }

    pub fn max_columns(&self) -> usize {
        self.max_columns
    }

    /// Interns `key`, allocating its row on first use.
    pub fn intern(&mut self, key: &str) -> Result<StyleKey, StyleError> {
        if let Some(existing) = self.keys.get(key) {
            return Ok(*existing);
        }
        if self.slots.len() >= self.max_keys || self.slots.len() > u16::MAX as usize {
            return Err(StyleError::KeySpaceExhausted {
                key: key.to_string(),
                limit: self.max_keys,
            });
        }
        let handle = StyleKey(self.slots.len() as u16);
        self.slots
            .push(vec![None; self.max_columns].into_boxed_slice());
        self.keys.insert(key.to_string(), handle);
        Ok(handle)
    }

    /// Returns the handle of an already interned key.
    pub fn key(&self, key: &str) -> Option<StyleKey> {
        self.keys.get(key).copied()
    }

    /// Records `style` for (col, key). Columns past the bound are dropped and
    /// read back as absent.
    pub fn set_style(&mut self, col: u32, key: &str, style: u32) -> Result<(), StyleError> {
        let handle = self.intern(key)?;
        if let Some(slot) = self.slots[handle.0 as usize].get_mut(col as usize) {
            *slot = Some(style);
        }
        Ok(())
    }

    pub fn get_style(&self, col: u32, key: &str) -> Option<u32> {
        self.key(key).and_then(|handle| self.style_at(col, handle))
    }

    /// Hot-path lookup: no hashing, one bounds check.
    #[inline]
    pub fn style_at(&self, col: u32, key: StyleKey) -> Option<u32> {
        self.slots
            .get(key.0 as usize)
            .and_then(|row| row.get(col as usize))
            .copied()
            .flatten()
    }

    pub fn key_count(&self) -> usize {
        self.slots.len()
    }
}

impl Default for StyleManager {
    fn default() -> Self {
        StyleManager::new(DEFAULT_MAX_COLUMNS, DEFAULT_MAX_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_entries_read_as_absent() {
        let mut styles = StyleManager::new(8, 2);
        assert_eq!(styles.get_style(0, "Data"), None);
        styles.set_style(3, "Data", 7).unwrap();
        assert_eq!(styles.get_style(2, "Data"), None);
        assert_eq!(styles.get_style(3, "Other"), None);
    }

    #[test]
    fn set_then_get_returns_same_id() {
        let mut styles = StyleManager::new(8, 2);
        styles.set_style(3, "Data", 7).unwrap();
        styles.set_style(3, "Data", 9).unwrap();
        styles.set_style(0, "Summary", 1).unwrap();
        assert_eq!(styles.get_style(3, "Data"), Some(9));
        assert_eq!(styles.get_style(0, "Summary"), Some(1));

        let handle = styles.key("Data").unwrap();
        assert_eq!(styles.style_at(3, handle), Some(9));
    }

    #[test]
    fn out_of_range_column_reads_as_absent() {
        let mut styles = StyleManager::new(4, 1);
        styles.set_style(4, "Data", 2).unwrap();
        styles.set_style(10_000, "Data", 2).unwrap();
        assert_eq!(styles.get_style(4, "Data"), None);
        assert_eq!(styles.get_style(10_000, "Data"), None);
    }

    #[test]
    fn exceeding_key_limit_is_an_error() {
        let mut styles = StyleManager::new(4, 2);
        styles.set_style(0, "a", 1).unwrap();
        styles.set_style(0, "b", 1).unwrap();
        let err = styles.set_style(0, "c", 1).unwrap_err();
        assert_eq!(
            err,
            StyleError::KeySpaceExhausted {
                key: "c".to_string(),
                limit: 2
            }
        );
        // Re-using an interned key still works.
        styles.set_style(1, "a", 5).unwrap();
        assert_eq!(styles.key_count(), 2);
    }
}
