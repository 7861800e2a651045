//! Ordered UID index
//!
//! The order vector defines iteration and save order; the member set makes
//! membership checks O(1) and keeps every UID unique. Both live behind one
//! lock so they can never disagree.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct Entries {
    order: Vec<String>,
    members: HashSet<String>,
}

/// Lock-guarded ordered set of UIDs
#[derive(Debug, Default)]
pub struct UidIndex {
    entries: RwLock<Entries>,
}

impl UidIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from UIDs in order, dropping repeats
    pub fn from_vec(uids: Vec<String>) -> Self {
        let index = Self::new();
        index.extend(uids);
        index
    }

    /// Append a UID; returns false if it was already present
    pub fn insert(&self, uid: &str) -> bool {
        let mut entries = self.entries.write();
        if !entries.members.insert(uid.to_string()) {
            return false;
        }
        entries.order.push(uid.to_string());
        true
    }

    /// Append UIDs in order; returns how many were new
    pub fn extend<I: IntoIterator<Item = String>>(&self, uids: I) -> usize {
        let mut entries = self.entries.write();
        let mut added = 0;
        for uid in uids {
            if entries.members.insert(uid.clone()) {
                entries.order.push(uid);
                added += 1;
            }
        }
        added
    }

    /// Remove a UID; returns whether it was present
    pub fn remove(&self, uid: &str) -> bool {
        let mut entries = self.entries.write();
        if !entries.members.remove(uid) {
            return false;
        }
        if let Some(pos) = entries.order.iter().position(|u| u == uid) {
            entries.order.remove(pos);
        }
        true
    }

    /// Keep only UIDs for which `keep` returns true; returns the dropped ones
    pub fn retain<F: FnMut(&str) -> bool>(&self, mut keep: F) -> Vec<String> {
        let mut entries = self.entries.write();
        let mut dropped = Vec::new();
        let Entries { order, members } = &mut *entries;
        order.retain(|uid| {
            if keep(uid) {
                true
            } else {
                members.remove(uid);
                dropped.push(uid.clone());
                false
            }
        });
        dropped
    }

    /// Membership check
    pub fn contains(&self, uid: &str) -> bool {
        self.entries.read().members.contains(uid)
    }

    /// Number of UIDs
    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().order.is_empty()
    }

    /// UID at `position`
    pub fn get(&self, position: usize) -> Option<String> {
        self.entries.read().order.get(position).cloned()
    }

    /// Position of `uid`
    pub fn position(&self, uid: &str) -> Option<usize> {
        let entries = self.entries.read();
        if !entries.members.contains(uid) {
            return None;
        }
        entries.order.iter().position(|u| u == uid)
    }

    /// Copy of the UIDs in order
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.read().order.clone()
    }

    /// Sort UIDs in natural order
    pub fn sort_natural(&self) {
        self.entries.write().order.sort_by(|a, b| natural_cmp(a, b));
    }

    /// Drop every UID
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.order.clear();
        entries.members.clear();
    }
}

/// Compare strings treating runs of ASCII digits as numbers
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let a_len = a.iter().take_while(|c| c.is_ascii_digit()).count();
                let b_len = b.iter().take_while(|c| c.is_ascii_digit()).count();
                let (a_num, a_rest) = a.split_at(a_len);
                let (b_num, b_rest) = b.split_at(b_len);
                let a_trim = trim_zeros(a_num);
                let b_trim = trim_zeros(b_num);
                let ord = a_trim
                    .len()
                    .cmp(&b_trim.len())
                    .then_with(|| a_trim.cmp(b_trim))
                    .then_with(|| a_len.cmp(&b_len));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = a_rest;
                b = b_rest;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let start = digits.iter().position(|&c| c != b'0').unwrap_or(digits.len());
    &digits[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_is_unique() {
        let index = UidIndex::new();
        assert!(index.insert("a"));
        assert!(index.insert("b"));
        assert!(!index.insert("a"));
        assert_eq!(index.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_and_position() {
        let index = UidIndex::from_vec(vec!["a".into(), "b".into(), "c".into(), "b".into()]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.position("c"), Some(2));
        assert!(index.remove("b"));
        assert!(!index.remove("b"));
        assert_eq!(index.position("c"), Some(1));
        assert_eq!(index.get(1).as_deref(), Some("c"));
        assert_eq!(index.get(5), None);
    }

    #[test]
    fn test_retain_returns_dropped() {
        let index = UidIndex::from_vec((0..6).map(|i| i.to_string()).collect());
        let dropped = index.retain(|uid| uid.parse::<u32>().unwrap() % 2 == 0);
        assert_eq!(dropped, vec!["1", "3", "5"]);
        assert_eq!(index.snapshot(), vec!["0", "2", "4"]);
        assert!(!index.contains("3"));
        assert!(index.insert("3"));
    }

    #[test]
    fn test_natural_order() {
        let index = UidIndex::from_vec(vec![
            "mol10".into(),
            "mol2".into(),
            "Mol1".into(),
            "mol1".into(),
            "mol02".into(),
        ]);
        index.sort_natural();
        assert_eq!(index.snapshot(), vec!["Mol1", "mol1", "mol2", "mol02", "mol10"]);
    }

    #[test]
    fn test_concurrent_inserts_stay_unique() {
        let index = Arc::new(UidIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        index.insert(&format!("uid{}", i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 200);
    }
}
