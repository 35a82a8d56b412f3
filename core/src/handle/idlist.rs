use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// A record that knows its own handle.
pub trait Keyed {
    type Handle: Copy + Ord + fmt::Display + fmt::Debug;

    fn handle(&self) -> Self::Handle;
}

/// Records indexed by handle, iterated in handle order.
///
/// Serialized as a plain list of records; the handle is read back from each one.
#[derive(Debug, Clone, PartialEq)]
pub struct IdList<T: Keyed> {
    items: BTreeMap<T::Handle, T>,
}

impl<T: Keyed> Default for IdList<T> {
    fn default() -> Self {
        Self { items: BTreeMap::new() }
    }
}

impl<T: Keyed> IdList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record whose handle is not yet present. On collision the
    /// list is left unchanged and the handle is returned.
    pub fn add(&mut self, item: T) -> Result<(), T::Handle> {
        match self.items.entry(item.handle()) {
            btree_map::Entry::Occupied(e) => Err(*e.key()),
            btree_map::Entry::Vacant(e) => {
                e.insert(item);
                Ok(())
            }
        }
    }

    pub fn get(&self, h: T::Handle) -> Option<&T> {
        self.items.get(&h)
    }

    pub fn get_mut(&mut self, h: T::Handle) -> Option<&mut T> {
        self.items.get_mut(&h)
    }

    pub fn contains(&self, h: T::Handle) -> bool {
        self.items.contains_key(&h)
    }

    pub fn remove(&mut self, h: T::Handle) -> Option<T> {
        self.items.remove(&h)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|_, item| keep(item));
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.values_mut()
    }

    pub fn handles(&self) -> impl Iterator<Item = T::Handle> + '_ {
        self.items.keys().copied()
    }
}

impl<T: Keyed + Serialize> Serialize for IdList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.values())
    }
}

impl<'de, T: Keyed + Deserialize<'de>> Deserialize<'de> for IdList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<T>::deserialize(deserializer)?;
        let mut list = IdList::new();
        for record in records {
            list.add(record)
                .map_err(|h| D::Error::custom(format!("duplicate handle {h}")))?;
        }
        Ok(list)
    }
}
