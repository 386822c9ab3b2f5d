//! Entry storage for a single container
//!
//! Two partitions, regular (closed) entries and open generic definitions, plus the
//! registration-ordered list of entries the container owns and must dispose.
//! The table itself is not synchronized; the container guards it with a
//! reader/writer lock.

use crate::Entry;
use crate::ServiceId;
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

type EntryMap = HashMap<ServiceId, Arc<Entry>, RandomState>;

#[derive(Default)]
pub(crate) struct EntryTable {
    regular: EntryMap,
    open: EntryMap,
    /// Entries this container declared, adopted or specialized, in insertion order.
    owned: Vec<Arc<Entry>>,
}

impl EntryTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A table for a child container: every entry by reference, none owned.
    pub(crate) fn inherit(&self) -> Self {
        Self {
            regular: self.regular.clone(),
            open: self.open.clone(),
            owned: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: &ServiceId) -> Option<&Arc<Entry>> {
        self.regular.get(id)
    }

    #[inline]
    pub(crate) fn get_open(&self, id: &ServiceId) -> Option<&Arc<Entry>> {
        self.open.get(id)
    }

    /// Insert `entry`, returning the entry it replaced.
    ///
    /// A replaced entry that this table owned is dropped from the owned list; the
    /// caller decides whether to dispose it.
    pub(crate) fn insert(&mut self, entry: Arc<Entry>, owned: bool) -> Option<Arc<Entry>> {
        let map = if entry.service_type().is_open() {
            &mut self.open
        } else {
            &mut self.regular
        };
        if owned {
            self.owned.push(Arc::clone(&entry));
        }
        let replaced = map.insert(entry.id().clone(), entry)?;
        if let Some(position) = self.owned.iter().position(|e| Arc::ptr_eq(e, &replaced)) {
            self.owned.remove(position);
        }
        Some(replaced)
    }

    /// Whether this table owns `entry`.
    pub(crate) fn owns(&self, entry: &Arc<Entry>) -> bool {
        self.owned.iter().any(|e| Arc::ptr_eq(e, entry))
    }

    /// Owned entries in insertion order, leaving the list empty.
    pub(crate) fn take_owned(&mut self) -> Vec<Arc<Entry>> {
        std::mem::take(&mut self.owned)
    }

    pub(crate) fn clear(&mut self) {
        self.regular.clear();
        self.open.clear();
        self.owned.clear();
    }

    /// Regular and open entries, for building a registry.
    pub(crate) fn snapshot(&self) -> (Vec<Arc<Entry>>, Vec<Arc<Entry>>) {
        (
            self.regular.values().cloned().collect(),
            self.open.values().cloned().collect(),
        )
    }

    /// Identities visible to normal lookups.
    pub(crate) fn ids(&self) -> Vec<ServiceId> {
        self.regular
            .values()
            .chain(self.open.values())
            .filter(|e| !e.is_hidden())
            .map(|e| e.id().clone())
            .collect()
    }

    /// Number of visible entries, both partitions.
    pub(crate) fn len(&self) -> usize {
        self.regular
            .values()
            .chain(self.open.values())
            .filter(|e| !e.is_hidden())
            .count()
    }
}

impl std::fmt::Debug for EntryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryTable")
            .field("regular", &self.regular.len())
            .field("open", &self.open.len())
            .field("owned", &self.owned.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Producer, Visibility};
    use crate::{Activator, Container, GenericDef, Lifetime, ServiceType};

    struct Database;
    struct Family;

    fn entry(container: &Container, id: ServiceId, visibility: Visibility) -> Arc<Entry> {
        let producer = Producer::Activator(Activator::factory(|_| Ok(Arc::new(Database))));
        Arc::new(Entry::new(id, Lifetime::Singleton, container, producer, visibility, None))
    }

    #[test]
    fn test_partitions() {
        let container = Container::new();
        let mut table = EntryTable::new();
        let open_id = ServiceId::new(ServiceType::open(GenericDef::of::<Family>(1)), None);

        table.insert(entry(&container, ServiceId::of::<Database>(), Visibility::Public), true);
        table.insert(entry(&container, open_id.clone(), Visibility::Public), true);

        assert!(table.get(&ServiceId::of::<Database>()).is_some());
        assert!(table.get(&open_id).is_none());
        assert!(table.get_open(&open_id).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replace_drops_ownership() {
        let container = Container::new();
        let mut table = EntryTable::new();
        let first = entry(&container, ServiceId::of::<Database>(), Visibility::Public);
        table.insert(Arc::clone(&first), true);
        assert!(table.owns(&first));

        let replaced = table
            .insert(entry(&container, ServiceId::of::<Database>(), Visibility::Public), true)
            .unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(!table.owns(&first));
        assert_eq!(table.take_owned().len(), 1);
    }

    #[test]
    fn test_inherit_shares_entries_without_ownership() {
        let container = Container::new();
        let mut table = EntryTable::new();
        let shared = entry(&container, ServiceId::of::<Database>(), Visibility::Public);
        table.insert(Arc::clone(&shared), true);

        let child = table.inherit();
        assert!(Arc::ptr_eq(child.get(&ServiceId::of::<Database>()).unwrap(), &shared));
        assert!(!child.owns(&shared));
    }

    #[test]
    fn test_hidden_entries_not_listed() {
        let container = Container::new();
        let mut table = EntryTable::new();
        table.insert(entry(&container, ServiceId::named::<Database>("internal"), Visibility::Hidden), true);
        assert_eq!(table.len(), 0);
        assert!(table.ids().is_empty());
        assert!(table.get(&ServiceId::named::<Database>("internal")).is_some());
    }
}
