#![forbid(unsafe_code)]

//! Name-keyed property storage for one host object.
//!
//! A host object with many optional bindable attributes keeps them in a
//! [`BindingStorage`] instead of one field each. Entries are type-erased and
//! looked up by name, either typed ([`BindingStorage::property`]) or through
//! [`UntypedBindable`].
//!
//! Entries hold property handles, not property data. Growing the storage
//! moves handles around; the properties they point to stay put, so bindings
//! and handlers attached to a stored property survive any number of inserts.

use std::any::Any;
use std::fmt;

use ahash::AHashMap;

use crate::bindable::UntypedBindable;
use crate::property::Property;

/// An entry type [`BindingStorage`] can hold.
pub trait StoredProperty: UntypedBindable {
    /// Concrete access for typed lookups.
    fn as_any(&self) -> &dyn Any;

    /// Type-erased binding access.
    fn as_bindable(&self) -> &dyn UntypedBindable;
}

impl<P: UntypedBindable + 'static> StoredProperty for P {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_bindable(&self) -> &dyn UntypedBindable {
        self
    }
}

struct StorageEntry {
    name: String,
    property: Box<dyn StoredProperty>,
}

/// Property handles of one host object, keyed by name.
#[derive(Default)]
pub struct BindingStorage {
    entries: Vec<StorageEntry>,
    index: AHashMap<String, usize>,
}

impl BindingStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `property` under `name`, replacing any previous entry.
    ///
    /// Returns `true` if an entry was replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        property: impl StoredProperty + 'static,
    ) -> bool {
        let name = name.into();
        let property: Box<dyn StoredProperty> = Box::new(property);
        if let Some(&slot) = self.index.get(&name) {
            self.entries[slot].property = property;
            return true;
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(StorageEntry { name, property });
        false
    }

    /// The entry under `name`, if it has concrete type `P`.
    #[must_use]
    pub fn get<P: 'static>(&self, name: &str) -> Option<&P> {
        self.entry(name)?.as_any().downcast_ref::<P>()
    }

    /// A handle to the [`Property<T>`] stored under `name`.
    #[must_use]
    pub fn property<T: 'static>(&self, name: &str) -> Option<Property<T>> {
        self.get::<Property<T>>(name).cloned()
    }

    /// The entry under `name`, type-erased.
    #[must_use]
    pub fn bindable(&self, name: &str) -> Option<&dyn UntypedBindable> {
        Some(self.entry(name)?.as_bindable())
    }

    fn entry(&self, name: &str) -> Option<&dyn StoredProperty> {
        let &slot = self.index.get(name)?;
        Some(self.entries[slot].property.as_ref())
    }

    /// Remove the entry under `name`. Returns whether one existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(slot) = self.index.remove(name) else {
            return false;
        };
        self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot) {
            self.index.insert(moved.name.clone(), slot);
        }
        true
    }

    /// Whether an entry exists under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entry names, in storage order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BindingStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|e| (&e.name, e.property.value_type())),
            )
            .finish()
    }
}
