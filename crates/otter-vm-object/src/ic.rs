//! Property access inline caches
//!
//! A [`PropertyCache`] belongs to one access site and one key. It remembers
//! where the key lives for the shapes it has seen. A cached entry is only
//! used after the object's current shape id is compared under the object's
//! lock, so a stale entry can never read another property's slot; it simply
//! misses and the access falls back to a full lookup.
//!
//! State progression: Uninitialized -> Monomorphic -> Polymorphic (up to
//! [`POLYMORPHIC_ENTRIES`] shapes) -> Megamorphic. Megamorphic sites stop
//! caching.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ObjectResult;
use crate::object::ObjectRef;
use crate::property::{Property, PropertyKey, PropertyLocation, ProxyProperty, StorageType};
use crate::shape::ShapeId;
use crate::value::Value;

/// Shapes remembered before a site goes megamorphic
pub const POLYMORPHIC_ENTRIES: usize = 4;

/// Where a cached key lives for one shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachedLocation {
    /// Data slot
    Slot {
        /// Slot index
        index: u32,
        /// Whether stores may use the fast path
        writable: bool,
        /// Declared storage type of the slot
        declared: StorageType,
    },
    /// Engine-computed property
    Proxy(ProxyProperty),
}

impl CachedLocation {
    fn of(property: &Property) -> Option<Self> {
        match property.location {
            PropertyLocation::Inline { index, declared } => Some(Self::Slot {
                index,
                writable: property.attributes.writable,
                declared,
            }),
            PropertyLocation::Proxy(proxy) => Some(Self::Proxy(proxy)),
            // Getter and setter calls are never cached.
            PropertyLocation::Accessor { .. } => None,
        }
    }
}

/// Inline cache state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CacheState {
    /// Never executed
    #[default]
    Uninitialized,
    /// One shape seen
    Monomorphic {
        /// Expected shape
        shape_id: ShapeId,
        /// Location for that shape
        location: CachedLocation,
    },
    /// Several shapes seen
    Polymorphic {
        /// Entries in use
        count: u8,
        /// (shape, location) pairs
        entries: [(ShapeId, CachedLocation); POLYMORPHIC_ENTRIES],
    },
    /// Too many shapes, always take the slow path
    Megamorphic,
}

impl CacheState {
    fn probe(&self, shape_id: ShapeId) -> Option<CachedLocation> {
        match self {
            Self::Monomorphic {
                shape_id: cached,
                location,
            } if *cached == shape_id => Some(*location),
            Self::Polymorphic { count, entries } => entries[..*count as usize]
                .iter()
                .find(|(cached, _)| *cached == shape_id)
                .map(|(_, location)| *location),
            _ => None,
        }
    }

    fn record(&mut self, shape_id: ShapeId, location: CachedLocation) {
        *self = match std::mem::take(self) {
            Self::Uninitialized => Self::Monomorphic { shape_id, location },
            Self::Monomorphic {
                shape_id: first,
                location: first_location,
            } => {
                if first == shape_id {
                    Self::Monomorphic { shape_id, location }
                } else {
                    let mut entries = [(first, first_location); POLYMORPHIC_ENTRIES];
                    entries[1] = (shape_id, location);
                    Self::Polymorphic { count: 2, entries }
                }
            }
            Self::Polymorphic { count, mut entries } => {
                let used = count as usize;
                if entries[..used].iter().any(|(cached, _)| *cached == shape_id) {
                    Self::Polymorphic { count, entries }
                } else if used < POLYMORPHIC_ENTRIES {
                    entries[used] = (shape_id, location);
                    Self::Polymorphic {
                        count: count + 1,
                        entries,
                    }
                } else {
                    Self::Megamorphic
                }
            }
            Self::Megamorphic => Self::Megamorphic,
        };
    }
}

/// Per-site cache for reads and writes of one key
#[derive(Debug)]
pub struct PropertyCache {
    key: PropertyKey,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PropertyCache {
    /// Create an empty cache for `key`
    pub fn new(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(CacheState::Uninitialized),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cached key
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Current state
    pub fn state(&self) -> CacheState {
        self.state.lock().clone()
    }

    /// Fast-path accesses
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Slow-path accesses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn refresh(&self, obj: &ObjectRef) {
        let shape = obj.shape();
        let Some(location) = shape.lookup(&self.key).and_then(CachedLocation::of) else {
            return;
        };
        let mut state = self.state.lock();
        state.record(shape.id(), location);
        if *state == CacheState::Megamorphic {
            tracing::debug!(target: "otter::object", key = %self.key, "property cache is megamorphic");
        }
    }

    /// Read the key from `obj`
    pub fn get(&self, obj: &ObjectRef) -> ObjectResult<Value> {
        let shape_id = obj.shape_id();
        let cached = self.state.lock().probe(shape_id);
        match cached {
            Some(CachedLocation::Slot { index, .. }) => {
                if let Some(value) = obj.load_if_shape(shape_id, index) {
                    self.hit();
                    return Ok(value);
                }
            }
            Some(CachedLocation::Proxy(proxy)) => {
                self.hit();
                return proxy.get(obj);
            }
            None => {}
        }

        self.miss();
        self.refresh(obj);
        obj.get(&self.key)
    }

    /// Write `value` to the key on `obj`
    pub fn set(&self, obj: &ObjectRef, value: Value) -> ObjectResult<()> {
        let shape_id = obj.shape_id();
        let cached = self.state.lock().probe(shape_id);
        let mut value = value;
        if let Some(CachedLocation::Slot {
            index,
            writable: true,
            declared,
        }) = cached
            && declared.accepts(&value)
        {
            match obj.store_if_shape(shape_id, index, value) {
                Ok(()) => {
                    self.hit();
                    return Ok(());
                }
                Err(rejected) => value = rejected,
            }
        }

        self.miss();
        obj.set(self.key.clone(), value)?;
        self.refresh(obj);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::JsObject;

    fn object_with(keys: &[&str]) -> ObjectRef {
        let obj = JsObject::ordinary(None);
        for (i, key) in keys.iter().enumerate() {
            obj.set(PropertyKey::from(*key), Value::int32(i as i32)).unwrap();
        }
        obj
    }

    #[test]
    fn test_monomorphic_hit() {
        let cache = PropertyCache::new("ic_b");
        let obj = object_with(&["ic_a", "ic_b"]);
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));
        assert!(matches!(cache.state(), CacheState::Monomorphic { .. }));
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_stale_entry_after_delete_misses() {
        let cache = PropertyCache::new("ic_y");
        let obj = object_with(&["ic_x", "ic_y"]);
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));

        // ic_y moves from slot 1 to slot 0.
        assert!(obj.delete(&PropertyKey::from("ic_x")));
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));
        assert_eq!(cache.hits(), 0);

        assert!(obj.delete(&PropertyKey::from("ic_y")));
        assert!(cache.get(&obj).unwrap().is_undefined());
    }

    #[test]
    fn test_polymorphic_then_megamorphic() {
        let cache = PropertyCache::new("ic_k");
        let prefixes = ["p0", "p1", "p2", "p3", "p4"];
        for (n, prefix) in prefixes.iter().enumerate() {
            let obj = object_with(&[*prefix, "ic_k"]);
            cache.get(&obj).unwrap();
            match n {
                0 => assert!(matches!(cache.state(), CacheState::Monomorphic { .. })),
                1..=3 => assert!(matches!(cache.state(), CacheState::Polymorphic { .. })),
                _ => assert_eq!(cache.state(), CacheState::Megamorphic),
            }
        }
    }

    #[test]
    fn test_store_fast_path_respects_declared_type() {
        let cache = PropertyCache::new("ic_n");
        let obj = object_with(&["ic_n"]);
        cache.set(&obj, Value::int32(5)).unwrap();
        cache.set(&obj, Value::int32(6)).unwrap();
        assert_eq!(cache.hits(), 1);

        let int_shape = obj.shape_id();
        cache.set(&obj, Value::number(0.5)).unwrap();
        assert_ne!(obj.shape_id(), int_shape);
        assert_eq!(obj.get(&PropertyKey::from("ic_n")).unwrap(), Value::number(0.5));
    }

    #[test]
    fn test_read_only_slot_is_not_stored_through() {
        use crate::property::{PropertyAttributes, PropertyDescriptor};

        let obj = JsObject::ordinary(None);
        obj.define_property(
            PropertyKey::from("ic_ro"),
            PropertyDescriptor::data_with_attrs(Value::int32(1), PropertyAttributes::frozen()),
        )
        .unwrap();
        let cache = PropertyCache::new("ic_ro");
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));
        assert!(cache.set(&obj, Value::int32(2)).is_err());
        assert_eq!(cache.get(&obj).unwrap(), Value::int32(1));
    }
}
