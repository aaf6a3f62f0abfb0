//! Hidden Classes (Shapes) for property access optimization.
//!
//! A Shape represents the structure of an object: its class, which
//! properties it has, in which order, and where each value is stored.
//! Shapes are immutable and shared between objects with the same structure
//! through a process-wide transition tree: adding the same property to the
//! same shape always yields the same successor `Arc<Shape>`.
//!
//! Removing or redefining a property does not walk backwards. The shape for
//! the resulting property list is rebuilt from the class root through the
//! same memoized transitions, so two objects whose property lists are equal
//! always share a shape, however they got there.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::property::{
    Property, PropertyAttributes, PropertyKey, PropertyLocation, ProxyProperty, StorageType,
};

/// Unique shape identity. Never reused.
pub type ShapeId = u64;

/// Object kind a shape belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// Plain object
    Ordinary,
    /// Ordinary or async function
    Function,
    /// `function*`
    GeneratorFunction,
    /// `async function*`
    AsyncGeneratorFunction,
    /// Result of `bind`
    BoundFunction,
    /// Generator instance
    Generator,
    /// Async generator instance
    AsyncGenerator,
    /// Suspended async function activation
    AsyncActivation,
    /// Arguments object
    Arguments,
}

impl ObjectClass {
    /// Class name as reported by `Object.prototype.toString`
    pub fn name(self) -> &'static str {
        match self {
            Self::Ordinary => "Object",
            Self::Function | Self::BoundFunction => "Function",
            Self::GeneratorFunction => "GeneratorFunction",
            Self::AsyncGeneratorFunction => "AsyncGeneratorFunction",
            Self::Generator => "Generator",
            Self::AsyncGenerator => "AsyncGenerator",
            Self::AsyncActivation => "AsyncFunction",
            Self::Arguments => "Arguments",
        }
    }

    /// Whether objects of this class have call behaviour
    pub fn is_function(self) -> bool {
        matches!(
            self,
            Self::Function | Self::GeneratorFunction | Self::AsyncGeneratorFunction | Self::BoundFunction
        )
    }
}

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: ShapeId,

    class: ObjectClass,

    /// The shape this one was transitioned from. Diagnostics only.
    parent: Option<Weak<Shape>>,

    /// Own properties in insertion order.
    properties: Vec<Property>,

    /// Key -> position in `properties`, built once at creation.
    property_map: FxHashMap<PropertyKey, usize>,

    /// Storage slots required by instances of this shape.
    slot_count: u32,
}

impl Shape {
    fn root(id: ShapeId, class: ObjectClass) -> Self {
        Self {
            id,
            class,
            parent: None,
            properties: Vec::new(),
            property_map: FxHashMap::default(),
            slot_count: 0,
        }
    }

    fn extend(self: &Arc<Self>, id: ShapeId, property: Property) -> Self {
        let mut properties = Vec::with_capacity(self.properties.len() + 1);
        properties.extend(self.properties.iter().cloned());
        let mut property_map = self.property_map.clone();
        property_map.insert(property.key.clone(), properties.len());
        let slot_count = self.slot_count + property.location.slot_width();
        properties.push(property);

        Self {
            id,
            class: self.class,
            parent: Some(Arc::downgrade(self)),
            properties,
            property_map,
            slot_count,
        }
    }

    /// The canonical zero-property shape for `class`.
    pub fn empty(class: ObjectClass) -> Arc<Self> {
        ShapeTree::global().root(class)
    }

    /// Successor shape with `property` appended.
    ///
    /// Slot locations are moved to this shape's next free slot before the
    /// transition lookup. Adding a key that is already present is a change
    /// of that property, see [`Shape::replace_property`].
    pub fn add_property(self: &Arc<Self>, property: Property) -> Arc<Self> {
        if self.property_map.contains_key(&property.key) {
            return self.replace_property(property);
        }
        let property = Property {
            location: property.location.at_slot(self.slot_count),
            ..property
        };
        ShapeTree::global().transition(self, property)
    }

    /// Append a data property stored in the next free slot.
    pub fn add_data_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        attributes: PropertyAttributes,
        declared: StorageType,
    ) -> Arc<Self> {
        let location = PropertyLocation::Inline {
            index: self.slot_count,
            declared,
        };
        self.add_property(Property::new(key.into(), attributes, location))
    }

    /// Append an engine-computed property. Uses no storage.
    pub fn add_proxy_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        proxy: ProxyProperty,
        attributes: PropertyAttributes,
    ) -> Arc<Self> {
        self.add_property(Property::proxy(key, proxy, attributes))
    }

    /// Append a getter/setter pair stored in the next two slots.
    pub fn add_accessor_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        attributes: PropertyAttributes,
    ) -> Arc<Self> {
        let location = PropertyLocation::Accessor {
            index: self.slot_count,
        };
        self.add_property(Property::new(key.into(), attributes, location))
    }

    /// Canonical shape for this property list without `key`.
    pub fn remove_property(self: &Arc<Self>, key: &PropertyKey) -> Arc<Self> {
        let Some(&position) = self.property_map.get(key) else {
            return Arc::clone(self);
        };
        let remaining = self
            .properties
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, p)| p.clone());
        Self::rebuild(self.class, remaining)
    }

    /// Canonical shape with the property of the same key swapped for
    /// `property`, keeping its position. Appends if the key is absent.
    pub fn replace_property(self: &Arc<Self>, property: Property) -> Arc<Self> {
        let Some(&position) = self.property_map.get(&property.key) else {
            return self.add_property(property);
        };
        let current = &self.properties[position];
        if current.attributes == property.attributes
            && current.location.at_slot(0) == property.location.at_slot(0)
        {
            return Arc::clone(self);
        }
        let replaced = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| if i == position { property.clone() } else { p.clone() });
        Self::rebuild(self.class, replaced)
    }

    fn rebuild(class: ObjectClass, properties: impl Iterator<Item = Property>) -> Arc<Self> {
        properties.fold(Self::empty(class), |shape, property| shape.add_property(property))
    }

    /// Look up an own property by key.
    pub fn lookup(&self, key: &PropertyKey) -> Option<&Property> {
        self.property_map.get(key).map(|&i| &self.properties[i])
    }

    /// Insertion position of `key`.
    pub fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.property_map.get(key).copied()
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> + '_ {
        self.properties.iter().map(|p| &p.key)
    }

    /// Shape identity.
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Object class of instances.
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// The shape this one was transitioned from, while it is alive.
    pub fn parent(&self) -> Option<Arc<Shape>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Storage slots needed by instances.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Get the number of properties defined in this shape.
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("property_count", &self.property_count())
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

static SHAPE_TREE: LazyLock<ShapeTree> = LazyLock::new(ShapeTree::new);

/// Process-wide shape transition tree.
///
/// Maps (shape id, property) to the successor shape. Entries are never
/// evicted. Insertion goes through the map's entry API, so two threads
/// adding the same property to the same shape get one shared successor.
pub struct ShapeTree {
    roots: DashMap<ObjectClass, Arc<Shape>, FxBuildHasher>,
    transitions: DashMap<(ShapeId, Property), Arc<Shape>, FxBuildHasher>,
    next_id: AtomicU64,
}

impl ShapeTree {
    fn new() -> Self {
        Self {
            roots: DashMap::with_hasher(FxBuildHasher),
            transitions: DashMap::with_hasher(FxBuildHasher),
            next_id: AtomicU64::new(1),
        }
    }

    /// The shared tree.
    pub fn global() -> &'static ShapeTree {
        &SHAPE_TREE
    }

    fn allocate_id(&self) -> ShapeId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Root shape of `class`.
    pub fn root(&self, class: ObjectClass) -> Arc<Shape> {
        if let Some(root) = self.roots.get(&class) {
            return Arc::clone(root.value());
        }
        let root = self
            .roots
            .entry(class)
            .or_insert_with(|| Arc::new(Shape::root(self.allocate_id(), class)));
        Arc::clone(root.value())
    }

    /// Find the transition for `property`, or create it.
    pub fn transition(&self, from: &Arc<Shape>, property: Property) -> Arc<Shape> {
        let key = (from.id, property);
        if let Some(existing) = self.transitions.get(&key) {
            return Arc::clone(existing.value());
        }

        match self.transitions.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let property = entry.key().1.clone();
                let shape = Arc::new(from.extend(self.allocate_id(), property));
                tracing::trace!(
                    target: "otter::shape",
                    from = from.id,
                    to = shape.id,
                    class = ?shape.class,
                    key = %shape.properties[shape.properties.len() - 1].key,
                    "shape transition created"
                );
                entry.insert(Arc::clone(&shape));
                shape
            }
        }
    }

    /// Number of memoized transitions.
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}
