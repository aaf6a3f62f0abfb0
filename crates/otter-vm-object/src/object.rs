//! Objects with hidden classes (shapes)
//!
//! A [`JsObject`] is a shape reference plus raw slot storage. The shape says
//! which properties exist and which slot holds each value; the storage is a
//! fixed inline array followed by an overflow vector. Shape and storage are
//! only ever replaced together, under the object's write lock, so a reader
//! that sees a shape also sees storage wide enough for it.
//!
//! Engine-private state (function data, bound targets, generator
//! activations) does not live in properties. It is kept in a per-kind
//! [`InternalSlots`] table fixed at allocation time.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bound_function::BoundFunctionSlots;
use crate::error::{ObjectError, ObjectResult};
use crate::function::{self, FunctionSlots};
use crate::generator::GeneratorSlots;
use crate::property::{
    Property, PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyLocation, ProxyProperty,
    StorageType,
};
use crate::shape::{ObjectClass, Shape, ShapeId};
use crate::value::Value;

/// Shared reference to an object
pub type ObjectRef = Arc<JsObject>;

/// Slots stored directly in the object before spilling to the overflow vector
pub const INLINE_SLOT_COUNT: usize = 4;

struct SlotStorage {
    inline: [Value; INLINE_SLOT_COUNT],
    overflow: Vec<Value>,
}

impl SlotStorage {
    fn new(slot_count: u32) -> Self {
        let mut storage = Self {
            inline: std::array::from_fn(|_| Value::Undefined),
            overflow: Vec::new(),
        };
        storage.ensure(slot_count);
        storage
    }

    fn ensure(&mut self, slot_count: u32) {
        let overflow = (slot_count as usize).saturating_sub(INLINE_SLOT_COUNT);
        if overflow > self.overflow.len() {
            self.overflow.resize(overflow, Value::Undefined);
        }
    }

    fn get(&self, index: u32) -> &Value {
        let index = index as usize;
        if index < INLINE_SLOT_COUNT {
            &self.inline[index]
        } else {
            &self.overflow[index - INLINE_SLOT_COUNT]
        }
    }

    fn slot_mut(&mut self, index: u32) -> &mut Value {
        let index = index as usize;
        if index < INLINE_SLOT_COUNT {
            &mut self.inline[index]
        } else {
            &mut self.overflow[index - INLINE_SLOT_COUNT]
        }
    }

    fn set(&mut self, index: u32, value: Value) {
        *self.slot_mut(index) = value;
    }

    fn take(&mut self, index: u32) -> Value {
        std::mem::take(self.slot_mut(index))
    }
}

struct ObjectState {
    shape: Arc<Shape>,
    storage: SlotStorage,
    prototype: Option<ObjectRef>,
    extensible: bool,
}

impl ObjectState {
    /// Swap in a shape that only appends to the current one.
    fn grow(&mut self, shape: Arc<Shape>) {
        self.storage.ensure(shape.slot_count());
        self.shape = shape;
    }

    /// Swap in an arbitrary shape, moving each surviving slot value to its
    /// new index. Properties whose location kind changed start out
    /// undefined.
    fn relayout(&mut self, shape: Arc<Shape>) {
        let mut storage = SlotStorage::new(shape.slot_count());
        for property in shape.properties() {
            let Some(to) = property.location.slot_index() else {
                continue;
            };
            let Some(old) = self.shape.lookup(&property.key) else {
                continue;
            };
            let Some(from) = old.location.slot_index() else {
                continue;
            };
            if old.location.slot_width() != property.location.slot_width() {
                continue;
            }
            for offset in 0..property.location.slot_width() {
                storage.set(to + offset, self.storage.take(from + offset));
            }
        }
        tracing::trace!(
            target: "otter::object",
            from = self.shape.id(),
            to = shape.id(),
            "object storage relayout"
        );
        self.storage = storage;
        self.shape = shape;
    }

    fn resolve(&self, property: &Property) -> Resolved {
        match property.location {
            PropertyLocation::Inline { index, .. } => Resolved::Data(self.storage.get(index).clone()),
            PropertyLocation::Proxy(proxy) => Resolved::Proxy(proxy),
            PropertyLocation::Accessor { index } => Resolved::Accessor {
                get: self.storage.get(index).clone(),
                set: self.storage.get(index + 1).clone(),
            },
        }
    }

    fn write_descriptor(&mut self, key: &PropertyKey, descriptor: PropertyDescriptor) {
        let Some(location) = self.shape.lookup(key).map(|p| p.location) else {
            return;
        };
        match (location, descriptor) {
            (PropertyLocation::Inline { index, .. }, PropertyDescriptor::Data { value, .. }) => {
                self.storage.set(index, value);
            }
            (PropertyLocation::Accessor { index }, PropertyDescriptor::Accessor { get, set, .. }) => {
                self.storage.set(index, get.unwrap_or_default());
                self.storage.set(index + 1, set.unwrap_or_default());
            }
            _ => {}
        }
    }
}

/// Snapshot of one own property, taken under the read lock
enum Resolved {
    Data(Value),
    Proxy(ProxyProperty),
    Accessor { get: Value, set: Value },
}

fn location_for(descriptor: &PropertyDescriptor) -> PropertyLocation {
    match descriptor {
        PropertyDescriptor::Data { value, .. } => PropertyLocation::Inline {
            index: 0,
            declared: StorageType::of(value),
        },
        PropertyDescriptor::Accessor { .. } => PropertyLocation::Accessor { index: 0 },
    }
}

/// Engine-private per-kind state
pub enum InternalSlots {
    /// Plain and arguments objects
    None,
    /// Function objects
    Function(FunctionSlots),
    /// Bound function objects
    BoundFunction(BoundFunctionSlots),
    /// Generator and async activation objects
    Generator(GeneratorSlots),
}

/// A JavaScript object
///
/// Thread-safe with interior mutability.
pub struct JsObject {
    state: RwLock<ObjectState>,
    slots: InternalSlots,
}

impl JsObject {
    /// Create an object bound to `shape` with undefined storage
    pub fn create(shape: Arc<Shape>, prototype: Option<ObjectRef>) -> ObjectRef {
        Self::with_internal_slots(shape, prototype, InternalSlots::None)
    }

    /// Create a new empty plain object
    pub fn ordinary(prototype: Option<ObjectRef>) -> ObjectRef {
        Self::create(Shape::empty(ObjectClass::Ordinary), prototype)
    }

    pub(crate) fn with_internal_slots(
        shape: Arc<Shape>,
        prototype: Option<ObjectRef>,
        slots: InternalSlots,
    ) -> ObjectRef {
        let storage = SlotStorage::new(shape.slot_count());
        Arc::new(Self {
            state: RwLock::new(ObjectState {
                shape,
                storage,
                prototype,
                extensible: true,
            }),
            slots,
        })
    }

    /// Initialize storage slots in order, starting at slot 0.
    pub(crate) fn fill_slots(&self, values: impl IntoIterator<Item = Value>) {
        let mut state = self.state.write();
        let slot_count = state.shape.slot_count();
        for (index, value) in (0..slot_count).zip(values) {
            state.storage.set(index, value);
        }
    }

    /// Current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.state.read().shape)
    }

    /// Identity of the current shape
    pub fn shape_id(&self) -> ShapeId {
        self.state.read().shape.id()
    }

    /// Object class
    pub fn class(&self) -> ObjectClass {
        self.state.read().shape.class()
    }

    /// Engine-private slots
    pub fn internal_slots(&self) -> &InternalSlots {
        &self.slots
    }

    /// Function slots of function and bound function objects
    pub fn function_slots(&self) -> Option<&FunctionSlots> {
        match &self.slots {
            InternalSlots::Function(slots) => Some(slots),
            InternalSlots::BoundFunction(bound) => Some(bound.function()),
            _ => None,
        }
    }

    /// Slots of bound function objects
    pub fn bound_function_slots(&self) -> Option<&BoundFunctionSlots> {
        match &self.slots {
            InternalSlots::BoundFunction(bound) => Some(bound),
            _ => None,
        }
    }

    /// Slots of generator objects
    pub fn generator_slots(&self) -> Option<&GeneratorSlots> {
        match &self.slots {
            InternalSlots::Generator(slots) => Some(slots),
            _ => None,
        }
    }

    /// Check if the object has call behaviour
    pub fn is_callable(&self) -> bool {
        self.function_slots().is_some()
    }

    /// Get property by key, walking the prototype chain
    pub fn get(self: &Arc<Self>, key: &PropertyKey) -> ObjectResult<Value> {
        self.get_with_receiver(key, &Value::Object(Arc::clone(self)))
    }

    /// Get property by key with an explicit receiver for accessor calls
    pub fn get_with_receiver(self: &Arc<Self>, key: &PropertyKey, receiver: &Value) -> ObjectResult<Value> {
        let mut holder = Arc::clone(self);
        loop {
            let (found, next) = {
                let state = holder.state.read();
                match state.shape.lookup(key) {
                    Some(property) => (Some(state.resolve(property)), None),
                    None => (None, state.prototype.clone()),
                }
            };
            match found {
                Some(Resolved::Data(value)) => return Ok(value),
                Some(Resolved::Proxy(proxy)) => return proxy.get(&holder),
                Some(Resolved::Accessor { get, .. }) => {
                    return match get.as_object() {
                        Some(getter) => function::call(getter, receiver.clone(), &[]),
                        None => Ok(Value::Undefined),
                    };
                }
                None => match next {
                    Some(proto) => holder = proto,
                    None => return Ok(Value::Undefined),
                },
            }
        }
    }

    /// Own property descriptor. Proxy values are computed.
    pub fn get_own_property(self: &Arc<Self>, key: &PropertyKey) -> ObjectResult<Option<PropertyDescriptor>> {
        let (resolved, attributes) = {
            let state = self.state.read();
            match state.shape.lookup(key) {
                Some(property) => (state.resolve(property), property.attributes),
                None => return Ok(None),
            }
        };
        let descriptor = match resolved {
            Resolved::Data(value) => PropertyDescriptor::Data { value, attributes },
            Resolved::Proxy(proxy) => PropertyDescriptor::Data {
                value: proxy.get(self)?,
                attributes,
            },
            Resolved::Accessor { get, set } => PropertyDescriptor::Accessor {
                get: Some(get).filter(|v| !v.is_undefined()),
                set: Some(set).filter(|v| !v.is_undefined()),
                attributes,
            },
        };
        Ok(Some(descriptor))
    }

    /// Set property by key
    pub fn set(self: &Arc<Self>, key: PropertyKey, value: Value) -> ObjectResult<()> {
        {
            let mut state = self.state.write();
            if let Some(property) = state.shape.lookup(&key).cloned() {
                match property.location {
                    PropertyLocation::Inline { index, declared } => {
                        if !property.attributes.writable {
                            return Err(ObjectError::ImmutabilityViolation(key));
                        }
                        let mut index = index;
                        if !declared.accepts(&value) {
                            let generalized = Property {
                                location: PropertyLocation::Inline {
                                    index,
                                    declared: declared.generalize(StorageType::of(&value)),
                                },
                                ..property
                            };
                            let shape = state.shape.replace_property(generalized);
                            state.relayout(shape);
                            index = state
                                .shape
                                .lookup(&key)
                                .and_then(|p| p.location.slot_index())
                                .unwrap_or(index);
                        }
                        state.storage.set(index, value);
                        return Ok(());
                    }
                    PropertyLocation::Proxy(proxy) => {
                        drop(state);
                        if (proxy.has_setter() || property.attributes.writable) && proxy.set(self, value)? {
                            return Ok(());
                        }
                        return Err(ObjectError::ImmutabilityViolation(key));
                    }
                    PropertyLocation::Accessor { index } => {
                        let setter = state.storage.get(index + 1).clone();
                        drop(state);
                        return self.call_setter(key, &setter, Value::Object(Arc::clone(self)), value);
                    }
                }
            }
        }

        if self.set_inherited(&key, &value)? {
            return Ok(());
        }

        let mut state = self.state.write();
        if state.shape.lookup(&key).is_some() {
            // Added concurrently since the first lookup.
            drop(state);
            return self.set(key, value);
        }
        if !state.extensible {
            return Err(ObjectError::type_error(format!(
                "Cannot add property {key}, object is not extensible"
            )));
        }
        let shape = state
            .shape
            .add_data_property(key, PropertyAttributes::data(), StorageType::of(&value));
        let index = shape.properties()[shape.property_count() - 1]
            .location
            .slot_index()
            .unwrap_or_default();
        state.grow(shape);
        state.storage.set(index, value);
        Ok(())
    }

    /// Handle an assignment to a key this object does not own. Returns
    /// `true` when an inherited setter consumed it.
    fn set_inherited(self: &Arc<Self>, key: &PropertyKey, value: &Value) -> ObjectResult<bool> {
        let mut next = self.prototype();
        while let Some(holder) = next.take() {
            let found = {
                let state = holder.state.read();
                match state.shape.lookup(key) {
                    Some(property) => Some((property.attributes, state.resolve(property))),
                    None => {
                        next = state.prototype.clone();
                        None
                    }
                }
            };
            let Some((attributes, resolved)) = found else {
                continue;
            };
            return match resolved {
                Resolved::Proxy(proxy) if proxy.has_setter() => proxy.set(&holder, value.clone()),
                Resolved::Data(_) | Resolved::Proxy(_) if !attributes.writable => {
                    Err(ObjectError::ImmutabilityViolation(key.clone()))
                }
                Resolved::Data(_) | Resolved::Proxy(_) => Ok(false),
                Resolved::Accessor { set, .. } => self
                    .call_setter(key.clone(), &set, Value::Object(Arc::clone(self)), value.clone())
                    .map(|()| true),
            };
        }
        Ok(false)
    }

    fn call_setter(&self, key: PropertyKey, setter: &Value, receiver: Value, value: Value) -> ObjectResult<()> {
        match setter.as_object() {
            Some(setter) => function::call(setter, receiver, &[value]).map(|_| ()),
            None => Err(ObjectError::ImmutabilityViolation(key)),
        }
    }

    /// Define or redefine an own property
    pub fn define_property(self: &Arc<Self>, key: PropertyKey, descriptor: PropertyDescriptor) -> ObjectResult<()> {
        let mut state = self.state.write();
        let attributes = descriptor.attributes();
        let Some(existing) = state.shape.lookup(&key).cloned() else {
            if !state.extensible {
                return Err(ObjectError::type_error(format!(
                    "Cannot define property {key}, object is not extensible"
                )));
            }
            let property = Property::new(key.clone(), attributes, location_for(&descriptor));
            let shape = state.shape.add_property(property);
            state.grow(shape);
            state.write_descriptor(&key, descriptor);
            return Ok(());
        };

        if !existing.attributes.configurable {
            let updatable = existing.attributes.writable
                && existing.attributes == attributes
                && !existing.is_accessor()
                && matches!(descriptor, PropertyDescriptor::Data { .. });
            if !updatable {
                return Err(ObjectError::type_error(format!("Cannot redefine property: {key}")));
            }
            drop(state);
            let PropertyDescriptor::Data { value, .. } = descriptor else {
                return Ok(());
            };
            return self.set(key, value);
        }

        let property = Property::new(key.clone(), attributes, location_for(&descriptor));
        let shape = state.shape.replace_property(property);
        state.relayout(shape);
        state.write_descriptor(&key, descriptor);
        Ok(())
    }

    /// Delete an own property. Returns `false` for non-configurable keys.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut state = self.state.write();
        let Some(property) = state.shape.lookup(key) else {
            return true;
        };
        if !property.attributes.configurable {
            return false;
        }
        let shape = state.shape.remove_property(key);
        state.relayout(shape);
        true
    }

    /// Check if object has own property
    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.state.read().shape.lookup(key).is_some()
    }

    /// Check if object has property (including prototype chain)
    pub fn has_property(&self, key: &PropertyKey) -> bool {
        if self.has_own_property(key) {
            return true;
        }
        let mut next = self.prototype();
        while let Some(holder) = next {
            if holder.has_own_property(key) {
                return true;
            }
            next = holder.prototype();
        }
        false
    }

    /// Own keys: strings in insertion order, then symbols
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let state = self.state.read();
        let (mut strings, symbols): (Vec<_>, Vec<_>) =
            state.shape.keys().cloned().partition(PropertyKey::is_string);
        strings.extend(symbols);
        strings
    }

    /// Enumerable own string keys in insertion order
    pub fn enumerable_own_keys(&self) -> Vec<PropertyKey> {
        let state = self.state.read();
        state
            .shape
            .properties()
            .iter()
            .filter(|p| p.attributes.enumerable && p.key.is_string())
            .map(|p| p.key.clone())
            .collect()
    }

    /// Get prototype
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.state.read().prototype.clone()
    }

    /// Replace the prototype. Fails on non-extensible objects and cycles.
    pub fn set_prototype(self: &Arc<Self>, prototype: Option<ObjectRef>) -> bool {
        let mut next = prototype.clone();
        while let Some(candidate) = next {
            if Arc::ptr_eq(&candidate, self) {
                return false;
            }
            next = candidate.prototype();
        }
        let mut state = self.state.write();
        let unchanged = match (&state.prototype, &prototype) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return true;
        }
        if !state.extensible {
            return false;
        }
        state.prototype = prototype;
        true
    }

    /// Forbid adding new properties
    pub fn prevent_extensions(&self) {
        self.state.write().extensible = false;
    }

    /// Check if new properties can be added
    pub fn is_extensible(&self) -> bool {
        self.state.read().extensible
    }

    /// Read slot `index` if the object still has shape `expected`.
    pub(crate) fn load_if_shape(&self, expected: ShapeId, index: u32) -> Option<Value> {
        let state = self.state.read();
        (state.shape.id() == expected).then(|| state.storage.get(index).clone())
    }

    /// Write slot `index` if the object still has shape `expected`.
    /// Hands the value back on mismatch.
    pub(crate) fn store_if_shape(&self, expected: ShapeId, index: u32, value: Value) -> Result<(), Value> {
        let mut state = self.state.write();
        if state.shape.id() != expected {
            return Err(value);
        }
        state.storage.set(index, value);
        Ok(())
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("JsObject")
            .field("class", &state.shape.class())
            .field("shape", &state.shape.id())
            .field("properties", &state.shape.property_count())
            .finish()
    }
}
