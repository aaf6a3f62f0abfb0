//! Realm registry and metadata.
//!
//! A realm supplies the canonical prototypes the object model parents new
//! objects to: plain objects, functions, generator functions, generator
//! instances and their async counterparts.

use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::object::{JsObject, ObjectRef};
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::value::Value;

/// Unique realm identifier.
pub type RealmId = u32;

/// Per-realm configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmConfig {
    /// Maximum nested `call`/`construct` depth
    pub max_call_depth: usize,
    /// Give sloppy functions `arguments`/`caller` properties
    pub arguments_caller_proxies: bool,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10000,
            arguments_caller_proxies: true,
        }
    }
}

/// A realm and its intrinsic prototypes
pub struct Realm {
    id: RealmId,
    config: RealmConfig,
    object_prototype: ObjectRef,
    function_prototype: ObjectRef,
    generator_function_prototype: ObjectRef,
    async_generator_function_prototype: ObjectRef,
    generator_prototype: ObjectRef,
    async_generator_prototype: ObjectRef,
}

impl Realm {
    /// Create a realm with fresh intrinsics
    pub fn new(id: RealmId, config: RealmConfig) -> Arc<Self> {
        let object_prototype = JsObject::ordinary(None);
        let function_prototype = JsObject::ordinary(Some(Arc::clone(&object_prototype)));
        let generator_prototype = JsObject::ordinary(Some(Arc::clone(&object_prototype)));
        let async_generator_prototype = JsObject::ordinary(Some(Arc::clone(&object_prototype)));
        let generator_function_prototype =
            intrinsic_function_prototype(&function_prototype, &generator_prototype);
        let async_generator_function_prototype =
            intrinsic_function_prototype(&function_prototype, &async_generator_prototype);

        tracing::debug!(target: "otter::object", realm = id, "realm created");
        Arc::new(Self {
            id,
            config,
            object_prototype,
            function_prototype,
            generator_function_prototype,
            async_generator_function_prototype,
            generator_prototype,
            async_generator_prototype,
        })
    }

    /// Realm id
    pub fn id(&self) -> RealmId {
        self.id
    }

    /// Configuration
    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Create a plain object inheriting from this realm's object prototype
    pub fn create_object(&self) -> ObjectRef {
        JsObject::ordinary(Some(Arc::clone(&self.object_prototype)))
    }

    /// `Object.prototype`
    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    /// `Function.prototype`
    pub fn function_prototype(&self) -> &ObjectRef {
        &self.function_prototype
    }

    /// `%GeneratorFunction.prototype%`
    pub fn generator_function_prototype(&self) -> &ObjectRef {
        &self.generator_function_prototype
    }

    /// `%AsyncGeneratorFunction.prototype%`
    pub fn async_generator_function_prototype(&self) -> &ObjectRef {
        &self.async_generator_function_prototype
    }

    /// `%GeneratorPrototype%`
    pub fn generator_prototype(&self) -> &ObjectRef {
        &self.generator_prototype
    }

    /// `%AsyncGeneratorPrototype%`
    pub fn async_generator_prototype(&self) -> &ObjectRef {
        &self.async_generator_prototype
    }
}

fn intrinsic_function_prototype(function_prototype: &ObjectRef, instance_prototype: &ObjectRef) -> ObjectRef {
    let prototype = JsObject::ordinary(Some(Arc::clone(function_prototype)));
    // Fresh extensible object without the key, so this cannot fail.
    let _ = prototype.define_property(
        PropertyKey::from("prototype"),
        PropertyDescriptor::data_with_attrs(
            Value::Object(Arc::clone(instance_prototype)),
            PropertyAttributes::configurable_not_enumerable_not_writable(),
        ),
    );
    prototype
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

/// Registry of all realms created by a runtime.
pub struct RealmRegistry {
    realms: RwLock<Vec<Arc<Realm>>>,
    next_id: AtomicU32,
}

impl RealmRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            realms: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(0),
        })
    }

    /// Allocate a new realm id.
    pub fn allocate_id(&self) -> RealmId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create and register a realm.
    pub fn create_realm(&self, config: RealmConfig) -> Arc<Realm> {
        let realm = Realm::new(self.allocate_id(), config);
        self.realms.write().push(Arc::clone(&realm));
        realm
    }

    /// Lookup a realm by id.
    pub fn get(&self, id: RealmId) -> Option<Arc<Realm>> {
        self.realms.read().iter().find(|r| r.id == id).cloned()
    }

    /// Remove a realm by id.
    pub fn remove(&self, id: RealmId) -> Option<Arc<Realm>> {
        let mut realms = self.realms.write();
        let pos = realms.iter().position(|r| r.id == id)?;
        Some(realms.swap_remove(pos))
    }

    /// Number of registered realms
    pub fn len(&self) -> usize {
        self.realms.read().len()
    }

    /// Whether no realm is registered
    pub fn is_empty(&self) -> bool {
        self.realms.read().is_empty()
    }
}
