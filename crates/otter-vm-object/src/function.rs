//! Function data and function objects
//!
//! [`FunctionData`] is the immutable description shared by every closure of
//! one declaration. A function object is a [`JsObject`] whose internal slots
//! hold that data, the captured enclosing state, the lazily created class
//! prototype and the owning realm. `length` and `name` are proxy
//! properties that read through to the data, so they never drift from the
//! callable they describe.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;

use crate::error::{ObjectError, ObjectResult};
use crate::generator::{self, ResumableBlock};
use crate::object::{InternalSlots, JsObject, ObjectRef};
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey, ProxyProperty};
use crate::realm::{Realm, RealmConfig};
use crate::shape::{ObjectClass, Shape};
use crate::value::Value;

/// Everything a compiled body receives for one invocation
#[derive(Debug, Clone)]
pub struct ArgumentBundle {
    /// Receiver
    pub this: Value,
    /// The function being invoked
    pub callee: ObjectRef,
    /// Positional arguments
    pub arguments: Vec<Value>,
    /// `new.target` for construct calls
    pub new_target: Option<ObjectRef>,
}

impl ArgumentBundle {
    /// Argument at `index`, `undefined` when missing
    pub fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    /// Whether this is a construct call
    pub fn is_construct(&self) -> bool {
        self.new_target.is_some()
    }
}

/// Opaque handle to a compiled body
pub type CallTarget = Arc<dyn Fn(ArgumentBundle) -> ObjectResult<Value> + Send + Sync>;

/// Wrap a closure as a [`CallTarget`]
pub fn native<F>(f: F) -> CallTarget
where
    F: Fn(ArgumentBundle) -> ObjectResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Captured enclosing state, opaque to the object model
pub type Captured = Arc<dyn Any + Send + Sync>;

/// Compiled body of a function
#[derive(Clone)]
pub enum FunctionBody {
    /// Runs to completion on every call
    Native(CallTarget),
    /// Statement block that can be suspended and resumed
    Resumable(Arc<ResumableBlock>),
}

impl std::fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Resumable(block) => f.debug_tuple("Resumable").field(block).finish(),
        }
    }
}

/// Function kind and mode flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// Strict mode code
    pub strict: bool,
    /// Has `[[Construct]]`
    pub constructor: bool,
    /// `function*`
    pub generator: bool,
    /// `async`
    pub is_async: bool,
    /// Result of `bind`
    pub bound: bool,
    /// Arrow function: `this` is fixed at creation
    pub lexical_this: bool,
    /// `class` constructor: construct only, read-only `prototype`
    pub class_constructor: bool,
}

impl FunctionFlags {
    /// Sloppy, call-only function
    pub const fn new() -> Self {
        Self {
            strict: false,
            constructor: false,
            generator: false,
            is_async: false,
            bound: false,
            lexical_this: false,
            class_constructor: false,
        }
    }

    /// Set strict mode
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set constructor
    pub const fn with_constructor(mut self, constructor: bool) -> Self {
        self.constructor = constructor;
        self
    }

    /// Set generator
    pub const fn with_generator(mut self, generator: bool) -> Self {
        self.generator = generator;
        self
    }

    /// Set async
    pub const fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Set bound
    pub const fn with_bound(mut self, bound: bool) -> Self {
        self.bound = bound;
        self
    }

    /// Set lexical `this`
    pub const fn with_lexical_this(mut self, lexical_this: bool) -> Self {
        self.lexical_this = lexical_this;
        self
    }

    /// Set class constructor. Implies strict and constructor.
    pub const fn with_class_constructor(mut self, class_constructor: bool) -> Self {
        self.class_constructor = class_constructor;
        if class_constructor {
            self.strict = true;
            self.constructor = true;
        }
        self
    }
}

/// Immutable, shared description of a function
pub struct FunctionData {
    body: FunctionBody,
    construct_body: Option<CallTarget>,
    length: u32,
    name: Arc<str>,
    flags: FunctionFlags,
}

impl FunctionData {
    /// Create and validate function data
    pub fn new(
        body: FunctionBody,
        construct_body: Option<CallTarget>,
        length: u32,
        name: &str,
        flags: FunctionFlags,
    ) -> ObjectResult<Arc<Self>> {
        let resumable = matches!(body, FunctionBody::Resumable(_));
        let invalid = |msg: &str| Err(ObjectError::InvalidFunctionData(format!("{name}: {msg}")));

        if flags.bound && flags.generator {
            return invalid("bound functions cannot be generators");
        }
        if (flags.generator || (flags.is_async && !flags.bound)) && !resumable {
            return invalid("generator and async functions need a resumable body");
        }
        if resumable && !(flags.generator || flags.is_async) {
            return invalid("resumable body on a plain function");
        }
        if flags.generator && (flags.constructor || construct_body.is_some()) {
            return invalid("generators cannot be constructors");
        }
        if flags.is_async && !flags.bound && flags.constructor {
            return invalid("async functions cannot be constructors");
        }
        if construct_body.is_some() && !flags.constructor {
            return invalid("construct body without the constructor flag");
        }
        if flags.lexical_this && (flags.constructor || flags.generator) {
            return invalid("arrow functions cannot be constructors or generators");
        }
        if flags.class_constructor
            && (!flags.constructor || !flags.strict || flags.generator || flags.is_async || flags.bound)
        {
            return invalid("class constructor must be a strict synchronous constructor");
        }

        Ok(Arc::new(Self {
            body,
            construct_body,
            length,
            name: Arc::from(name),
            flags,
        }))
    }

    /// Sloppy, call-only native function
    pub fn call_only(name: &str, length: u32, target: CallTarget) -> Arc<Self> {
        Arc::new(Self {
            body: FunctionBody::Native(target),
            construct_body: None,
            length,
            name: Arc::from(name),
            flags: FunctionFlags::new(),
        })
    }

    /// Sloppy native function that can also be constructed
    pub fn constructor(name: &str, length: u32, target: CallTarget) -> Arc<Self> {
        Arc::new(Self {
            body: FunctionBody::Native(target),
            construct_body: None,
            length,
            name: Arc::from(name),
            flags: FunctionFlags::new().with_constructor(true),
        })
    }

    /// `function*` with the given body
    pub fn generator(name: &str, length: u32, block: Arc<ResumableBlock>) -> Arc<Self> {
        Arc::new(Self {
            body: FunctionBody::Resumable(block),
            construct_body: None,
            length,
            name: Arc::from(name),
            flags: FunctionFlags::new().with_generator(true),
        })
    }

    /// Record for bound functions. Named "bound"; the visible name and
    /// length come from the proxies.
    pub(crate) fn bound(call: CallTarget, construct: Option<CallTarget>, length: u32, is_async: bool) -> Arc<Self> {
        let flags = FunctionFlags::new()
            .with_bound(true)
            .with_strict(true)
            .with_constructor(construct.is_some())
            .with_async(is_async);
        Arc::new(Self {
            body: FunctionBody::Native(call),
            construct_body: construct,
            length,
            name: Arc::from("bound"),
            flags,
        })
    }

    /// Call body
    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    /// Construct body, if separate from the call body
    pub fn construct_body(&self) -> Option<&CallTarget> {
        self.construct_body.as_ref()
    }

    /// Declared length
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Declared name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flags
    pub fn flags(&self) -> FunctionFlags {
        self.flags
    }

    fn class(&self) -> ObjectClass {
        match self.flags {
            FunctionFlags { bound: true, .. } => ObjectClass::BoundFunction,
            FunctionFlags {
                generator: true,
                is_async: true,
                ..
            } => ObjectClass::AsyncGeneratorFunction,
            FunctionFlags { generator: true, .. } => ObjectClass::GeneratorFunction,
            _ => ObjectClass::Function,
        }
    }
}

impl std::fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionData")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("flags", &self.flags)
            .field("body", &self.body)
            .field("has_construct_body", &self.construct_body.is_some())
            .finish()
    }
}

enum PrototypeState {
    Uninitialized,
    Computing,
    Value(Value),
}

/// Class prototype slot, created on first read
struct LazyPrototype {
    state: Mutex<PrototypeState>,
    ready: Condvar,
}

/// Internal slots of a function object
pub struct FunctionSlots {
    data: Arc<FunctionData>,
    captured: Option<Captured>,
    class_prototype: LazyPrototype,
    realm: Arc<Realm>,
}

impl FunctionSlots {
    pub(crate) fn new(data: Arc<FunctionData>, captured: Option<Captured>, realm: Arc<Realm>) -> Self {
        Self::with_prototype_state(data, captured, realm, PrototypeState::Uninitialized)
    }

    fn with_prototype_state(
        data: Arc<FunctionData>,
        captured: Option<Captured>,
        realm: Arc<Realm>,
        state: PrototypeState,
    ) -> Self {
        Self {
            data,
            captured,
            class_prototype: LazyPrototype {
                state: Mutex::new(state),
                ready: Condvar::new(),
            },
            realm,
        }
    }

    /// Shared function data
    pub fn data(&self) -> &Arc<FunctionData> {
        &self.data
    }

    /// Captured enclosing state
    pub fn captured(&self) -> Option<&Captured> {
        self.captured.as_ref()
    }

    /// Captured state downcast to `T`
    pub fn captured_as<T: Any>(&self) -> Option<&T> {
        self.captured.as_deref().and_then(|c| c.downcast_ref::<T>())
    }

    /// Owning realm
    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// Whether the class prototype has been created or assigned
    pub fn has_class_prototype(&self) -> bool {
        !self.data.flags.lexical_this && matches!(*self.class_prototype.state.lock(), PrototypeState::Value(_))
    }

    /// Receiver captured by an arrow function. Shares the class prototype
    /// slot, which arrow functions never use.
    pub fn lexical_this(&self) -> Option<Value> {
        if !self.data.flags.lexical_this {
            return None;
        }
        match &*self.class_prototype.state.lock() {
            PrototypeState::Value(this) => Some(this.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FunctionSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSlots")
            .field("data", &self.data)
            .field("realm", &self.realm.id())
            .finish()
    }
}

/// Initial shape of a function object for `data`.
pub(crate) fn initial_shape(data: &FunctionData, config: &RealmConfig) -> Arc<Shape> {
    let meta = PropertyAttributes::configurable_not_enumerable_not_writable();
    let prototype = PropertyAttributes::not_configurable_not_enumerable_writable();
    let flags = data.flags;
    let root = Shape::empty(data.class());

    if flags.bound {
        return root
            .add_proxy_property("length", ProxyProperty::FunctionLength, meta)
            .add_proxy_property("name", ProxyProperty::FunctionName, meta);
    }
    if flags.generator {
        return root
            .add_proxy_property("length", ProxyProperty::FunctionLength, meta)
            .add_proxy_property("prototype", ProxyProperty::ClassPrototype, prototype)
            .add_proxy_property("name", ProxyProperty::FunctionName, meta);
    }

    let mut shape = root.add_proxy_property("length", ProxyProperty::FunctionLength, meta);
    if flags.class_constructor {
        shape = shape.add_proxy_property("prototype", ProxyProperty::ClassPrototype, PropertyAttributes::frozen());
    }
    shape = shape.add_proxy_property("name", ProxyProperty::FunctionName, meta);
    if flags.constructor && !flags.class_constructor {
        shape = shape.add_proxy_property("prototype", ProxyProperty::ClassPrototype, prototype);
    }
    if !flags.strict && !flags.is_async && !flags.lexical_this && config.arguments_caller_proxies {
        shape = shape
            .add_proxy_property("arguments", ProxyProperty::Arguments, PropertyAttributes::frozen())
            .add_proxy_property("caller", ProxyProperty::Caller, PropertyAttributes::frozen());
    }
    shape
}

fn function_prototype_for(realm: &Realm, flags: FunctionFlags) -> ObjectRef {
    match flags {
        FunctionFlags {
            generator: true,
            is_async: true,
            ..
        } => Arc::clone(realm.async_generator_function_prototype()),
        FunctionFlags { generator: true, .. } => Arc::clone(realm.generator_function_prototype()),
        _ => Arc::clone(realm.function_prototype()),
    }
}

/// Create a function object
pub fn create(realm: &Arc<Realm>, data: Arc<FunctionData>, captured: Option<Captured>) -> ObjectRef {
    let shape = initial_shape(&data, realm.config());
    let prototype = function_prototype_for(realm, data.flags);
    tracing::trace!(
        target: "otter::function",
        name = data.name(),
        shape = shape.id(),
        "function object created"
    );
    let slots = FunctionSlots::new(data, captured, Arc::clone(realm));
    JsObject::with_internal_slots(shape, Some(prototype), InternalSlots::Function(slots))
}

/// Create an arrow function object whose calls always see `this`
pub fn create_lexical_this(
    realm: &Arc<Realm>,
    data: Arc<FunctionData>,
    captured: Option<Captured>,
    this: Value,
) -> ObjectResult<ObjectRef> {
    if !data.flags.lexical_this {
        return Err(ObjectError::InvalidFunctionData(format!(
            "{}: lexical this on a function with its own receiver",
            data.name()
        )));
    }
    let shape = initial_shape(&data, realm.config());
    let prototype = function_prototype_for(realm, data.flags);
    tracing::trace!(
        target: "otter::function",
        name = data.name(),
        shape = shape.id(),
        "arrow function created"
    );
    let slots = FunctionSlots::with_prototype_state(data, captured, Arc::clone(realm), PrototypeState::Value(this));
    Ok(JsObject::with_internal_slots(
        shape,
        Some(prototype),
        InternalSlots::Function(slots),
    ))
}

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter(limit: usize) -> ObjectResult<Self> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= limit {
                return Err(ObjectError::StackOverflow);
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn describe(f: &ObjectRef) -> String {
    match f.function_slots() {
        Some(_) => name_of(f),
        None => format!("[object {}]", f.class().name()),
    }
}

/// Call `f` with `this` and `args`
pub fn call(f: &ObjectRef, this: Value, args: &[Value]) -> ObjectResult<Value> {
    let Some(slots) = f.function_slots() else {
        return Err(ObjectError::NotCallable(describe(f)));
    };
    if slots.data.flags.class_constructor {
        return Err(ObjectError::type_error(format!(
            "Class constructor {} cannot be invoked without 'new'",
            slots.data.name()
        )));
    }
    let this = if slots.data.flags.lexical_this {
        slots.lexical_this().unwrap_or_default()
    } else {
        this
    };
    let _depth = DepthGuard::enter(slots.realm.config().max_call_depth)?;
    match &slots.data.body {
        FunctionBody::Native(target) => target(ArgumentBundle {
            this,
            callee: Arc::clone(f),
            arguments: args.to_vec(),
            new_target: None,
        }),
        FunctionBody::Resumable(block) => {
            generator::start(f, slots, Arc::clone(block), this, args).map(Value::Object)
        }
    }
}

/// Construct with `f`. `new_target` defaults to `f`.
pub fn construct(f: &ObjectRef, args: &[Value], new_target: Option<&ObjectRef>) -> ObjectResult<Value> {
    let Some(slots) = f.function_slots() else {
        return Err(ObjectError::NotConstructible(describe(f)));
    };
    if !slots.data.flags.constructor {
        return Err(ObjectError::NotConstructible(describe(f)));
    }
    let _depth = DepthGuard::enter(slots.realm.config().max_call_depth)?;
    let new_target = Arc::clone(new_target.unwrap_or(f));

    if let Some(target) = &slots.data.construct_body {
        return target(ArgumentBundle {
            this: Value::Undefined,
            callee: Arc::clone(f),
            arguments: args.to_vec(),
            new_target: Some(new_target),
        });
    }

    let FunctionBody::Native(target) = &slots.data.body else {
        return Err(ObjectError::NotConstructible(describe(f)));
    };
    let prototype = match new_target.get(&PropertyKey::from("prototype"))? {
        Value::Object(proto) => proto,
        _ => Arc::clone(slots.realm.object_prototype()),
    };
    let this = JsObject::ordinary(Some(prototype));
    let result = target(ArgumentBundle {
        this: Value::Object(Arc::clone(&this)),
        callee: Arc::clone(f),
        arguments: args.to_vec(),
        new_target: Some(new_target),
    })?;
    Ok(match result {
        Value::Object(obj) => Value::Object(obj),
        _ => Value::Object(this),
    })
}

/// Length as computed by the `length` proxy
pub fn length_of(f: &ObjectRef) -> u32 {
    if let Some(bound) = f.bound_function_slots() {
        let target = length_of(bound.target_function());
        let bound_args = u32::try_from(bound.bound_arguments().len()).unwrap_or(u32::MAX);
        return target.saturating_sub(bound_args);
    }
    f.function_slots().map_or(0, |slots| slots.data.length)
}

/// Name as computed by the `name` proxy
pub fn name_of(f: &ObjectRef) -> String {
    if let Some(bound) = f.bound_function_slots() {
        return format!("bound {}", name_of(bound.target_function()));
    }
    f.function_slots()
        .map(|slots| slots.data.name.to_string())
        .unwrap_or_default()
}

/// Read the class prototype, creating it on first use
pub fn class_prototype(f: &ObjectRef) -> ObjectResult<Value> {
    let Some(slots) = f.function_slots().filter(|slots| !slots.data.flags.lexical_this) else {
        return Ok(Value::Undefined);
    };
    let lazy = &slots.class_prototype;
    {
        let mut state = lazy.state.lock();
        loop {
            if let PrototypeState::Value(value) = &*state {
                return Ok(value.clone());
            }
            if !matches!(*state, PrototypeState::Computing) {
                break;
            }
            lazy.ready.wait(&mut state);
        }
        *state = PrototypeState::Computing;
    }

    let created = create_prototype(f, slots);

    let mut state = lazy.state.lock();
    let result = match created {
        Ok(prototype) => {
            // An explicit assignment made while computing wins.
            if matches!(*state, PrototypeState::Computing) {
                *state = PrototypeState::Value(Value::Object(prototype));
            }
            match &*state {
                PrototypeState::Value(value) => Ok(value.clone()),
                _ => Ok(Value::Undefined),
            }
        }
        Err(err) => {
            if matches!(*state, PrototypeState::Computing) {
                *state = PrototypeState::Uninitialized;
            }
            Err(err)
        }
    };
    lazy.ready.notify_all();
    result
}

fn create_prototype(f: &ObjectRef, slots: &FunctionSlots) -> ObjectResult<ObjectRef> {
    let realm = &slots.realm;
    let flags = slots.data.flags;
    let prototype = if flags.generator {
        let parent = if flags.is_async {
            realm.async_generator_prototype()
        } else {
            realm.generator_prototype()
        };
        JsObject::ordinary(Some(Arc::clone(parent)))
    } else {
        let prototype = JsObject::ordinary(Some(Arc::clone(realm.object_prototype())));
        prototype.define_property(
            PropertyKey::from("constructor"),
            PropertyDescriptor::data_with_attrs(Value::Object(Arc::clone(f)), PropertyAttributes::not_enumerable()),
        )?;
        prototype
    };
    tracing::debug!(
        target: "otter::function",
        name = slots.data.name(),
        generator = flags.generator,
        "class prototype materialized"
    );
    Ok(prototype)
}

/// Assign the class prototype. Suppresses lazy creation.
pub fn set_class_prototype(f: &ObjectRef, value: Value) -> ObjectResult<()> {
    let Some(slots) = f.function_slots().filter(|slots| !slots.data.flags.lexical_this) else {
        return Err(ObjectError::type_error("prototype slot on a non-function"));
    };
    let lazy = &slots.class_prototype;
    *lazy.state.lock() = PrototypeState::Value(value);
    lazy.ready.notify_all();
    Ok(())
}
