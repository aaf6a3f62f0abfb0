//! Bound functions
//!
//! `bind` produces a function object of class `BoundFunction` whose
//! internal slots hold the target, the bound receiver and the bound
//! argument prefix. All bound functions share one of two static
//! [`FunctionData`] records; only async targets get a fresh one.

use std::sync::{Arc, LazyLock};

use crate::error::{ObjectError, ObjectResult};
use crate::function::{self, ArgumentBundle, FunctionData, FunctionSlots, native};
use crate::object::{InternalSlots, JsObject, ObjectRef};
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::value::Value;

static BOUND_CONSTRUCTOR: LazyLock<Arc<FunctionData>> =
    LazyLock::new(|| FunctionData::bound(native(bound_call), Some(native(bound_construct)), 0, false));

static BOUND_FUNCTION: LazyLock<Arc<FunctionData>> =
    LazyLock::new(|| FunctionData::bound(native(bound_call), None, 0, false));

/// Internal slots of a bound function object
#[derive(Debug)]
pub struct BoundFunctionSlots {
    function: FunctionSlots,
    target: ObjectRef,
    bound_this: Value,
    bound_arguments: Vec<Value>,
}

impl BoundFunctionSlots {
    pub(crate) fn function(&self) -> &FunctionSlots {
        &self.function
    }

    /// The wrapped function
    pub fn target_function(&self) -> &ObjectRef {
        &self.target
    }

    /// Receiver used for calls
    pub fn bound_this(&self) -> &Value {
        &self.bound_this
    }

    /// Arguments prepended to every call
    pub fn bound_arguments(&self) -> &[Value] {
        &self.bound_arguments
    }

    fn arguments_with(&self, rest: Vec<Value>) -> Vec<Value> {
        let mut arguments = Vec::with_capacity(self.bound_arguments.len() + rest.len());
        arguments.extend(self.bound_arguments.iter().cloned());
        arguments.extend(rest);
        arguments
    }
}

fn slots_of(bundle: &ArgumentBundle) -> ObjectResult<&BoundFunctionSlots> {
    bundle
        .callee
        .bound_function_slots()
        .ok_or_else(|| ObjectError::type_error("bound function body invoked on an unbound callee"))
}

fn bound_call(bundle: ArgumentBundle) -> ObjectResult<Value> {
    let bound = slots_of(&bundle)?;
    let arguments = bound.arguments_with(bundle.arguments.clone());
    function::call(&bound.target, bound.bound_this.clone(), &arguments)
}

fn bound_construct(bundle: ArgumentBundle) -> ObjectResult<Value> {
    let bound = slots_of(&bundle)?;
    let new_target = match &bundle.new_target {
        Some(new_target) if !Arc::ptr_eq(new_target, &bundle.callee) => Arc::clone(new_target),
        _ => Arc::clone(&bound.target),
    };
    let arguments = bound.arguments_with(bundle.arguments.clone());
    function::construct(&bound.target, &arguments, Some(&new_target))
}

fn observable_length(value: &Value) -> f64 {
    match value.as_number() {
        Some(n) if n.is_nan() => 0.0,
        Some(n) => n.trunc().max(0.0),
        None => 0.0,
    }
}

/// Create a bound function for `target`
pub fn bind(target: &ObjectRef, bound_this: Value, bound_arguments: Vec<Value>) -> ObjectResult<ObjectRef> {
    let Some(target_slots) = target.function_slots() else {
        return Err(ObjectError::NotCallable(format!("[object {}]", target.class().name())));
    };
    let realm = Arc::clone(target_slots.realm());
    let target_flags = target_slots.data().flags();
    let bound_count = bound_arguments.len() as f64;

    let length_key = PropertyKey::from("length");
    let target_length = if target.has_own_property(&length_key) {
        observable_length(&target.get(&length_key)?)
    } else {
        0.0
    };
    let reduced_length = (target_length - bound_count).max(0.0);

    let data = if target_flags.is_async {
        let construct = target_flags.constructor.then(|| native(bound_construct));
        FunctionData::bound(native(bound_call), construct, reduced_length as u32, true)
    } else if target_flags.constructor {
        Arc::clone(&BOUND_CONSTRUCTOR)
    } else {
        Arc::clone(&BOUND_FUNCTION)
    };

    let shape = function::initial_shape(&data, realm.config());
    let slots = BoundFunctionSlots {
        function: FunctionSlots::new(data, None, realm),
        target: Arc::clone(target),
        bound_this,
        bound_arguments,
    };
    let bound = JsObject::with_internal_slots(shape, target.prototype(), InternalSlots::BoundFunction(slots));

    let meta = PropertyAttributes::configurable_not_enumerable_not_writable();
    if target_length != f64::from(function::length_of(target)) {
        bound.define_property(
            PropertyKey::from("length"),
            PropertyDescriptor::data_with_attrs(Value::number(reduced_length), meta),
        )?;
    }

    let target_name = target.get(&PropertyKey::from("name"))?;
    let target_name = target_name.as_str().unwrap_or_default();
    if target_name != function::name_of(target) {
        bound.define_property(
            PropertyKey::from("name"),
            PropertyDescriptor::data_with_attrs(Value::String(format!("bound {target_name}").into()), meta),
        )?;
    }

    tracing::debug!(
        target: "otter::function",
        function = target_name,
        bound_arguments = bound_count,
        "function bound"
    );
    Ok(bound)
}
