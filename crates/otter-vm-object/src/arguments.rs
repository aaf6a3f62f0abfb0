//! Unmapped arguments objects

use std::sync::Arc;

use crate::object::{JsObject, ObjectRef};
use crate::property::{PropertyAttributes, ProxyProperty, StorageType};
use crate::realm::Realm;
use crate::shape::{ObjectClass, Shape};
use crate::value::Value;

/// Build the arguments object for a call of `callee`.
///
/// Layout: `length`, the indices, then `callee`. Strict callees get a
/// `callee` that throws on get and set.
pub fn create_unmapped(realm: &Realm, callee: &ObjectRef, args: &[Value], strict: bool) -> ObjectRef {
    let mut shape = Shape::empty(ObjectClass::Arguments).add_data_property(
        "length",
        PropertyAttributes::not_enumerable(),
        StorageType::Int32,
    );
    for (index, arg) in args.iter().enumerate() {
        shape = shape.add_data_property(index as u32, PropertyAttributes::data(), StorageType::of(arg));
    }
    shape = if strict {
        shape.add_proxy_property("callee", ProxyProperty::ThrowTypeError, PropertyAttributes::frozen())
    } else {
        shape.add_data_property("callee", PropertyAttributes::not_enumerable(), StorageType::Object)
    };

    let arguments = JsObject::create(shape, Some(Arc::clone(realm.object_prototype())));
    let mut values = Vec::with_capacity(args.len() + 2);
    values.push(Value::number(args.len() as f64));
    values.extend(args.iter().cloned());
    if !strict {
        values.push(Value::Object(Arc::clone(callee)));
    }
    arguments.fill_slots(values);

    tracing::trace!(target: "otter::object", count = args.len(), strict, "arguments object created");
    arguments
}
