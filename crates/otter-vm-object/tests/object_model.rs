//! Shape sharing and property order through the public object API

mod common;

use std::sync::Arc;

use common::get;
use otter_vm_object::property::StorageType;
use otter_vm_object::{
    JsObject, ObjectClass, PropertyAttributes, PropertyDescriptor, PropertyKey, Shape, ShapeTree, Value,
};

#[test]
fn test_same_history_same_shape() {
    common::init_tracing();
    let a = JsObject::ordinary(None);
    let b = JsObject::ordinary(None);
    for obj in [&a, &b] {
        obj.set("om_x".into(), Value::int32(1)).unwrap();
        obj.set("om_y".into(), Value::string("y")).unwrap();
    }
    assert!(Arc::ptr_eq(&a.shape(), &b.shape()));
    assert_eq!(a.shape_id(), b.shape_id());
}

#[test]
fn test_different_order_different_shape() {
    let a = JsObject::ordinary(None);
    let b = JsObject::ordinary(None);
    a.set("om_p".into(), Value::int32(1)).unwrap();
    a.set("om_q".into(), Value::int32(2)).unwrap();
    b.set("om_q".into(), Value::int32(2)).unwrap();
    b.set("om_p".into(), Value::int32(1)).unwrap();
    assert!(!Arc::ptr_eq(&a.shape(), &b.shape()));
}

#[test]
fn test_delete_and_readd_scenario() {
    let obj = JsObject::ordinary(None);
    obj.set("a".into(), Value::int32(1)).unwrap();
    obj.set("b".into(), Value::int32(2)).unwrap();
    assert!(obj.delete(&"a".into()));
    obj.set("a".into(), Value::int32(3)).unwrap();

    let keys: Vec<String> = obj.enumerable_own_keys().iter().map(ToString::to_string).collect();
    assert_eq!(keys, ["b", "a"]);
    assert_eq!(get(&obj, "b"), Value::int32(2));
    assert_eq!(get(&obj, "a"), Value::int32(3));

    // Converges with an object that never had the deleted key first.
    let fresh = JsObject::ordinary(None);
    fresh.set("b".into(), Value::int32(0)).unwrap();
    fresh.set("a".into(), Value::int32(0)).unwrap();
    assert!(Arc::ptr_eq(&obj.shape(), &fresh.shape()));
}

#[test]
fn test_attribute_change_keeps_order() {
    let obj = JsObject::ordinary(None);
    obj.set("om_first".into(), Value::int32(1)).unwrap();
    obj.set("om_second".into(), Value::int32(2)).unwrap();
    obj.define_property(
        "om_first".into(),
        PropertyDescriptor::data_with_attrs(Value::int32(1), PropertyAttributes::not_enumerable()),
    )
    .unwrap();

    let all: Vec<String> = obj.own_property_keys().iter().map(ToString::to_string).collect();
    assert_eq!(all, ["om_first", "om_second"]);
    let enumerable: Vec<String> = obj.enumerable_own_keys().iter().map(ToString::to_string).collect();
    assert_eq!(enumerable, ["om_second"]);

    let descriptor = obj.get_own_property(&"om_first".into()).unwrap().unwrap();
    assert_eq!(descriptor.attributes(), PropertyAttributes::not_enumerable());
    assert_eq!(descriptor.value(), Some(&Value::int32(1)));
}

#[test]
fn test_concurrent_adds_share_shape() {
    let shapes: Vec<Arc<Shape>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                scope.spawn(move || {
                    let obj = JsObject::ordinary(None);
                    obj.set("om_race_1".into(), Value::int32(i)).unwrap();
                    obj.set("om_race_2".into(), Value::int32(i)).unwrap();
                    obj.shape()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for shape in &shapes[1..] {
        assert!(Arc::ptr_eq(&shapes[0], shape));
    }
}

#[test]
fn test_concurrent_readers_see_complete_storage() {
    let obj = JsObject::ordinary(None);
    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for i in 0..64u32 {
                obj.set(PropertyKey::from(format!("om_grow_{i}")), Value::int32(i as i32)).unwrap();
            }
        });
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..256 {
                    // Every key visible in the shape must be readable.
                    for key in obj.own_property_keys() {
                        assert!(!obj.get(&key).unwrap().is_undefined());
                    }
                }
            });
        }
        writer.join().unwrap();
    });
    assert_eq!(obj.own_property_keys().len(), 64);
}

#[test]
fn test_accessor_receives_receiver() {
    use otter_vm_object::function::{self, native};
    use otter_vm_object::FunctionData;

    let realm = common::realm();
    let getter = function::create(
        &realm,
        FunctionData::call_only("get", 0, native(|bundle| Ok(bundle.this))),
        None,
    );
    let proto = JsObject::ordinary(None);
    proto
        .define_property(
            "om_self".into(),
            PropertyDescriptor::accessor(Some(Value::Object(getter)), None, PropertyAttributes::data()),
        )
        .unwrap();
    let obj = JsObject::ordinary(Some(proto));
    assert_eq!(get(&obj, "om_self"), Value::Object(Arc::clone(&obj)));
    assert!(obj.set("om_self".into(), Value::Null).is_err());
}

#[test]
fn test_accessor_setter_is_called() {
    use otter_vm_object::function::{self, native};
    use otter_vm_object::FunctionData;

    let realm = common::realm();
    let setter = function::create(
        &realm,
        FunctionData::call_only(
            "set",
            1,
            native(|bundle| {
                let this = bundle.this.as_object().cloned().ok_or("no receiver")?;
                this.set("om_backing".into(), bundle.argument(0))?;
                Ok(Value::Undefined)
            }),
        ),
        None,
    );
    let obj = JsObject::ordinary(None);
    obj.define_property(
        "om_value".into(),
        PropertyDescriptor::accessor(None, Some(Value::Object(setter)), PropertyAttributes::data()),
    )
    .unwrap();
    obj.set("om_value".into(), Value::int32(11)).unwrap();
    assert_eq!(get(&obj, "om_backing"), Value::int32(11));
    assert!(get(&obj, "om_value").is_undefined());
}

#[test]
fn test_shape_tree_is_process_wide() {
    let before = ShapeTree::global().transition_count();
    let root = Shape::empty(ObjectClass::Ordinary);
    let _ = root.add_data_property("om_unique_key", PropertyAttributes::data(), StorageType::Any);
    assert!(ShapeTree::global().transition_count() > before);
}
