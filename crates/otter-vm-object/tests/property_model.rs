//! Property tests: objects against an ordered-map model
//!
//! Any interleaving of adds, updates and deletes must keep enumeration order
//! and values equal to an `IndexMap` that appends new keys and removes
//! deleted ones, and must land on the same shape as an object built directly
//! from the final entries. Inline caches shared across all steps must never
//! return a value the model disagrees with.

mod common;

use std::sync::Arc;

use indexmap::IndexMap;
use otter_vm_object::{JsObject, PropertyCache, PropertyKey, Value};
use proptest::prelude::*;

const KEYS: [&str; 6] = ["pm_a", "pm_b", "pm_c", "pm_d", "pm_e", "pm_f"];

#[derive(Debug, Clone)]
enum Op {
    Set(usize, i32),
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..KEYS.len(), any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => (0..KEYS.len()).prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn prop_object_matches_ordered_model(ops in prop::collection::vec(op(), 0..40)) {
        common::init_tracing();
        let obj = JsObject::ordinary(None);
        let caches: Vec<PropertyCache> = KEYS.iter().map(|k| PropertyCache::new(*k)).collect();
        let mut model: IndexMap<&str, i32> = IndexMap::new();

        for op in &ops {
            match *op {
                Op::Set(k, v) => {
                    caches[k].set(&obj, Value::int32(v)).unwrap();
                    model.entry(KEYS[k]).and_modify(|e| *e = v).or_insert(v);
                }
                Op::Delete(k) => {
                    prop_assert!(obj.delete(&PropertyKey::from(KEYS[k])));
                    model.shift_remove(KEYS[k]);
                }
            }

            for (k, cache) in caches.iter().enumerate() {
                let expected = model.get(KEYS[k]).map_or(Value::Undefined, |v| Value::int32(*v));
                prop_assert_eq!(cache.get(&obj).unwrap(), expected);
            }
        }

        let keys: Vec<String> = obj.enumerable_own_keys().iter().map(ToString::to_string).collect();
        let expected: Vec<String> = model.keys().map(|k| k.to_string()).collect();
        prop_assert_eq!(keys, expected);

        let fresh = JsObject::ordinary(None);
        for (key, value) in &model {
            fresh.set(PropertyKey::from(*key), Value::int32(*value)).unwrap();
        }
        prop_assert!(Arc::ptr_eq(&obj.shape(), &fresh.shape()));
    }

    #[test]
    fn prop_shared_history_shares_shape(keys in prop::collection::vec(0..KEYS.len(), 0..12)) {
        let a = JsObject::ordinary(None);
        let b = JsObject::ordinary(None);
        for &k in &keys {
            a.set(PropertyKey::from(KEYS[k]), Value::boolean(true)).unwrap();
            b.set(PropertyKey::from(KEYS[k]), Value::boolean(false)).unwrap();
        }
        prop_assert!(Arc::ptr_eq(&a.shape(), &b.shape()));
    }
}
