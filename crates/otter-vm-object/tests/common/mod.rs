//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use otter_vm_object::function::{self, native};
use otter_vm_object::{FunctionData, ObjectRef, Realm, RealmConfig, RealmRegistry, Value};
use tracing_subscriber::filter::EnvFilter;

/// Route `tracing` output to the test harness. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn realm() -> Arc<Realm> {
    init_tracing();
    RealmRegistry::new().create_realm(RealmConfig::default())
}

/// Call-only function that records its receiver and arguments in a plain
/// object under `this`, `count` and index keys.
pub fn recorder(realm: &Arc<Realm>, name: &str, length: u32) -> ObjectRef {
    let data = FunctionData::call_only(
        name,
        length,
        native(|bundle| {
            let record = otter_vm_object::JsObject::ordinary(None);
            record.set("this".into(), bundle.this.clone())?;
            record.set("count".into(), Value::int32(bundle.arguments.len() as i32))?;
            for (i, arg) in bundle.arguments.iter().enumerate() {
                record.set((i as u32).into(), arg.clone())?;
            }
            Ok(Value::Object(record))
        }),
    );
    function::create(realm, data, None)
}

pub fn get(obj: &ObjectRef, key: &str) -> Value {
    obj.get(&key.into()).unwrap()
}
