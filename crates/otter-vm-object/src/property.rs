//! Property keys, attributes and locations
//!
//! A [`Property`] is the immutable per-shape record of one own property:
//! its key, its attribute triple and where the value lives. Properties are
//! hashable so they can key the shape transition map directly.

use std::fmt;
use std::sync::Arc;

use crate::error::{ObjectError, ObjectResult};
use crate::function;
use crate::object::ObjectRef;
use crate::value::{Symbol, Value};

/// Property key (string or symbol)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<str>),
    /// Symbol property key
    Symbol(Arc<Symbol>),
}

impl PropertyKey {
    /// Create a string property key
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Create a symbol property key
    pub fn symbol(sym: Arc<Symbol>) -> Self {
        Self::Symbol(sym)
    }

    /// Check if this is a string key
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Get the string contents of a string key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::String(Arc::from(i.to_string()))
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Symbol(sym) => match &sym.description {
                Some(desc) => write!(f, "Symbol({desc})"),
                None => f.write_str("Symbol()"),
            },
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Attribute triple in (writable, enumerable, configurable) order
    pub const fn new(writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            writable,
            enumerable,
            configurable,
        }
    }

    /// Default data property attributes
    pub const fn data() -> Self {
        Self::new(true, true, true)
    }

    /// Non-writable, non-enumerable, non-configurable
    pub const fn frozen() -> Self {
        Self::new(false, false, false)
    }

    /// Writable and configurable but hidden from enumeration
    pub const fn not_enumerable() -> Self {
        Self::new(true, false, true)
    }

    /// `length` / `name` of functions
    pub const fn configurable_not_enumerable_not_writable() -> Self {
        Self::new(false, false, true)
    }

    /// `prototype` of ordinary functions
    pub const fn not_configurable_not_enumerable_writable() -> Self {
        Self::new(true, false, false)
    }
}

/// Declared type of an inline slot.
///
/// Writing a value the declared type does not accept generalizes the
/// property, which is a shape change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// Integral number representable as i32 (not -0)
    Int32,
    /// Any number
    Double,
    /// Boolean
    Boolean,
    /// Object reference
    Object,
    /// Anything
    Any,
}

impl StorageType {
    /// The narrowest storage type able to hold `value`
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Number(n) => {
                let integral = n.fract() == 0.0
                    && *n >= f64::from(i32::MIN)
                    && *n <= f64::from(i32::MAX)
                    && !(*n == 0.0 && n.is_sign_negative());
                if integral { Self::Int32 } else { Self::Double }
            }
            Value::Boolean(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            _ => Self::Any,
        }
    }

    /// Whether a slot of this type can hold `value` as is
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Double => matches!(value, Value::Number(_)),
            other => Self::of(value) == other,
        }
    }

    /// Least upper bound of two storage types
    pub fn generalize(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int32, Self::Double) | (Self::Double, Self::Int32) => Self::Double,
            _ => Self::Any,
        }
    }
}

/// Engine-computed properties. Each variant is resolved by a single match
/// at access time against the object that holds the property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyProperty {
    /// Function `length`, reduced through bound functions
    FunctionLength,
    /// Function `name`, prefixed through bound functions
    FunctionName,
    /// Lazily materialized function `prototype`
    ClassPrototype,
    /// Legacy `arguments` of sloppy functions
    Arguments,
    /// Legacy `caller` of sloppy functions
    Caller,
    /// Poison pill: both get and set throw
    ThrowTypeError,
}

impl ProxyProperty {
    /// Whether the proxy acts as an accessor: writes reach [`Self::set`]
    /// whatever the writable bit says, including through the prototype
    /// chain.
    pub fn has_setter(self) -> bool {
        matches!(self, Self::ThrowTypeError)
    }

    /// Read the computed value with `store` as the holder
    pub fn get(self, store: &ObjectRef) -> ObjectResult<Value> {
        match self {
            Self::FunctionLength => Ok(Value::number(f64::from(function::length_of(store)))),
            Self::FunctionName => Ok(Value::String(function::name_of(store).into())),
            Self::ClassPrototype => function::class_prototype(store),
            Self::Arguments | Self::Caller => Ok(Value::Undefined),
            Self::ThrowTypeError => Err(ObjectError::type_error(
                "'caller', 'callee', and 'arguments' properties may not be accessed on strict mode functions or the arguments objects for calls to them",
            )),
        }
    }

    /// Route a write to the setter. `Ok(false)` means there is none.
    pub fn set(self, store: &ObjectRef, value: Value) -> ObjectResult<bool> {
        match self {
            Self::ClassPrototype => {
                function::set_class_prototype(store, value)?;
                Ok(true)
            }
            Self::ThrowTypeError => self.get(store).map(|_| true),
            _ => Ok(false),
        }
    }
}

/// Where a property's value physically lives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyLocation {
    /// One storage slot
    Inline {
        /// Slot index (inline slots first, then overflow)
        index: u32,
        /// Declared storage type
        declared: StorageType,
    },
    /// Computed on read
    Proxy(ProxyProperty),
    /// Getter at `index`, setter at `index + 1`
    Accessor {
        /// Slot index of the getter
        index: u32,
    },
}

impl PropertyLocation {
    /// First storage slot used, if any
    pub fn slot_index(&self) -> Option<u32> {
        match self {
            Self::Inline { index, .. } | Self::Accessor { index } => Some(*index),
            Self::Proxy(_) => None,
        }
    }

    /// Number of storage slots used
    pub fn slot_width(&self) -> u32 {
        match self {
            Self::Inline { .. } => 1,
            Self::Accessor { .. } => 2,
            Self::Proxy(_) => 0,
        }
    }

    /// Same location kind moved to another slot index
    pub(crate) fn at_slot(self, slot: u32) -> Self {
        match self {
            Self::Inline { declared, .. } => Self::Inline {
                index: slot,
                declared,
            },
            Self::Accessor { .. } => Self::Accessor { index: slot },
            proxy @ Self::Proxy(_) => proxy,
        }
    }
}

/// Immutable property record stored in a shape
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Property {
    /// The key
    pub key: PropertyKey,
    /// Attributes
    pub attributes: PropertyAttributes,
    /// Location
    pub location: PropertyLocation,
}

impl Property {
    /// Create a property
    pub fn new(key: PropertyKey, attributes: PropertyAttributes, location: PropertyLocation) -> Self {
        Self {
            key,
            attributes,
            location,
        }
    }

    /// Create a proxy property
    pub fn proxy(key: impl Into<PropertyKey>, proxy: ProxyProperty, attributes: PropertyAttributes) -> Self {
        Self::new(key.into(), attributes, PropertyLocation::Proxy(proxy))
    }

    /// Check if the value is stored in a data slot
    pub fn is_data(&self) -> bool {
        matches!(self.location, PropertyLocation::Inline { .. })
    }

    /// Check if the value is computed by the engine
    pub fn is_proxy(&self) -> bool {
        matches!(self.location, PropertyLocation::Proxy(_))
    }

    /// Check if this is a getter/setter pair
    pub fn is_accessor(&self) -> bool {
        matches!(self.location, PropertyLocation::Accessor { .. })
    }
}

/// Property descriptor used by `define_property` and returned by
/// `get_own_property`
#[derive(Clone, Debug)]
pub enum PropertyDescriptor {
    /// Data property
    Data {
        /// The value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function
        get: Option<Value>,
        /// Setter function
        set: Option<Value>,
        /// Attributes (`writable` is ignored)
        attributes: PropertyAttributes,
    },
}

impl PropertyDescriptor {
    /// Create a data property
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Create a data property with specific attributes
    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data { value, attributes }
    }

    /// Create an accessor property
    pub fn accessor(get: Option<Value>, set: Option<Value>, attributes: PropertyAttributes) -> Self {
        Self::Accessor {
            get,
            set,
            attributes,
        }
    }

    /// Get the value (for data properties)
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// The attribute triple
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_classification() {
        assert_eq!(StorageType::of(&Value::int32(5)), StorageType::Int32);
        assert_eq!(StorageType::of(&Value::number(0.5)), StorageType::Double);
        assert_eq!(StorageType::of(&Value::number(-0.0)), StorageType::Double);
        assert_eq!(StorageType::of(&Value::number(1e12)), StorageType::Double);
        assert_eq!(StorageType::of(&Value::boolean(true)), StorageType::Boolean);
        assert_eq!(StorageType::of(&Value::string("s")), StorageType::Any);
    }

    #[test]
    fn test_storage_type_lattice() {
        assert!(StorageType::Double.accepts(&Value::int32(1)));
        assert!(!StorageType::Int32.accepts(&Value::number(1.5)));
        assert_eq!(
            StorageType::Int32.generalize(StorageType::Double),
            StorageType::Double
        );
        assert_eq!(
            StorageType::Boolean.generalize(StorageType::Int32),
            StorageType::Any
        );
        assert_eq!(StorageType::Object.generalize(StorageType::Object), StorageType::Object);
    }

    #[test]
    fn test_index_keys_are_strings() {
        assert_eq!(PropertyKey::from(3u32), PropertyKey::from("3"));
        assert!(PropertyKey::from(3u32).is_string());
    }

    #[test]
    fn test_symbol_keys_compare_by_identity() {
        let a = Symbol::new(Some("k"));
        let b = Symbol::new(Some("k"));
        assert_ne!(PropertyKey::symbol(a.clone()), PropertyKey::symbol(b));
        assert_eq!(PropertyKey::symbol(a.clone()), PropertyKey::symbol(a));
    }

    #[test]
    fn test_location_slots() {
        let inline = PropertyLocation::Inline {
            index: 2,
            declared: StorageType::Any,
        };
        assert_eq!(inline.slot_index(), Some(2));
        assert_eq!(inline.at_slot(5).slot_index(), Some(5));
        assert_eq!(PropertyLocation::Accessor { index: 0 }.slot_width(), 2);
        assert_eq!(
            PropertyLocation::Proxy(ProxyProperty::FunctionLength).slot_index(),
            None
        );
    }
}
