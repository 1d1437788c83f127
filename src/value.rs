//! Opaque, refcounted event payloads.
//!
//! The expression/value tree a real model would build values with (maps,
//! sets, matrices, ...) lives outside this crate. The kernel only ever
//! needs to clone a value cheaply, share it across every recipient of a
//! routed event, tag its dynamic type, and print it for an observation
//! sink — so `Value` is a thin `Arc` wrapper around anything satisfying
//! those four operations, and never constructs a non-trivial value
//! itself.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The capability an embedding application's value type must provide to
/// flow through the kernel as event payload or observation result.
pub trait DynValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// A short tag identifying the dynamic type, used in trace output and
    /// by dynamics that want to type-check a port's payload cheaply
    /// without downcasting.
    fn type_tag(&self) -> &'static str;
}

/// A refcounted, immutable handle to an event payload or observation
/// result.
///
/// Cloning a `Value` never deep-copies the payload: routing the same
/// output event to N destination ports costs N `Arc` clones, matching the
/// delivery contract that a connection's value is shared rather than
/// duplicated.
#[derive(Clone, Debug)]
pub struct Value(Arc<dyn DynValue>);

impl Value {
    pub fn new<T: DynValue + 'static>(v: T) -> Self {
        Value(Arc::new(v))
    }

    pub fn type_tag(&self) -> &'static str {
        self.0.type_tag()
    }

    /// Attempts to downcast to a concrete payload type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// True if this handle and `other` point at the same underlying
    /// allocation, i.e. neither has been cloned from a fresh `Value::new`.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

macro_rules! impl_dyn_value_for_primitive {
    ($($t:ty => $tag:literal),* $(,)?) => {
        $(
            impl DynValue for $t {
                fn as_any(&self) -> &dyn Any {
                    self
                }
                fn type_tag(&self) -> &'static str {
                    $tag
                }
            }
        )*
    };
}

impl_dyn_value_for_primitive! {
    i64 => "int",
    f64 => "real",
    bool => "bool",
    String => "string",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_downcast() {
        let v = Value::new(42i64);
        assert_eq!(v.type_tag(), "int");
        assert_eq!(v.downcast_ref::<i64>(), Some(&42));
        assert_eq!(v.downcast_ref::<f64>(), None);
    }

    #[test]
    fn clone_shares_the_allocation() {
        let v = Value::new(String::from("hello"));
        let w = v.clone();
        assert!(v.ptr_eq(&w));
        let fresh = Value::new(String::from("hello"));
        assert!(!v.ptr_eq(&fresh));
    }

    #[test]
    fn display_uses_debug_formatting() {
        let v = Value::new(7i64);
        assert_eq!(v.to_string(), "7");
    }
}
