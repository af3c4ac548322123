#![forbid(unsafe_code)]

//! Shallow structural equality.
//!
//! [`ShallowEq`] compares records one level deep: scalar fields by value,
//! shared payloads (`Rc<T>`) by identity. This is what every memo stage and
//! every "distinct until changed" gate in the runtime uses to decide whether
//! downstream work is needed.
//!
//! # Invariants
//!
//! 1. `a.shallow_eq(&a)` is always true.
//! 2. Two `Rc`s are equal only when they point at the same allocation, even if
//!    the pointees compare equal by value.
//! 3. JSON objects are equal when they have the same key set and each value
//!    compares equal with `==`.

use std::rc::Rc;
use std::time::Duration;

use serde_json::{Map, Value};

/// One-level structural equality.
pub trait ShallowEq {
    /// Whether `self` and `other` are shallowly equal.
    fn shallow_eq(&self, other: &Self) -> bool;
}

/// Free-function form of [`ShallowEq::shallow_eq`].
#[inline]
#[must_use]
pub fn shallow_equal<T: ShallowEq + ?Sized>(a: &T, b: &T) -> bool {
    a.shallow_eq(b)
}

/// Implement [`ShallowEq`] for types whose `PartialEq` is already a
/// one-level comparison.
#[macro_export]
macro_rules! shallow_eq_by_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::equality::ShallowEq for $t {
                #[inline]
                fn shallow_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

shallow_eq_by_value!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, (),
    str, String, Duration,
);

impl<T: ?Sized> ShallowEq for Rc<T> {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ShallowEq> ShallowEq for Option<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.shallow_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ShallowEq + ?Sized> ShallowEq for &T {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        (**self).shallow_eq(*other)
    }
}

impl<T: ShallowEq> ShallowEq for [T] {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.shallow_eq(b))
    }
}

impl<T: ShallowEq> ShallowEq for Vec<T> {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        self.as_slice().shallow_eq(other.as_slice())
    }
}

macro_rules! shallow_eq_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: ShallowEq),+> ShallowEq for ($($name,)+) {
            fn shallow_eq(&self, other: &Self) -> bool {
                $(self.$idx.shallow_eq(&other.$idx))&&+
            }
        }
    };
}

shallow_eq_tuple!(A: 0);
shallow_eq_tuple!(A: 0, B: 1);
shallow_eq_tuple!(A: 0, B: 1, C: 2);
shallow_eq_tuple!(A: 0, B: 1, C: 2, D: 3);
shallow_eq_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);

impl ShallowEq for Map<String, Value> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
    }
}

impl ShallowEq for Value {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.shallow_eq(b),
            (a, b) => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_compare_by_value() {
        assert!(shallow_equal(&1u32, &1u32));
        assert!(!shallow_equal(&1u32, &2u32));
        assert!(shallow_equal("a", "a"));
        assert!(shallow_equal(&String::from("x"), &String::from("x")));
    }

    #[test]
    fn rc_compares_by_identity() {
        let a = Rc::new(5);
        let b = Rc::new(5);
        assert!(shallow_equal(&a, &Rc::clone(&a)));
        assert!(!shallow_equal(&a, &b), "equal pointees, distinct allocations");
    }

    #[test]
    fn option_and_tuple() {
        let a = Rc::new("data");
        assert!(shallow_equal(&Some(Rc::clone(&a)), &Some(Rc::clone(&a))));
        assert!(!shallow_equal(&Some(Rc::clone(&a)), &None));
        assert!(shallow_equal(&(1, true, "x"), &(1, true, "x")));
        assert!(!shallow_equal(&(1, true), &(1, false)));
    }

    #[test]
    fn json_records_compare_key_by_key() {
        let a = json!({ "id": 1, "page": 2 });
        let b = json!({ "page": 2, "id": 1 });
        let c = json!({ "id": 1 });
        let d = json!({ "id": 1, "page": 3 });
        assert!(shallow_equal(&a, &b));
        assert!(!shallow_equal(&a, &c));
        assert!(!shallow_equal(&c, &a));
        assert!(!shallow_equal(&a, &d));
    }

    #[test]
    fn json_scalars_and_arrays() {
        assert!(shallow_equal(&json!(1), &json!(1)));
        assert!(shallow_equal(&json!([1, 2]), &json!([1, 2])));
        assert!(!shallow_equal(&json!("a"), &json!(1)));
    }

    #[test]
    fn vec_compares_elementwise() {
        let x = Rc::new(1);
        assert!(shallow_equal(&vec![Rc::clone(&x)], &vec![Rc::clone(&x)]));
        assert!(!shallow_equal(&vec![Rc::clone(&x)], &vec![Rc::new(1)]));
    }
}
