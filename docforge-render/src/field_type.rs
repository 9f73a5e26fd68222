//! Compile-time descriptions of field value types.
//!
//! Stage builders whose arguments must agree on their value types
//! (`$graphLookup`, `$densify`) check them through [`FieldType`] when the
//! definition is constructed, so a mismatch never waits for rendering.

use std::any::{TypeId, type_name};
use std::collections::{BTreeSet, HashSet, VecDeque};

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::error::{RenderError, RenderResult};

/// Broad category of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer or floating point number.
    Numeric,
    /// Date or timestamp.
    Date,
    /// String.
    String,
    /// Boolean.
    Boolean,
    /// ObjectId.
    ObjectId,
    /// Embedded document.
    Document,
    /// Iterable of another field type.
    Array,
    /// Anything else, including untyped BSON.
    Other,
}

/// A Rust type that can appear as the value of a document field.
pub trait FieldType: 'static {
    /// Category of the value.
    fn kind() -> FieldKind;

    /// Type id of the element when the value is iterable.
    fn element_type() -> Option<TypeId> {
        None
    }
}

macro_rules! impl_scalar_field_type {
    ($kind:ident => $($ty:ty),+ $(,)?) => {
        $(
            impl FieldType for $ty {
                fn kind() -> FieldKind {
                    FieldKind::$kind
                }
            }
        )+
    };
}

impl_scalar_field_type!(Numeric => i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bson::Decimal128);
impl_scalar_field_type!(Date => bson::DateTime, bson::Timestamp);
impl_scalar_field_type!(String => String, &'static str);
impl_scalar_field_type!(Boolean => bool);
impl_scalar_field_type!(ObjectId => ObjectId);
impl_scalar_field_type!(Document => Document);
impl_scalar_field_type!(Other => Bson);

macro_rules! impl_iterable_field_type {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl<T: FieldType> FieldType for $ty<T> {
                fn kind() -> FieldKind {
                    FieldKind::Array
                }

                fn element_type() -> Option<TypeId> {
                    Some(TypeId::of::<T>())
                }
            }
        )+
    };
}

impl_iterable_field_type!(Vec, VecDeque, HashSet, BTreeSet);

impl<T: FieldType> FieldType for Option<T> {
    fn kind() -> FieldKind {
        T::kind()
    }

    fn element_type() -> Option<TypeId> {
        T::element_type()
    }
}

/// Check whether a value of type `A` can be matched against a field of type `B`.
///
/// Two types connect when they are identical or when either is an iterable
/// of the other.
pub fn are_connectable<A: FieldType, B: FieldType>() -> bool {
    let a = TypeId::of::<A>();
    let b = TypeId::of::<B>();
    a == b || A::element_type() == Some(b) || B::element_type() == Some(a)
}

/// Fail with [`RenderError::IncompatibleTypes`] unless `A` connects to `B`.
pub fn ensure_connectable<A: FieldType, B: FieldType>(
    left: &str,
    right: &str,
) -> RenderResult<()> {
    if are_connectable::<A, B>() {
        Ok(())
    } else {
        Err(RenderError::incompatible_types(format!(
            "{} ({}) cannot be connected to {} ({})",
            left,
            type_name::<A>(),
            right,
            type_name::<B>()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_types_connect() {
        assert!(are_connectable::<String, String>());
        assert!(are_connectable::<i32, i32>());
    }

    #[test]
    fn test_iterable_connects_to_element() {
        assert!(are_connectable::<Vec<String>, String>());
        assert!(are_connectable::<String, HashSet<String>>());
    }

    #[test]
    fn test_unrelated_types_rejected() {
        assert!(!are_connectable::<i32, String>());
        assert!(!are_connectable::<Vec<i32>, String>());

        let err = ensure_connectable::<i64, String>("connectFromField", "connectToField")
            .unwrap_err();
        assert!(err.is_incompatible_types());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(<f64 as FieldType>::kind(), FieldKind::Numeric);
        assert_eq!(<bson::DateTime as FieldType>::kind(), FieldKind::Date);
        assert_eq!(<Option<i32> as FieldType>::kind(), FieldKind::Numeric);
        assert_eq!(<Vec<i32> as FieldType>::kind(), FieldKind::Array);
    }
}
