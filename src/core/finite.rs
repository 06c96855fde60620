//! Non-finite float detection
//!
//! serde_json writes NaN, `inf` and `-inf` as `null`. Keys built from such
//! arguments would collide, and such values would not decode as floats, so both
//! paths walk the value through [`ensure_finite`] before encoding it.

use serde::ser::{self, Error as _, Serialize};
use serde_json::Error;

type Checked = std::result::Result<(), Error>;

/// Fail when `value` contains a NaN or infinite `f32`/`f64` anywhere inside it.
pub fn ensure_finite<T: Serialize + ?Sized>(value: &T) -> Checked {
    value.serialize(FiniteCheck)
}

fn check(v: f64) -> Checked {
    if v.is_finite() {
        Ok(())
    } else {
        Err(Error::custom(format!("non-finite float {} cannot be encoded", v)))
    }
}

/// Serializer that produces nothing and only inspects floats
#[derive(Clone, Copy)]
struct FiniteCheck;

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _v: bool) -> Checked {
        Ok(())
    }

    fn serialize_i8(self, _v: i8) -> Checked {
        Ok(())
    }

    fn serialize_i16(self, _v: i16) -> Checked {
        Ok(())
    }

    fn serialize_i32(self, _v: i32) -> Checked {
        Ok(())
    }

    fn serialize_i64(self, _v: i64) -> Checked {
        Ok(())
    }

    fn serialize_i128(self, _v: i128) -> Checked {
        Ok(())
    }

    fn serialize_u8(self, _v: u8) -> Checked {
        Ok(())
    }

    fn serialize_u16(self, _v: u16) -> Checked {
        Ok(())
    }

    fn serialize_u32(self, _v: u32) -> Checked {
        Ok(())
    }

    fn serialize_u64(self, _v: u64) -> Checked {
        Ok(())
    }

    fn serialize_u128(self, _v: u128) -> Checked {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Checked {
        check(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Checked {
        check(v)
    }

    fn serialize_char(self, _v: char) -> Checked {
        Ok(())
    }

    fn serialize_str(self, _v: &str) -> Checked {
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Checked {
        Ok(())
    }

    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Checked {
        key.serialize(*self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(*self)
    }

    fn end(self) -> Checked {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Sample {
        label: String,
        weights: Vec<f64>,
        scale: Option<f32>,
    }

    #[derive(Serialize)]
    enum Shape {
        Circle { radius: f64 },
    }

    #[test]
    fn test_finite_values_pass() {
        let sample = Sample {
            label: "ok".to_string(),
            weights: vec![0.0, -0.0, f64::MAX, f64::MIN_POSITIVE],
            scale: Some(1.5),
        };
        assert!(ensure_finite(&sample).is_ok());
        assert!(ensure_finite(&(1u128, -1i128, 'c', ())).is_ok());
    }

    #[test]
    fn test_nested_non_finite_is_found() {
        let sample = Sample {
            label: "bad".to_string(),
            weights: vec![1.0, f64::NAN],
            scale: None,
        };
        let err = ensure_finite(&sample).unwrap_err();
        assert!(err.to_string().contains("NaN"));

        assert!(ensure_finite(&Some(f32::INFINITY)).is_err());
        assert!(ensure_finite(&Shape::Circle {
            radius: f64::NEG_INFINITY
        })
        .is_err());

        let mut map = BTreeMap::new();
        map.insert("x", f64::INFINITY);
        assert!(ensure_finite(&map).is_err());
    }
}
