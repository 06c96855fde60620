//! Cache key derivation
//!
//! A [`CacheKey`] pairs a digest of the callable (qualified name plus its
//! source text) with a digest of the canonically encoded arguments.
//!
//! Rust cannot reflect on a function's source, so the caller supplies the
//! "source" when wrapping: the literal definition text, a version tag, or a
//! content hash. Changing it invalidates every entry stored under the old
//! value.
//!
//! Canonical encoding goes through `serde_json::Value`: object keys come out
//! sorted (keyword arguments are order-independent) while sequences keep their
//! order (positional arguments are order-dependent). Set-like arguments must use
//! ordered containers such as `BTreeSet`; a `HashSet` serializes in iteration
//! order and would produce unstable keys. NaN and infinite floats have no JSON
//! form and are rejected.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::core::finite::ensure_finite;
use crate::core::util::{hash_bytes, HashAlgorithm};
use crate::error::{CacheError, Result};

/// Identity of a wrapped callable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionIdentity {
    qualified_name: String,
    source: String,
}

impl FunctionIdentity {
    /// `qualified_name` should be unique within the cache (e.g. `module::function`);
    /// `source` is the definition text or a version tag standing in for it.
    pub fn new(qualified_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            source: source.into(),
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Digest of name and source; fails when either is empty.
    pub fn digest(&self) -> Result<String> {
        if self.qualified_name.trim().is_empty() {
            return Err(CacheError::KeyDerivation(
                "callable has no qualified name".to_string(),
            ));
        }
        if self.source.is_empty() {
            return Err(CacheError::KeyDerivation(format!(
                "source text for '{}' is unavailable",
                self.qualified_name
            )));
        }
        let mut data = Vec::with_capacity(self.qualified_name.len() + self.source.len() + 1);
        data.extend_from_slice(self.qualified_name.as_bytes());
        data.push(0);
        data.extend_from_slice(self.source.as_bytes());
        Ok(hash_bytes(&data, HashAlgorithm::Sha1))
    }
}

/// Digest pair identifying one memoized call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub function_digest: String,
    pub args_digest: String,
}

impl CacheKey {
    /// Derive the key for calling `identity` with `args`.
    pub fn derive<A: Serialize + ?Sized>(identity: &FunctionIdentity, args: &A) -> Result<Self> {
        let function_digest = identity.digest()?;
        let canonical = canonical_form(args)?;
        Ok(Self {
            function_digest,
            args_digest: hash_bytes(canonical.as_bytes(), HashAlgorithm::Xxh3),
        })
    }

    /// Key components as stored by backends
    pub fn parts(&self) -> [&str; 2] {
        [&self.function_digest, &self.args_digest]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.function_digest, self.args_digest)
    }
}

/// Canonical JSON encoding of call arguments
pub fn canonical_form<A: Serialize + ?Sized>(args: &A) -> Result<String> {
    let not_encodable = |e: serde_json::Error| {
        CacheError::KeyDerivation(format!("arguments are not encodable: {}", e))
    };
    ensure_finite(args).map_err(not_encodable)?;
    let value = serde_json::to_value(args).map_err(not_encodable)?;
    serde_json::to_string(&value).map_err(not_encodable)
}

fn to_canonical_value<T: Serialize>(value: T) -> serde_json::Result<Value> {
    ensure_finite(&value)?;
    serde_json::to_value(value)
}

/// Positional and keyword arguments for dynamically shaped calls.
///
/// Encoding failures are remembered and reported when the key is derived, so a
/// bad argument fails the call before any tier is consulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    invalid: Option<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        match to_canonical_value(value) {
            Ok(v) => self.args.push(v),
            Err(e) => self.record_invalid(format!("positional #{}: {}", self.args.len(), e)),
        }
        self
    }

    /// Set a keyword argument (later values replace earlier ones)
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        match to_canonical_value(value) {
            Ok(v) => {
                self.kwargs.insert(name, v);
            }
            Err(e) => self.record_invalid(format!("keyword '{}': {}", name, e)),
        }
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    fn record_invalid(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }
}

impl Serialize for CallArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(reason) = &self.invalid {
            return Err(S::Error::custom(reason));
        }
        let mut state = serializer.serialize_struct("CallArgs", 2)?;
        state.serialize_field("args", &self.args)?;
        state.serialize_field("kwargs", &self.kwargs)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn add() -> FunctionIdentity {
        FunctionIdentity::new("tests::add", "fn add(x, y) { x + y }")
    }

    #[test]
    fn test_same_call_same_key() {
        let a = CacheKey::derive(&add(), &(2, 3)).unwrap();
        let b = CacheKey::derive(&add(), &(2, 3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.function_digest.len(), 40);
        assert_eq!(a.args_digest.len(), 32);
    }

    #[test]
    fn test_positional_order_matters() {
        let a = CacheKey::derive(&add(), &(2, 3)).unwrap();
        let b = CacheKey::derive(&add(), &(3, 2)).unwrap();
        assert_eq!(a.function_digest, b.function_digest);
        assert_ne!(a.args_digest, b.args_digest);
    }

    #[test]
    fn test_keyword_order_does_not_matter() {
        let a = CallArgs::new().arg(1).kwarg("x", 2).kwarg("y", "z");
        let b = CallArgs::new().arg(1).kwarg("y", "z").kwarg("x", 2);
        assert_eq!(
            CacheKey::derive(&add(), &a).unwrap(),
            CacheKey::derive(&add(), &b).unwrap()
        );
    }

    #[test]
    fn test_hashmap_arguments_are_canonical() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{}", i), i);
        }
        assert_eq!(canonical_form(&first).unwrap(), canonical_form(&second).unwrap());
    }

    #[test]
    fn test_source_change_changes_function_digest() {
        let v1 = FunctionIdentity::new("tests::add", "x + y");
        let v2 = FunctionIdentity::new("tests::add", "x + y + 1");
        let k1 = CacheKey::derive(&v1, &(2, 3)).unwrap();
        let k2 = CacheKey::derive(&v2, &(2, 3)).unwrap();
        assert_ne!(k1.function_digest, k2.function_digest);
        assert_eq!(k1.args_digest, k2.args_digest);
    }

    #[test]
    fn test_name_and_source_are_separated() {
        let a = FunctionIdentity::new("ab", "c");
        let b = FunctionIdentity::new("a", "bc");
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let identity = FunctionIdentity::new("tests::add", "");
        let err = CacheKey::derive(&identity, &(1,)).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_non_string_map_keys_are_rejected() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple key");
        let err = CacheKey::derive(&add(), &bad).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_call_args_defer_encoding_errors() {
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        let args = CallArgs::new().arg(1).kwarg("lookup", bad);
        assert_eq!(args.positional().len(), 1);
        assert!(args.keyword("lookup").is_none());
        let err = CacheKey::derive(&add(), &args).unwrap_err();
        assert!(err.to_string().contains("keyword 'lookup'"));
    }

    #[test]
    fn test_infinities_are_rejected() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = CacheKey::derive(&add(), &(1.0, bad)).unwrap_err();
            assert!(matches!(err, CacheError::KeyDerivation(_)));
        }
        let err = CacheKey::derive(&add(), &vec![Some(f32::NEG_INFINITY)]).unwrap_err();
        assert!(matches!(err, CacheError::KeyDerivation(_)));
    }

    #[test]
    fn test_call_args_reject_non_finite() {
        let args = CallArgs::new().arg(1.0).kwarg("scale", f64::INFINITY);
        assert!(args.keyword("scale").is_none());
        let err = CacheKey::derive(&add(), &args).unwrap_err();
        assert!(err.to_string().contains("keyword 'scale'"));

        let args = CallArgs::new().arg(f64::NAN);
        assert!(args.positional().is_empty());
        assert!(CacheKey::derive(&add(), &args).is_err());
    }

    #[test]
    fn test_float_arguments_keep_their_identity() {
        let zero = CacheKey::derive(&add(), &0.0f64).unwrap();
        let neg_zero = CacheKey::derive(&add(), &-0.0f64).unwrap();
        assert_ne!(zero, neg_zero);

        let one = CacheKey::derive(&add(), &1.0f64).unwrap();
        let next = CacheKey::derive(&add(), &f64::from_bits(1.0f64.to_bits() + 1)).unwrap();
        assert_ne!(one, next);
        assert_eq!(one, CacheKey::derive(&add(), &1.0f64).unwrap());
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey {
            function_digest: "f".to_string(),
            args_digest: "a".to_string(),
        };
        assert_eq!(key.to_string(), "f/a");
        assert_eq!(key.parts(), ["f", "a"]);
    }
}
