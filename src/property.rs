//! Property states
//!
//! Immutable named values. A property holds either a single value or an
//! ordered array of values, all of one [`Type`]. The type set is closed,
//! so values are a tagged enum and conversions are total over it.
//!
//! Author: Moroya Sakamoto

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::state::validate_name;

// ── Types ─────────────────────────────────────────────────────────────

/// Property type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Type {
    String = 1,
    Binary = 2,
    Long = 3,
    Double = 4,
    Boolean = 6,
    Name = 7,
    Path = 8,
    Reference = 9,
    WeakReference = 10,
    Uri = 11,
}

impl Type {
    /// Upper-case type name
    pub fn as_str(self) -> &'static str {
        match self {
            Type::String => "STRING",
            Type::Binary => "BINARY",
            Type::Long => "LONG",
            Type::Double => "DOUBLE",
            Type::Boolean => "BOOLEAN",
            Type::Name => "NAME",
            Type::Path => "PATH",
            Type::Reference => "REFERENCE",
            Type::WeakReference => "WEAKREFERENCE",
            Type::Uri => "URI",
        }
    }

    /// True for types whose value is plain text
    #[inline]
    pub fn is_text(self) -> bool {
        matches!(
            self,
            Type::String
                | Type::Name
                | Type::Path
                | Type::Reference
                | Type::WeakReference
                | Type::Uri
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Values ────────────────────────────────────────────────────────────

/// A single property value
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Binary(Blob),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Name(String),
    Path(String),
    Reference(String),
    WeakReference(String),
    Uri(String),
}

impl Value {
    /// Type tag of this value
    pub fn value_type(&self) -> Type {
        match self {
            Value::String(_) => Type::String,
            Value::Binary(_) => Type::Binary,
            Value::Long(_) => Type::Long,
            Value::Double(_) => Type::Double,
            Value::Boolean(_) => Type::Boolean,
            Value::Name(_) => Type::Name,
            Value::Path(_) => Type::Path,
            Value::Reference(_) => Type::Reference,
            Value::WeakReference(_) => Type::WeakReference,
            Value::Uri(_) => Type::Uri,
        }
    }

    /// Text of a text-typed value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s)
            | Value::Name(s)
            | Value::Path(s)
            | Value::Reference(s)
            | Value::WeakReference(s)
            | Value::Uri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Canonical string form; binaries have none
    fn canonical(&self) -> Option<String> {
        match self {
            Value::Binary(_) => None,
            Value::Long(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Boolean(v) => Some(v.to_string()),
            other => other.as_str().map(String::from),
        }
    }

    /// Convert to `target`.
    ///
    /// Numeric targets parse the canonical string form and fail with
    /// [`Error::NumberFormat`]. Boolean targets accept booleans and the
    /// texts `true`/`false` only, failing with
    /// [`Error::UnsupportedConversion`]. Binaries never convert.
    pub fn convert(&self, target: Type) -> Result<Value> {
        let from = self.value_type();
        if from == target {
            return Ok(self.clone());
        }
        let unsupported = Error::UnsupportedConversion { from, to: target };
        let text = match self.canonical() {
            Some(text) => text,
            None => return Err(unsupported),
        };

        match target {
            Type::Binary => Err(unsupported),
            Type::Long => match self {
                Value::Double(v) => truncate_to_long(*v).map(Value::Long).ok_or_else(|| {
                    Error::NumberFormat {
                        value: text.clone(),
                        target,
                    }
                }),
                _ => text.trim().parse::<i64>().map(Value::Long).map_err(|_| {
                    Error::NumberFormat {
                        value: text.clone(),
                        target,
                    }
                }),
            },
            Type::Double => match self {
                Value::Long(v) => Ok(Value::Double(*v as f64)),
                _ => text.trim().parse::<f64>().map(Value::Double).map_err(|_| {
                    Error::NumberFormat {
                        value: text.clone(),
                        target,
                    }
                }),
            },
            Type::Boolean => {
                if !from.is_text() {
                    return Err(unsupported);
                }
                if text.eq_ignore_ascii_case("true") {
                    Ok(Value::Boolean(true))
                } else if text.eq_ignore_ascii_case("false") {
                    Ok(Value::Boolean(false))
                } else {
                    Err(unsupported)
                }
            }
            Type::String => Ok(Value::String(text)),
            Type::Name => Ok(Value::Name(text)),
            Type::Path => Ok(Value::Path(text)),
            Type::Reference => Ok(Value::Reference(text)),
            Type::WeakReference => Ok(Value::WeakReference(text)),
            Type::Uri => Ok(Value::Uri(text)),
        }
    }

    /// Byte size: blob length, or length of the canonical string form
    pub fn size(&self) -> u64 {
        match self {
            Value::Binary(b) => b.length(),
            other => other.canonical().map(|s| s.len() as u64).unwrap_or(0),
        }
    }
}

/// Truncate toward zero; `None` for NaN, infinities and values outside `i64`
fn truncate_to_long(v: f64) -> Option<i64> {
    let t = v.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

// Doubles compare by bit pattern so that Value can be Eq + Hash.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (a, b) => a.value_type() == b.value_type() && a.as_str() == b.as_str(),
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            Value::Double(v) => v.to_bits().hash(state),
            Value::Long(v) => v.hash(state),
            Value::Boolean(v) => v.hash(state),
            Value::Binary(b) => b.hash(state),
            other => other.as_str().hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(String::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Value::Binary(v)
    }
}

// ── PropertyState ─────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, Hash)]
struct PropertyInner {
    name: String,
    value_type: Type,
    array: bool,
    values: Vec<Value>,
}

/// Immutable property: name, type, array-ness and value(s).
///
/// Cheap to clone. Equality is structural.
#[derive(Debug, Clone)]
pub struct PropertyState {
    inner: Arc<PropertyInner>,
}

impl PropertyState {
    /// Single-valued property of the value's native type
    pub fn new(name: &str, value: impl Into<Value>) -> Result<Self> {
        validate_name(name)?;
        let value = value.into();
        Ok(Self::build(name, value.value_type(), false, vec![value]))
    }

    /// Single-valued property converted to `value_type`
    pub fn with_type(name: &str, value: impl Into<Value>, value_type: Type) -> Result<Self> {
        validate_name(name)?;
        let value = value.into().convert(value_type)?;
        Ok(Self::build(name, value_type, false, vec![value]))
    }

    /// Array property; every value is converted to `value_type`
    pub fn array<I, V>(name: &str, value_type: Type, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        validate_name(name)?;
        let values = values
            .into_iter()
            .map(|v| v.into().convert(value_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::build(name, value_type, true, values))
    }

    fn build(name: &str, value_type: Type, array: bool, values: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(PropertyInner {
                name: String::from(name),
                value_type,
                array,
                values,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_array(&self) -> bool {
        self.inner.array
    }

    /// Base type of the value(s)
    pub fn value_type(&self) -> Type {
        self.inner.value_type
    }

    /// Number of values; 1 for scalars
    pub fn count(&self) -> usize {
        self.inner.values.len()
    }

    /// All values in their native type
    pub fn values(&self) -> &[Value] {
        &self.inner.values
    }

    /// Native value at `index`
    pub fn value(&self, index: usize) -> Result<&Value> {
        self.inner.values.get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.count(),
        })
    }

    /// Value at `index` converted to `target`
    pub fn value_as(&self, target: Type, index: usize) -> Result<Value> {
        self.value(index)?.convert(target)
    }

    /// All values converted to `target`
    pub fn values_as(&self, target: Type) -> Result<Vec<Value>> {
        self.inner.values.iter().map(|v| v.convert(target)).collect()
    }

    /// Size of the value at `index`
    pub fn size(&self, index: usize) -> Result<u64> {
        Ok(self.value(index)?.size())
    }

    /// Strict single boolean, no coercion
    pub(crate) fn strict_boolean(&self) -> Option<bool> {
        self.scalar_of(Type::Boolean).and_then(Value::as_boolean)
    }

    pub(crate) fn strict_long(&self) -> Option<i64> {
        self.scalar_of(Type::Long).and_then(Value::as_long)
    }

    pub(crate) fn strict_text(&self, value_type: Type) -> Option<&str> {
        self.scalar_of(value_type).and_then(Value::as_str)
    }

    pub(crate) fn strict_texts(&self, value_type: Type) -> Option<Vec<String>> {
        if !self.is_array() || self.value_type() != value_type {
            return None;
        }
        Some(
            self.values()
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        )
    }

    fn scalar_of(&self, value_type: Type) -> Option<&Value> {
        if self.is_array() || self.value_type() != value_type {
            return None;
        }
        self.inner.values.first()
    }
}

impl PartialEq for PropertyState {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for PropertyState {}

impl Hash for PropertyState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_basics() {
        let p = PropertyState::new("title", "hello").unwrap();
        assert_eq!(p.name(), "title");
        assert!(!p.is_array());
        assert_eq!(p.value_type(), Type::String);
        assert_eq!(p.count(), 1);
        assert_eq!(p.value(0).unwrap(), &Value::from("hello"));
        assert_eq!(p.size(0).unwrap(), 5);
    }

    #[test]
    fn test_array_basics() {
        let p = PropertyState::array("tags", Type::String, ["a", "bb", "ccc"]).unwrap();
        assert!(p.is_array());
        assert_eq!(p.count(), 3);
        assert_eq!(p.size(2).unwrap(), 3);
    }

    #[test]
    fn test_empty_array_keeps_type() {
        let p = PropertyState::array("n", Type::Long, Vec::<i64>::new()).unwrap();
        assert!(p.is_array());
        assert_eq!(p.count(), 0);
        assert_eq!(p.value_type(), Type::Long);
    }

    #[test]
    fn test_index_out_of_range() {
        let p = PropertyState::new("n", 1i64).unwrap();
        let err = p.value(1).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 1, count: 1 }));
        assert!(p.size(3).is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(matches!(
            PropertyState::new("", 1i64),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            PropertyState::new("a/b", 1i64),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_long_string_conversions() {
        let p = PropertyState::new("n", 42i64).unwrap();
        assert_eq!(p.value_as(Type::String, 0).unwrap(), Value::from("42"));
        let s = PropertyState::new("s", "17").unwrap();
        assert_eq!(s.value_as(Type::Long, 0).unwrap(), Value::Long(17));
        assert_eq!(s.value_as(Type::Double, 0).unwrap(), Value::Double(17.0));
    }

    #[test]
    fn test_number_format_error() {
        let s = PropertyState::new("s", "seventeen").unwrap();
        let err = s.value_as(Type::Long, 0).unwrap_err();
        assert!(matches!(err, Error::NumberFormat { target: Type::Long, .. }));
        let b = PropertyState::new("b", true).unwrap();
        assert!(matches!(
            b.value_as(Type::Double, 0),
            Err(Error::NumberFormat { .. })
        ));
    }

    #[test]
    fn test_boolean_conversions() {
        let s = PropertyState::new("s", "TRUE").unwrap();
        assert_eq!(s.value_as(Type::Boolean, 0).unwrap(), Value::Boolean(true));
        let b = PropertyState::new("b", false).unwrap();
        assert_eq!(b.value_as(Type::String, 0).unwrap(), Value::from("false"));

        let junk = PropertyState::new("s", "maybe").unwrap();
        assert!(matches!(
            junk.value_as(Type::Boolean, 0),
            Err(Error::UnsupportedConversion { to: Type::Boolean, .. })
        ));
        let n = PropertyState::new("n", 1i64).unwrap();
        assert!(matches!(
            n.value_as(Type::Boolean, 0),
            Err(Error::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn test_double_long_conversions() {
        let d = PropertyState::new("d", 2.9f64).unwrap();
        assert_eq!(d.value_as(Type::Long, 0).unwrap(), Value::Long(2));
        let neg = PropertyState::new("neg", -2.9f64).unwrap();
        assert_eq!(neg.value_as(Type::Long, 0).unwrap(), Value::Long(-2));
        let l = PropertyState::new("l", 3i64).unwrap();
        assert_eq!(l.value_as(Type::Double, 0).unwrap(), Value::Double(3.0));
    }

    #[test]
    fn test_double_long_out_of_range_fails() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e300, -1e300, 9.3e18] {
            let d = PropertyState::new("d", v).unwrap();
            assert!(
                matches!(
                    d.value_as(Type::Long, 0),
                    Err(Error::NumberFormat { target: Type::Long, .. })
                ),
                "{v} must not convert to LONG"
            );
        }
        let min = PropertyState::new("min", i64::MIN as f64).unwrap();
        assert_eq!(min.value_as(Type::Long, 0).unwrap(), Value::Long(i64::MIN));
    }

    #[test]
    fn test_binary_does_not_convert() {
        let blob = Blob::new(String::from("abc"), 3);
        let p = PropertyState::new("data", blob).unwrap();
        assert_eq!(p.size(0).unwrap(), 3);
        assert!(matches!(
            p.value_as(Type::String, 0),
            Err(Error::UnsupportedConversion { .. })
        ));
        let s = PropertyState::new("s", "abc").unwrap();
        assert!(s.value_as(Type::Binary, 0).is_err());
    }

    #[test]
    fn test_with_type_converts_on_construction() {
        let p = PropertyState::with_type("n", "12", Type::Long).unwrap();
        assert_eq!(p.value_type(), Type::Long);
        assert_eq!(p.value(0).unwrap().as_long(), Some(12));
        assert!(PropertyState::with_type("n", "x", Type::Long).is_err());
        let name = PropertyState::with_type("t", "nt:file", Type::Name).unwrap();
        assert_eq!(name.value_type(), Type::Name);
    }

    #[test]
    fn test_array_values_as() {
        let p = PropertyState::array("n", Type::Long, [1i64, 2, 3]).unwrap();
        let strings = p.values_as(Type::String).unwrap();
        assert_eq!(strings, vec![Value::from("1"), Value::from("2"), Value::from("3")]);
    }

    #[test]
    fn test_structural_equality() {
        let a = PropertyState::new("x", 1i64).unwrap();
        let b = PropertyState::new("x", 1i64).unwrap();
        let c = PropertyState::new("y", 1i64).unwrap();
        let d = PropertyState::array("x", Type::Long, [1i64]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d, "array-ness is part of identity");
    }

    #[test]
    fn test_text_types_differ() {
        let s = PropertyState::new("x", "a").unwrap();
        let n = PropertyState::with_type("x", "a", Type::Name).unwrap();
        assert_ne!(s, n);
    }

    #[test]
    fn test_strict_accessors_do_not_coerce() {
        let s = PropertyState::new("x", "true").unwrap();
        assert_eq!(s.strict_boolean(), None);
        let b = PropertyState::new("x", true).unwrap();
        assert_eq!(b.strict_boolean(), Some(true));
        let names = PropertyState::array("x", Type::Name, ["a", "b"]).unwrap();
        assert_eq!(names.strict_texts(Type::Name), Some(vec![String::from("a"), String::from("b")]));
        assert_eq!(names.strict_texts(Type::String), None);
    }
}
