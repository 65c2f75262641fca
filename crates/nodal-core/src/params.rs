//! Named parameter values for models and instances.

use indexmap::IndexMap;
use num_complex::Complex64;

use crate::error::{Error, Result};

/// A parameter value as exchanged with the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Real(f64),
    Integer(i64),
    Flag(bool),
    RealVec(Vec<f64>),
    Complex(Complex64),
}

impl ParamValue {
    /// Numeric value; integers widen to reals.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            ParamValue::Real(v) => Some(*v),
            ParamValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Flag value; a bare integer counts as true when non-zero.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ParamValue::Flag(v) => Some(*v),
            ParamValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Vector value.
    pub fn as_vec(&self) -> Option<&[f64]> {
        match self {
            ParamValue::RealVec(v) => Some(v),
            _ => None,
        }
    }

    /// Complex value; reals become purely real.
    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            ParamValue::Complex(c) => Some(*c),
            other => other.as_real().map(|r| Complex64::new(r, 0.0)),
        }
    }

    /// Real value or a typed error naming the parameter.
    pub fn expect_real(&self, name: &str) -> Result<f64> {
        self.as_real().ok_or_else(|| Error::InvalidParameterType {
            name: name.to_string(),
            expected: "real",
        })
    }

    /// Flag value or a typed error naming the parameter.
    pub fn expect_flag(&self, name: &str) -> Result<bool> {
        self.as_flag().ok_or_else(|| Error::InvalidParameterType {
            name: name.to_string(),
            expected: "flag",
        })
    }

    /// Vector value or a typed error naming the parameter.
    pub fn expect_vec(&self, name: &str) -> Result<Vec<f64>> {
        self.as_vec()
            .map(<[f64]>::to_vec)
            .ok_or_else(|| Error::InvalidParameterType {
                name: name.to_string(),
                expected: "real vector",
            })
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Real(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Flag(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::RealVec(v)
    }
}

impl From<Complex64> for ParamValue {
    fn from(v: Complex64) -> Self {
        ParamValue::Complex(v)
    }
}

/// Ordered, case-insensitive list of named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    values: IndexMap<String, ParamValue>,
}

impl ParamList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or overwrite a parameter.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Look up a parameter.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(&name.to_ascii_lowercase())
    }

    /// True if the parameter was given.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Real parameter, falling back to `default` when absent.
    pub fn real_or(&self, name: &str, default: f64) -> Result<f64> {
        self.get(name)
            .map(|v| v.expect_real(name))
            .unwrap_or(Ok(default))
    }

    /// Real parameter if given.
    pub fn real(&self, name: &str) -> Result<Option<f64>> {
        self.get(name).map(|v| v.expect_real(name)).transpose()
    }

    /// Integer parameter, falling back to `default` when absent.
    pub fn integer_or(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_integer().ok_or_else(|| Error::InvalidParameterType {
                name: name.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Flag parameter, falling back to `default` when absent.
    pub fn flag_or(&self, name: &str, default: bool) -> Result<bool> {
        self.get(name)
            .map(|v| v.expect_flag(name))
            .unwrap_or(Ok(default))
    }

    /// Vector parameter if given.
    pub fn vec(&self, name: &str) -> Result<Option<Vec<f64>>> {
        self.get(name).map(|v| v.expect_vec(name)).transpose()
    }

    /// Fail on the first name not in `known`.
    pub fn check_known(&self, known: &[&str]) -> Result<()> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(k) => Err(Error::UnknownParameter(k.clone())),
            None => Ok(()),
        }
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
