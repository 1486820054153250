//! `Value`: the tagged union every resource quantity and label set is
//! expressed in (spec §3). A scalar models CPU/memory
//! counters, a vector models per-accelerator-card counters (one slot per
//! card, compared/added elementwise), and a set models labels.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use yr_base::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Scalar(i64),
    Vector(Vec<i64>),
    Set(BTreeSet<String>),
}

impl Value {
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Scalar(_) => Value::Scalar(0),
            Value::Vector(v) => Value::Vector(vec![0; v.len()]),
            Value::Set(_) => Value::Set(BTreeSet::new()),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Scalar(n) => *n == 0,
            Value::Vector(v) => v.iter().all(|n| *n == 0),
            Value::Set(s) => s.is_empty(),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, CoreError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(a + b)),
            (Value::Vector(a), Value::Vector(b)) => {
                same_length(a, b)?;
                Ok(Value::Vector(a.iter().zip(b).map(|(x, y)| x + y).collect()))
            }
            (Value::Set(a), Value::Set(b)) => {
                Ok(Value::Set(a.union(b).cloned().collect()))
            }
            _ => Err(mismatched_arms()),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, CoreError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(a - b)),
            (Value::Vector(a), Value::Vector(b)) => {
                same_length(a, b)?;
                Ok(Value::Vector(a.iter().zip(b).map(|(x, y)| x - y).collect()))
            }
            (Value::Set(a), Value::Set(b)) => {
                Ok(Value::Set(a.difference(b).cloned().collect()))
            }
            _ => Err(mismatched_arms()),
        }
    }

    /// Pointwise `self <= other`. For sets this is subset inclusion (every
    /// member of `self` is also a member of `other`), mirroring "allocated
    /// label usage is covered by capacity".
    pub fn le(&self, other: &Value) -> Result<bool, CoreError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(a <= b),
            (Value::Vector(a), Value::Vector(b)) => {
                same_length(a, b)?;
                Ok(a.iter().zip(b).all(|(x, y)| x <= y))
            }
            (Value::Set(a), Value::Set(b)) => Ok(a.is_subset(b)),
            _ => Err(mismatched_arms()),
        }
    }

    /// True if any component of `self` is negative (vectors) or the scalar
    /// is negative — a violated allocation after a subtraction.
    pub fn has_negative_component(&self) -> bool {
        match self {
            Value::Scalar(n) => *n < 0,
            Value::Vector(v) => v.iter().any(|n| *n < 0),
            Value::Set(_) => false,
        }
    }
}

fn same_length(a: &[i64], b: &[i64]) -> Result<(), CoreError> {
    if a.len() != b.len() {
        return Err(mismatched_arms());
    }
    Ok(())
}

fn mismatched_arms() -> CoreError {
    CoreError::ParamInvalid("resource value arms do not match (scalar/vector/set mismatch or unequal vector length)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_add_and_sub() {
        let a = Value::Scalar(4);
        let b = Value::Scalar(3);
        assert_eq!(a.add(&b).unwrap(), Value::Scalar(7));
        assert_eq!(a.sub(&b).unwrap(), Value::Scalar(1));
    }

    #[test]
    fn vector_arithmetic_is_elementwise() {
        let a = Value::Vector(vec![2, 4]);
        let b = Value::Vector(vec![1, 1]);
        assert_eq!(a.add(&b).unwrap(), Value::Vector(vec![3, 5]));
        assert_eq!(a.sub(&b).unwrap(), Value::Vector(vec![1, 3]));
    }

    #[test]
    fn vector_length_mismatch_is_rejected() {
        let a = Value::Vector(vec![1, 2]);
        let b = Value::Vector(vec![1]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn mismatched_arms_are_rejected() {
        let scalar = Value::Scalar(1);
        let vector = Value::Vector(vec![1]);
        assert!(scalar.add(&vector).is_err());
    }

    #[test]
    fn set_union_and_difference() {
        let a = Value::Set(["gpu-a", "gpu-b"].iter().map(|s| s.to_string()).collect());
        let b = Value::Set(["gpu-b"].iter().map(|s| s.to_string()).collect());
        let union = a.add(&b).unwrap();
        assert_eq!(union, a.clone());
        let diff = a.sub(&b).unwrap();
        assert_eq!(diff, Value::Set(["gpu-a".to_string()].into_iter().collect()));
    }

    #[test]
    fn le_is_pointwise() {
        let small = Value::Vector(vec![1, 1]);
        let big = Value::Vector(vec![2, 1]);
        assert!(small.le(&big).unwrap());
        assert!(!big.le(&small).unwrap());
    }
}
