//! Fixed-point monetary amounts.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// An exact decimal quantity.
///
/// Sums of many small values never drift: addition happens on
/// `rust_decimal::Decimal`, not on `f64`. Serializes as a JSON integer
/// when the value is integral, as a JSON float when the float reads back
/// to the same decimal, and as a decimal string otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Build from an integer count of minor units (e.g. cents).
    pub fn from_minor(units: i64, scale: u32) -> Self {
        Self(Decimal::new(units, scale))
    }

    pub fn decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy conversion for renderers that need a float.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }

    /// Divide, returning zero for a zero divisor.
    pub fn checked_div(&self, divisor: Decimal) -> Amount {
        if divisor.is_zero() {
            Amount::ZERO
        } else {
            Amount(self.0 / divisor)
        }
    }

    /// Interpret a JSON value as an amount.
    ///
    /// Numbers are read through their decimal text, so `0.1` stays `0.1`.
    /// Numeric strings are accepted; anything else yields `None`.
    pub fn from_json(value: &Value) -> Option<Amount> {
        match value {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64))
                .map(Amount),
            Value::String(s) => Decimal::from_str(s.trim()).ok().map(Amount),
            _ => None,
        }
    }

    /// JSON representation matching the `Serialize` impl.
    pub fn to_json(&self) -> Value {
        match self.encoding() {
            Encoding::Integer(i) => Value::from(i),
            Encoding::Float(n) => Value::Number(n),
            Encoding::Text(s) => Value::String(s),
        }
    }

    fn encoding(&self) -> Encoding {
        if self.0.fract().is_zero() {
            if let Some(i) = self.0.to_i64() {
                return Encoding::Integer(i);
            }
        }
        // serde_json writes floats in shortest form, so comparing the text
        // read back through `from_json` tells whether the float is exact.
        serde_json::Number::from_f64(self.to_f64())
            .filter(|n| Decimal::from_str(&n.to_string()).is_ok_and(|d| d == self.0))
            .map(Encoding::Float)
            .unwrap_or_else(|| Encoding::Text(self.0.normalize().to_string()))
    }
}

enum Encoding {
    Integer(i64),
    Float(serde_json::Number),
    Text(String),
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<i32> for Amount {
    fn from(value: i32) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.encoding() {
            Encoding::Integer(i) => serializer.serialize_i64(i),
            Encoding::Float(n) => n.serialize(serializer),
            Encoding::Text(s) => serializer.serialize_str(&s),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Amount::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
    }
}
