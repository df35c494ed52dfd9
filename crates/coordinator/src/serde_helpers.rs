//! Serde adapters for the relay's JSON number conventions.
//!
//! The relay writes amounts as decimal strings and, depending on its version,
//! writes gas fields and nonces either as JSON numbers or as decimal strings.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn into_u256<E: serde::de::Error>(self) -> Result<U256, E> {
        match self {
            Self::Number(n) => Ok(U256::from(n)),
            Self::String(s) => s.parse::<U256>().map_err(E::custom),
        }
    }
}

/// `U256` as a decimal string, accepting numbers on input.
pub mod u256_decimal {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        NumberOrString::deserialize(deserializer)?.into_u256()
    }
}

/// `u64` accepting either a JSON number or a decimal string.
pub mod u64_lenient {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = NumberOrString::deserialize(deserializer)?.into_u256::<D::Error>()?;
        if value > U256::from(u64::MAX) {
            return Err(<D::Error as serde::de::Error>::custom("value exceeds u64"));
        }
        Ok(value.to::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Fields {
        #[serde(with = "u256_decimal")]
        value: U256,
        #[serde(with = "u64_lenient")]
        nonce: u64,
    }

    #[test]
    fn accepts_numbers_and_strings() {
        let json = r#"{"value":"1000000000000000000","nonce":"7"}"#;
        let a: Fields = serde_json::from_str(json).unwrap();
        let b: Fields = serde_json::from_str(r#"{"value":100,"nonce":7}"#).unwrap();
        assert_eq!(a.value, U256::from(10u64).pow(U256::from(18)));
        assert_eq!(a.nonce, 7);
        assert_eq!(b.value, U256::from(100));
    }

    #[test]
    fn writes_amounts_as_decimal_strings() {
        let json = serde_json::to_value(Fields { value: U256::from(255), nonce: 3 }).unwrap();
        assert_eq!(json["value"], "255");
        assert_eq!(json["nonce"], 3);
    }
}
