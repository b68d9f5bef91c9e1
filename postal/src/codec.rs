//! Payload encodings
//!
//! The codec a body was written with travels in the envelope's `codec`
//! property so listeners can decode without out-of-band agreement.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),

    #[error("Unknown codec '{0}'")]
    Unknown(String),
}

/// Serialization format of a mail body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    #[default]
    Json,
    Bincode,
}

impl Codec {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bincode",
        }
    }

    /// Resolve a codec from its property value
    ///
    /// # Errors
    /// If no codec goes by `name`
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            other => Err(CodecError::Unknown(other.to_string())),
        }
    }

    /// # Errors
    /// If `value` cannot be represented in this format
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::Bincode => Ok(bincode::serde::encode_to_vec(
                value,
                bincode::config::standard(),
            )?),
        }
    }

    /// # Errors
    /// If `bytes` is not a valid encoding of `T`
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(bytes)?),
            Self::Bincode => {
                let (value, _) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: u32,
        customer: String,
    }

    #[test]
    fn names_resolve() {
        for codec in [Codec::Json, Codec::Bincode] {
            assert_eq!(Codec::from_name(codec.name()).unwrap(), codec);
        }
        assert!(matches!(
            Codec::from_name("xml"),
            Err(CodecError::Unknown(name)) if name == "xml"
        ));
    }

    #[test]
    fn json_is_readable() {
        let bytes = Codec::Json
            .encode(&Invoice {
                number: 7,
                customer: "acme".into(),
            })
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"number":7,"customer":"acme"}"#
        );
    }

    #[test]
    fn bincode_rejects_truncated_input() {
        let bytes = Codec::Bincode
            .encode(&Invoice {
                number: 7,
                customer: "acme".into(),
            })
            .unwrap();
        assert!(Codec::Bincode.decode::<Invoice>(&bytes[..2]).is_err());

        let decoded: Invoice = Codec::Bincode.decode(&bytes).unwrap();
        assert_eq!(decoded.customer, "acme");
    }
}
