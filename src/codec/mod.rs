//! Compact typed key-value parameter format.
//!
//! Request parameters are submitted on-chain as a single byte string: a
//! 32-byte header (`"1"` followed by one type character per parameter)
//! followed by `(name, value)` pairs laid out with the standard ABI word
//! encoding. This module encodes and decodes that format. Single response
//! values written back by fulfillments live in [`response`].

pub mod response;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, I256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header version character.
pub const ENCODING_VERSION: char = '1';

const WORD: usize = 32;
/// One header byte is taken by the version.
pub const MAX_PARAMETERS: usize = WORD - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encoded parameters are shorter than the 32-byte header")]
    MissingHeader,
    #[error("header is not valid UTF-8")]
    InvalidHeader,
    #[error("unsupported encoding version {0:?}")]
    UnsupportedVersion(char),
    #[error("unknown parameter type {0:?}")]
    UnknownType(char),
    #[error("parameter body does not match the header: {0}")]
    Malformed(String),
    #[error("too many parameters ({0}), at most {MAX_PARAMETERS} fit in a header")]
    TooManyParameters(usize),
    #[error("value of parameter {name:?} does not fit in 32 bytes")]
    ValueTooLong { name: String },
    #[error("unsupported parameter type name {0:?}")]
    UnknownTypeName(String),
}

/// The fixed set of types the format can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Bytes32,
    String32,
    Address,
    Bytes,
    String,
    Int256,
    Uint256,
    Bool,
}

impl ParameterType {
    pub fn header_char(self) -> char {
        match self {
            ParameterType::Bytes32 => 'b',
            ParameterType::String32 => 's',
            ParameterType::Address => 'a',
            ParameterType::Bytes => 'B',
            ParameterType::String => 'S',
            ParameterType::Int256 => 'i',
            ParameterType::Uint256 => 'u',
            ParameterType::Bool => 'f',
        }
    }

    pub fn from_header_char(c: char) -> Result<Self, CodecError> {
        Ok(match c {
            'b' => ParameterType::Bytes32,
            's' => ParameterType::String32,
            'a' => ParameterType::Address,
            'B' => ParameterType::Bytes,
            'S' => ParameterType::String,
            'i' => ParameterType::Int256,
            'u' => ParameterType::Uint256,
            'f' => ParameterType::Bool,
            other => return Err(CodecError::UnknownType(other)),
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ParameterType::Int256 | ParameterType::Uint256)
    }

    fn abi_type(self) -> ParamType {
        match self {
            ParameterType::Bytes32 | ParameterType::String32 => ParamType::FixedBytes(WORD),
            ParameterType::Address => ParamType::Address,
            ParameterType::Bytes => ParamType::Bytes,
            ParameterType::String => ParamType::String,
            ParameterType::Int256 => ParamType::Int(256),
            ParameterType::Uint256 => ParamType::Uint(256),
            ParameterType::Bool => ParamType::Bool,
        }
    }
}

impl FromStr for ParameterType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bytes32" => ParameterType::Bytes32,
            "string32" => ParameterType::String32,
            "address" => ParameterType::Address,
            "bytes" => ParameterType::Bytes,
            "string" => ParameterType::String,
            "int256" => ParameterType::Int256,
            "uint256" => ParameterType::Uint256,
            "bool" => ParameterType::Bool,
            other => return Err(CodecError::UnknownTypeName(other.to_string())),
        })
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::Bytes32 => "bytes32",
            ParameterType::String32 => "string32",
            ParameterType::Address => "address",
            ParameterType::Bytes => "bytes",
            ParameterType::String => "string",
            ParameterType::Int256 => "int256",
            ParameterType::Uint256 => "uint256",
            ParameterType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A typed parameter value. The variant is the type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Bytes32([u8; 32]),
    String32(String),
    Address(Address),
    Bytes(Vec<u8>),
    String(String),
    Int256(I256),
    Uint256(U256),
    Bool(bool),
}

impl ParameterValue {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::Bytes32(_) => ParameterType::Bytes32,
            ParameterValue::String32(_) => ParameterType::String32,
            ParameterValue::Address(_) => ParameterType::Address,
            ParameterValue::Bytes(_) => ParameterType::Bytes,
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::Int256(_) => ParameterType::Int256,
            ParameterValue::Uint256(_) => ParameterType::Uint256,
            ParameterValue::Bool(_) => ParameterType::Bool,
        }
    }

    pub(crate) fn to_token(&self, name: &str) -> Result<Token, CodecError> {
        Ok(match self {
            ParameterValue::Bytes32(bytes) => Token::FixedBytes(bytes.to_vec()),
            ParameterValue::String32(value) => {
                let padded = pad_word(value.as_bytes()).ok_or_else(|| CodecError::ValueTooLong {
                    name: name.to_string(),
                })?;
                Token::FixedBytes(padded.to_vec())
            }
            ParameterValue::Address(address) => Token::Address(*address),
            ParameterValue::Bytes(bytes) => Token::Bytes(bytes.clone()),
            ParameterValue::String(value) => Token::String(value.clone()),
            ParameterValue::Int256(value) => Token::Int(value.into_raw()),
            ParameterValue::Uint256(value) => Token::Uint(*value),
            ParameterValue::Bool(value) => Token::Bool(*value),
        })
    }

    fn from_token(parameter_type: ParameterType, token: Token) -> Result<Self, CodecError> {
        let value = match (parameter_type, token) {
            (ParameterType::Bytes32, Token::FixedBytes(bytes)) => {
                ParameterValue::Bytes32(to_word(&bytes)?)
            }
            (ParameterType::String32, Token::FixedBytes(bytes)) => {
                ParameterValue::String32(unpad_string(&bytes)?)
            }
            (ParameterType::Address, Token::Address(address)) => ParameterValue::Address(address),
            (ParameterType::Bytes, Token::Bytes(bytes)) => ParameterValue::Bytes(bytes),
            (ParameterType::String, Token::String(value)) => ParameterValue::String(value),
            (ParameterType::Int256, Token::Int(raw)) => ParameterValue::Int256(I256::from_raw(raw)),
            (ParameterType::Uint256, Token::Uint(value)) => ParameterValue::Uint256(value),
            (ParameterType::Bool, Token::Bool(value)) => ParameterValue::Bool(value),
            (expected, token) => {
                return Err(CodecError::Malformed(format!(
                    "expected {expected}, decoded {token:?}"
                )))
            }
        };
        Ok(value)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bytes32(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            ParameterValue::String32(value) | ParameterValue::String(value) => f.write_str(value),
            ParameterValue::Address(address) => f.write_str(&to_checksum(address, None)),
            ParameterValue::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            ParameterValue::Int256(value) => write!(f, "{value}"),
            ParameterValue::Uint256(value) => write!(f, "{value}"),
            ParameterValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: ParameterValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Encodes an ordered parameter list.
pub fn encode_parameters(parameters: &[Parameter]) -> Result<Bytes, CodecError> {
    if parameters.len() > MAX_PARAMETERS {
        return Err(CodecError::TooManyParameters(parameters.len()));
    }

    let mut header = String::with_capacity(parameters.len() + 1);
    header.push(ENCODING_VERSION);
    for parameter in parameters {
        header.push(parameter.value.parameter_type().header_char());
    }

    let mut tokens = Vec::with_capacity(parameters.len() * 2 + 1);
    // Header chars are ASCII so the header always fits.
    tokens.push(Token::FixedBytes(truncate_word(header.as_bytes()).to_vec()));
    for parameter in parameters {
        tokens.push(Token::FixedBytes(
            truncate_word(parameter.name.as_bytes()).to_vec(),
        ));
        tokens.push(parameter.value.to_token(&parameter.name)?);
    }

    Ok(Bytes::from(abi::encode(&tokens)))
}

/// Decodes an encoded parameter list. An empty input decodes to no parameters.
pub fn decode_parameters(data: &[u8]) -> Result<Vec<Parameter>, CodecError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < WORD {
        return Err(CodecError::MissingHeader);
    }

    let header = unpad_string(&data[..WORD]).map_err(|_| CodecError::InvalidHeader)?;
    let mut chars = header.chars();
    match chars.next() {
        Some(ENCODING_VERSION) => {}
        Some(other) => return Err(CodecError::UnsupportedVersion(other)),
        None => return Err(CodecError::UnsupportedVersion('\0')),
    }
    let types = chars
        .map(ParameterType::from_header_char)
        .collect::<Result<Vec<_>, _>>()?;

    let mut abi_types = Vec::with_capacity(types.len() * 2 + 1);
    abi_types.push(ParamType::FixedBytes(WORD));
    for parameter_type in &types {
        abi_types.push(ParamType::FixedBytes(WORD));
        abi_types.push(parameter_type.abi_type());
    }

    let tokens = abi::decode(&abi_types, data).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let mut tokens = tokens.into_iter().skip(1);

    let mut parameters = Vec::with_capacity(types.len());
    for parameter_type in types {
        let (name_token, value_token) = match (tokens.next(), tokens.next()) {
            (Some(name), Some(value)) => (name, value),
            _ => return Err(CodecError::Malformed("missing parameter slot".to_string())),
        };
        let name = match name_token {
            Token::FixedBytes(bytes) => unpad_string(&bytes)?,
            other => {
                return Err(CodecError::Malformed(format!(
                    "expected parameter name, decoded {other:?}"
                )))
            }
        };
        parameters.push(Parameter {
            name,
            value: ParameterValue::from_token(parameter_type, value_token)?,
        });
    }

    Ok(parameters)
}

/// Decodes parameters into the string map the rest of the pipeline works with.
/// Later duplicates of a name overwrite earlier ones.
pub fn decode_parameter_map(data: &[u8]) -> Result<BTreeMap<String, String>, CodecError> {
    Ok(decode_parameters(data)?
        .into_iter()
        .map(|parameter| (parameter.name, parameter.value.to_string()))
        .collect())
}

fn truncate_word(bytes: &[u8]) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    let len = bytes.len().min(WORD);
    word[..len].copy_from_slice(&bytes[..len]);
    word
}

pub(crate) fn pad_word(bytes: &[u8]) -> Option<[u8; WORD]> {
    (bytes.len() <= WORD).then(|| truncate_word(bytes))
}

fn to_word(bytes: &[u8]) -> Result<[u8; WORD], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::Malformed(format!("expected 32 bytes, got {}", bytes.len())))
}

fn unpad_string(bytes: &[u8]) -> Result<String, CodecError> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| CodecError::Malformed(format!("invalid UTF-8 in fixed string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parameters() -> Vec<Parameter> {
        vec![
            Parameter::new("from", ParameterValue::String32("ETH".into())),
            Parameter::new("to", ParameterValue::String("US Dollar".into())),
            Parameter::new(
                "wallet",
                ParameterValue::Address(
                    "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap(),
                ),
            ),
            Parameter::new("payload", ParameterValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
            Parameter::new("key", ParameterValue::Bytes32([7u8; 32])),
            Parameter::new("delta", ParameterValue::Int256(I256::from_dec_str("-42").unwrap())),
            Parameter::new("amount", ParameterValue::Uint256(U256::from(1_000_000u64))),
            Parameter::new("strict", ParameterValue::Bool(true)),
        ]
    }

    #[test]
    fn test_round_trip_all_types() {
        let parameters = sample_parameters();
        let encoded = encode_parameters(&parameters).unwrap();
        let decoded = decode_parameters(&encoded).unwrap();
        assert_eq!(decoded, parameters);
        // And re-encoding reproduces the same bytes.
        assert_eq!(encode_parameters(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_header_layout() {
        let encoded = encode_parameters(&sample_parameters()).unwrap();
        assert_eq!(&encoded[..9], b"1sSaBbiuf");
        assert!(encoded[9..32].iter().all(|b| *b == 0));
        assert_eq!(encoded.len() % 32, 0);
    }

    #[test]
    fn test_empty_input_is_empty_map() {
        assert!(decode_parameters(&[]).unwrap().is_empty());
        assert!(decode_parameter_map(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_header_only_round_trips() {
        let encoded = encode_parameters(&[]).unwrap();
        assert_eq!(encoded.len(), 32);
        assert!(decode_parameters(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(decode_parameters(&[0x31; 5]), Err(CodecError::MissingHeader));

        let mut wrong_version = [0u8; 32];
        wrong_version[0] = b'2';
        assert_eq!(
            decode_parameters(&wrong_version),
            Err(CodecError::UnsupportedVersion('2'))
        );

        let mut unknown_type = [0u8; 32];
        unknown_type[..2].copy_from_slice(b"1x");
        assert_eq!(decode_parameters(&unknown_type), Err(CodecError::UnknownType('x')));

        // Header promises a parameter the body does not contain.
        let mut truncated = [0u8; 32];
        truncated[..2].copy_from_slice(b"1u");
        assert!(matches!(
            decode_parameters(&truncated),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let name = "a".repeat(40);
        let encoded =
            encode_parameters(&[Parameter::new(name, ParameterValue::Bool(false))]).unwrap();
        let decoded = decode_parameters(&encoded).unwrap();
        assert_eq!(decoded[0].name, "a".repeat(32));
    }

    #[test]
    fn test_string32_too_long_is_rejected() {
        let result = encode_parameters(&[Parameter::new(
            "symbol",
            ParameterValue::String32("x".repeat(33)),
        )]);
        assert_eq!(
            result,
            Err(CodecError::ValueTooLong {
                name: "symbol".into()
            })
        );
    }

    #[test]
    fn test_parameter_map_renders_strings() {
        let encoded = encode_parameters(&sample_parameters()).unwrap();
        let map = decode_parameter_map(&encoded).unwrap();
        assert_eq!(map["from"], "ETH");
        assert_eq!(map["to"], "US Dollar");
        assert_eq!(map["wallet"], "0x5FbDB2315678afecb367f032d93F642f64180aa3");
        assert_eq!(map["payload"], "0xdeadbeef");
        assert_eq!(map["delta"], "-42");
        assert_eq!(map["amount"], "1000000");
        assert_eq!(map["strict"], "true");
    }

    #[test]
    fn test_type_names() {
        for name in ["bytes32", "string32", "address", "bytes", "string", "int256", "uint256", "bool"] {
            let parsed: ParameterType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
            assert_eq!(
                ParameterType::from_header_char(parsed.header_char()).unwrap(),
                parsed
            );
        }
        assert!("uint8".parse::<ParameterType>().is_err());
    }
}
