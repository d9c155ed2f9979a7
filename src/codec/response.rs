//! Single response values written back on-chain.
//!
//! An API response value is cast to the type named by the `_type` reserved
//! parameter, scaled by `_times` when numeric, and ABI-encoded as one value.

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, I256, U256};
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use serde_json::Value;
use thiserror::Error;

use super::{pad_word, ParameterType, ParameterValue};

// Anything beyond this many decimal digits cannot fit in 256 bits.
const MAX_DECIMAL_EXPONENT: i64 = 160;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("value {0} cannot be cast to a number")]
    InvalidNumber(String),
    #[error("_times value {0:?} is not a number")]
    InvalidTimes(String),
    #[error("value {value} is out of range for {parameter_type}")]
    OutOfRange {
        value: String,
        parameter_type: ParameterType,
    },
    #[error("value {0} is not a valid address")]
    InvalidAddress(String),
    #[error("value {0} is not 0x-prefixed hex")]
    InvalidBytes(String),
    #[error("value {0:?} does not fit in 32 bytes")]
    ValueTooLong(String),
}

/// Casts a JSON value to `response_type` and ABI-encodes it.
pub fn encode_response_value(
    value: &Value,
    response_type: ParameterType,
    times: Option<&str>,
) -> Result<Bytes, ResponseError> {
    let cast = cast_value(value, response_type, times)?;
    Ok(Bytes::from(abi::encode(&[response_token(&cast)?])))
}

/// Casts a JSON value to a typed parameter value. `times` only applies to
/// numeric types and is ignored otherwise.
pub fn cast_value(
    value: &Value,
    response_type: ParameterType,
    times: Option<&str>,
) -> Result<ParameterValue, ResponseError> {
    match response_type {
        ParameterType::Int256 | ParameterType::Uint256 => {
            let scaled = cast_number(value, times)?;
            to_numeric(scaled, response_type)
        }
        ParameterType::Bool => Ok(ParameterValue::Bool(cast_bool(value))),
        ParameterType::Bytes32 => {
            let text = value_to_string(value);
            let word = pad_word(text.as_bytes()).ok_or(ResponseError::ValueTooLong(text))?;
            Ok(ParameterValue::Bytes32(word))
        }
        ParameterType::String32 => {
            let text = value_to_string(value);
            if text.len() > 32 {
                return Err(ResponseError::ValueTooLong(text));
            }
            Ok(ParameterValue::String32(text))
        }
        ParameterType::Address => {
            let text = value_to_string(value);
            text.trim()
                .parse::<Address>()
                .map(ParameterValue::Address)
                .map_err(|_| ResponseError::InvalidAddress(text))
        }
        ParameterType::Bytes => {
            let text = value_to_string(value);
            let hex_body = text
                .strip_prefix("0x")
                .ok_or_else(|| ResponseError::InvalidBytes(text.clone()))?;
            hex::decode(hex_body)
                .map(ParameterValue::Bytes)
                .map_err(|_| ResponseError::InvalidBytes(text.clone()))
        }
        ParameterType::String => Ok(ParameterValue::String(value_to_string(value))),
    }
}

fn response_token(value: &ParameterValue) -> Result<Token, ResponseError> {
    value.to_token("_response").map_err(|_| ResponseError::ValueTooLong(value.to_string()))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cast_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Null => false,
        Value::Number(number) => number.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => {
            let text = text.trim();
            !(text.is_empty() || text == "0" || text.eq_ignore_ascii_case("false"))
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn cast_number(value: &Value, times: Option<&str>) -> Result<BigInt, ResponseError> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        Value::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
        other => return Err(ResponseError::InvalidNumber(other.to_string())),
    };
    let (mut mantissa, mut exponent) =
        parse_decimal(&text).ok_or_else(|| ResponseError::InvalidNumber(text.clone()))?;

    if let Some(times) = times.map(str::trim).filter(|t| !t.is_empty()) {
        let (times_mantissa, times_exponent) =
            parse_decimal(times).ok_or_else(|| ResponseError::InvalidTimes(times.to_string()))?;
        mantissa *= times_mantissa;
        // Saturated exponents land in the too-large or rounds-to-zero branches below.
        exponent = exponent.saturating_add(times_exponent);
    }

    if mantissa.is_zero() {
        return Ok(mantissa);
    }
    if exponent >= 0 {
        if exponent > MAX_DECIMAL_EXPONENT {
            return Err(ResponseError::InvalidNumber(text));
        }
        Ok(mantissa * BigInt::from(10u32).pow(exponent as u32))
    } else {
        let shift = exponent.unsigned_abs();
        let digits = mantissa.magnitude().to_str_radix(10).len() as u64;
        if shift > digits {
            return Ok(BigInt::zero());
        }
        // Integer division truncates toward zero.
        Ok(mantissa / BigInt::from(10u32).pow(shift as u32))
    }
}

fn to_numeric(value: BigInt, parameter_type: ParameterType) -> Result<ParameterValue, ResponseError> {
    let decimal = value.to_string();
    let out_of_range = || ResponseError::OutOfRange {
        value: decimal.clone(),
        parameter_type,
    };
    match parameter_type {
        ParameterType::Uint256 => {
            if value.sign() == Sign::Minus {
                return Err(out_of_range());
            }
            U256::from_dec_str(&decimal)
                .map(ParameterValue::Uint256)
                .map_err(|_| out_of_range())
        }
        _ => I256::from_dec_str(&decimal)
            .map(ParameterValue::Int256)
            .map_err(|_| out_of_range()),
    }
}

/// Parses a decimal literal (`-12.5`, `3e-4`, `+7`) into `(mantissa, exponent)`
/// so that the value equals `mantissa * 10^exponent`.
fn parse_decimal(text: &str) -> Option<(BigInt, i64)> {
    let (number, exponent) = match text.find(['e', 'E']) {
        Some(index) => (&text[..index], text[index + 1..].parse::<i64>().ok()?),
        None => (text, 0),
    };
    let (negative, number) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };
    let (integer, fraction) = number.split_once('.').unwrap_or((number, ""));
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if !integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{integer}{fraction}");
    let mut mantissa = digits.parse::<BigInt>().ok()?;
    if negative {
        mantissa = -mantissa;
    }
    Some((mantissa, exponent.checked_sub(fraction.len() as i64)?))
}
