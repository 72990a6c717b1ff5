//! Argument validation.
//!
//! Every check runs before any task or buffer exists. A failure carries
//! the message returned to the caller as an illegal-argument outcome.

use std::os::unix::io::RawFd;

use thiserror::Error;

use spidev_core::outcome::Outcome;
use spidev_core::value::Value;

pub const EXPECTED_STRING: &str = "Expected `arg` to be a string.";
pub const EXPECTED_INT: &str = "Expected `arg` to be an integer.";
pub const EXPECTED_INT_PAIR: &str = "Expected `arg` to be a List<int> with size 2.";
pub const EXPECTED_MAP: &str = "Expected `arg` to be a map.";

/// Validation failure for one argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ArgError(String);

impl ArgError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<ArgError> for Outcome {
    fn from(e: ArgError) -> Self {
        Outcome::IllegalArgument(e.0)
    }
}

pub type ArgResult<T> = Result<T, ArgError>;

fn field_int(arg: &Value, field: &str) -> ArgResult<i64> {
    arg.map_get(field)
        .and_then(Value::as_int)
        .ok_or_else(|| ArgError::new(format!("Expected `arg['{}']` to be an integer.", field)))
}

/// Narrow a decoded integer to the ABI width of `T`.
fn narrow<T>(v: i64, what: &str) -> ArgResult<T>
where
    T: TryFrom<i64>,
{
    T::try_from(v).map_err(|_| {
        ArgError::new(format!(
            "Expected `{}` to fit in {} bits.",
            what,
            std::mem::size_of::<T>() * 8
        ))
    })
}

/// `open`: a textual path.
pub fn path(arg: &Value) -> ArgResult<&str> {
    arg.as_str().ok_or_else(|| ArgError::new(EXPECTED_STRING))
}

/// `get*` / `close`: a bare handle.
pub fn handle(arg: &Value) -> ArgResult<RawFd> {
    let fd = arg.as_int().ok_or_else(|| ArgError::new(EXPECTED_INT))?;
    narrow(fd, "arg")
}

/// `set*`: `[handle, value]`, both integers.
pub fn handle_and_value<T>(arg: &Value) -> ArgResult<(RawFd, T)>
where
    T: TryFrom<i64>,
{
    let (fd, value) = match arg.as_list() {
        Some([Value::Int(fd), Value::Int(value)]) => (*fd, *value),
        _ => return Err(ArgError::new(EXPECTED_INT_PAIR)),
    };
    Ok((narrow(fd, "arg[0]")?, narrow(value, "arg[1]")?))
}

/// Validated `transmit` argument. `buffer` still borrows the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitArgs<'a> {
    pub fd: RawFd,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: bool,
    pub buffer: &'a [u8],
}

/// `transmit`: map with `fd`, `speed`, `delay`, `wordSize`, `csChange`,
/// `buffer`, checked in that order. The first bad field wins.
pub fn transmit(arg: &Value) -> ArgResult<TransmitArgs<'_>> {
    if !matches!(arg, Value::Map(_)) {
        return Err(ArgError::new(EXPECTED_MAP));
    }

    let fd = narrow(field_int(arg, "fd")?, "arg['fd']")?;
    let speed_hz = narrow(field_int(arg, "speed")?, "arg['speed']")?;
    let delay_usecs = narrow(field_int(arg, "delay")?, "arg['delay']")?;
    let bits_per_word = narrow(field_int(arg, "wordSize")?, "arg['wordSize']")?;
    let cs_change = arg
        .map_get("csChange")
        .and_then(Value::as_bool)
        .ok_or_else(|| ArgError::new("Expected `arg['csChange']` to be a bool."))?;
    let buffer = arg
        .map_get("buffer")
        .and_then(Value::as_bytes)
        .ok_or_else(|| ArgError::new("Expected `arg['buffer']` to be a uint8 array."))?;

    Ok(TransmitArgs {
        fd,
        speed_hz,
        delay_usecs,
        bits_per_word,
        cs_change,
        buffer,
    })
}
