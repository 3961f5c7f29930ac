//! Multipart message frames.
//!
//! A [`Frame`] is an ordered sequence of typed fields exchanged between
//! facades and module backends. The vocabulary is fixed and versionless:
//! both ends are compiled against the same command set, so a frame with the
//! wrong shape is reported as a [`CoreError::ProtocolViolation`] rather than
//! tolerated.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Positive acknowledgement reply token.
pub const OK: &str = "OK";
/// Negative acknowledgement reply token.
pub const KO: &str = "KO";

/// One typed field of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// UTF-8 text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Str(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Int(value)
    }
}

impl From<Vec<u8>> for Field {
    fn from(value: Vec<u8>) -> Self {
        Field::Bytes(value)
    }
}

/// An ordered, typed multipart message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    fields: Vec<Field>,
}

impl Frame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single-part text frame, the most common shape.
    pub fn of(text: impl Into<String>) -> Self {
        Self {
            fields: vec![Field::Str(text.into())],
        }
    }

    /// Appends a field, builder style.
    pub fn push(mut self, field: impl Into<Field>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Number of fields.
    pub fn parts(&self) -> usize {
        self.fields.len()
    }

    /// True when the frame carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields, in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// A new frame made from the fields at `start..`.
    pub fn tail(&self, start: usize) -> Frame {
        Frame {
            fields: self.fields.get(start..).unwrap_or_default().to_vec(),
        }
    }

    /// The text field at `index`.
    pub fn str_part(&self, index: usize) -> CoreResult<&str> {
        match self.fields.get(index) {
            Some(Field::Str(text)) => Ok(text),
            Some(other) => Err(CoreError::ProtocolViolation(format!(
                "frame part {index} is {other:?}, expected text"
            ))),
            None => Err(CoreError::ProtocolViolation(format!(
                "frame has {} part(s), no part {index}",
                self.fields.len()
            ))),
        }
    }

    /// The integer field at `index`.
    pub fn int_part(&self, index: usize) -> CoreResult<i64> {
        match self.fields.get(index) {
            Some(Field::Int(value)) => Ok(*value),
            Some(other) => Err(CoreError::ProtocolViolation(format!(
                "frame part {index} is {other:?}, expected integer"
            ))),
            None => Err(CoreError::ProtocolViolation(format!(
                "frame has {} part(s), no part {index}",
                self.fields.len()
            ))),
        }
    }

    /// The binary field at `index`.
    pub fn bytes_part(&self, index: usize) -> CoreResult<&[u8]> {
        match self.fields.get(index) {
            Some(Field::Bytes(bytes)) => Ok(bytes),
            Some(other) => Err(CoreError::ProtocolViolation(format!(
                "frame part {index} is {other:?}, expected bytes"
            ))),
            None => Err(CoreError::ProtocolViolation(format!(
                "frame has {} part(s), no part {index}",
                self.fields.len()
            ))),
        }
    }

    /// Enforces the exact part count demanded by the vocabulary for `what`.
    pub fn expect_parts(&self, expected: usize, what: &str) -> CoreResult<()> {
        if self.fields.len() == expected {
            Ok(())
        } else {
            Err(CoreError::ProtocolViolation(format!(
                "{what} must have {expected} part(s), got {}",
                self.fields.len()
            )))
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, field) in self.fields.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            match field {
                Field::Str(text) => write!(f, "{text}")?,
                Field::Int(value) => write!(f, "{value}")?,
                Field::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len())?,
            }
        }
        Ok(())
    }
}
