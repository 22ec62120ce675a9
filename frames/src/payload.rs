//! Typed views over frame payloads.
//!
//! Numbers cross the protobuf codec as doubles, so integer fields are read
//! leniently: `3` and `3.0` both parse, `3.5` does not.

use serde_json::Value;

use crate::{Data, ErrorCode, Frame};

#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("field {field} is not an integer in range")]
    NotInteger { field: &'static str },
}

impl ErrorCode for PayloadError {
    fn error_code(&self) -> &'static str {
        "E_BAD_PAYLOAD"
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
fn int_field(data: &Value, field: &'static str) -> Result<i64, PayloadError> {
    let value = data.get(field).ok_or(PayloadError::Missing(field))?;
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    let f = value.as_f64().ok_or(PayloadError::NotInteger { field })?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Ok(f as i64);
    }
    Err(PayloadError::NotInteger { field })
}

/// `paint:put` request and push body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintPayload {
    pub x: i64,
    pub y: i64,
    pub color: u8,
}

impl PaintPayload {
    #[must_use]
    pub fn to_data(self) -> Data {
        let mut data = Data::new();
        data.insert("x".into(), self.x.into());
        data.insert("y".into(), self.y.into());
        data.insert("color".into(), self.color.into());
        data
    }

    /// # Errors
    ///
    /// [`PayloadError`] when a field is missing or not a whole number, or the
    /// color does not fit a byte.
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let x = int_field(&frame.data, "x")?;
        let y = int_field(&frame.data, "y")?;
        let color = u8::try_from(int_field(&frame.data, "color")?).map_err(|_| PayloadError::NotInteger { field: "color" })?;
        Ok(Self { x, y, color })
    }
}

/// `board:presence` push body and `board:join` done body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePayload {
    pub count: usize,
}

impl PresencePayload {
    pub const FIELD: &'static str = "online";

    #[must_use]
    pub fn to_data(self) -> Data {
        let mut data = Data::new();
        data.insert(Self::FIELD.into(), self.count.into());
        data
    }

    /// # Errors
    ///
    /// [`PayloadError`] when `online` is missing or negative.
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let count = int_field(&frame.data, Self::FIELD)?;
        let count = usize::try_from(count).map_err(|_| PayloadError::NotInteger { field: Self::FIELD })?;
        Ok(Self { count })
    }
}
