//! Station code types.

use std::fmt;

/// Error returned when parsing an invalid UIC code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid UIC code: {reason}")]
pub struct InvalidUic {
    reason: &'static str,
}

/// An 8-digit UIC station code, as used by the SNCF station dataset.
///
/// # Examples
///
/// ```
/// use rail_server::domain::UicCode;
///
/// let lyon = UicCode::parse("87723197").unwrap();
/// assert_eq!(lyon.as_str(), "87723197");
///
/// assert!(UicCode::parse("8772319").is_err());
/// assert!(UicCode::parse("8772319A").is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UicCode([u8; 8]);

impl UicCode {
    /// Parse a UIC code. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, InvalidUic> {
        let bytes = s.trim().as_bytes();

        let digits: [u8; 8] = bytes.try_into().map_err(|_| InvalidUic {
            reason: "must be exactly 8 digits",
        })?;

        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(InvalidUic {
                reason: "must contain only digits 0-9",
            });
        }

        Ok(UicCode(digits))
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII digits are ever stored
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for UicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UicCode({})", self.as_str())
    }
}

impl fmt::Display for UicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
