//! Protocol version greeting

use super::DecodeError;
use std::fmt;

/// Length of `"RFB xxx.yyy\n"`
pub const GREETING_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const V3_3: ProtocolVersion = ProtocolVersion { major: 3, minor: 3 };
    pub const V3_7: ProtocolVersion = ProtocolVersion { major: 3, minor: 7 };
    pub const V3_8: ProtocolVersion = ProtocolVersion { major: 3, minor: 8 };

    const SUPPORTED: [ProtocolVersion; 3] = [Self::V3_3, Self::V3_7, Self::V3_8];

    /// Map an advertised version onto the supported set.
    ///
    /// 3.889 (Apple Remote Desktop) is treated as 3.8. Anything else rounds
    /// down to the highest supported version not above it; below 3.3 is an
    /// error.
    pub fn normalize(major: u16, minor: u16) -> Result<Self, DecodeError> {
        if (major, minor) == (3, 889) {
            return Ok(Self::V3_8);
        }
        let advertised = ProtocolVersion { major, minor };
        Self::SUPPORTED
            .iter()
            .rev()
            .find(|v| **v <= advertised)
            .copied()
            .ok_or(DecodeError::UnsupportedVersion(major, minor))
    }

    /// 3.7 introduced the security type list
    pub fn has_security_list(&self) -> bool {
        *self >= Self::V3_7
    }

    /// 3.8 added SecurityResult for type None and failure reasons
    pub fn has_failure_reason(&self) -> bool {
        *self >= Self::V3_8
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parse the 12-byte greeting into the advertised (major, minor)
pub fn parse_greeting(data: &[u8]) -> Result<(u16, u16), DecodeError> {
    let bad = || DecodeError::BadGreeting(String::from_utf8_lossy(data).into_owned());
    if data.len() != GREETING_LEN
        || &data[..4] != b"RFB "
        || data[7] != b'.'
        || data[11] != b'\n'
    {
        return Err(bad());
    }
    let number = |digits: &[u8]| -> Option<u16> {
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    };
    match (number(&data[4..7]), number(&data[8..11])) {
        (Some(major), Some(minor)) => Ok((major, minor)),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_parses() {
        assert_eq!(parse_greeting(b"RFB 003.008\n").unwrap(), (3, 8));
        assert_eq!(parse_greeting(b"RFB 003.889\n").unwrap(), (3, 889));
        assert!(parse_greeting(b"RFB 003.008").is_err());
        assert!(parse_greeting(b"RFB 0x3.008\n").is_err());
        assert!(parse_greeting(b"SSH-2.0-Open").is_err());
    }

    #[test]
    fn versions_round_down_to_supported() {
        assert_eq!(ProtocolVersion::normalize(3, 3).unwrap(), ProtocolVersion::V3_3);
        assert_eq!(ProtocolVersion::normalize(3, 5).unwrap(), ProtocolVersion::V3_3);
        assert_eq!(ProtocolVersion::normalize(3, 7).unwrap(), ProtocolVersion::V3_7);
        assert_eq!(ProtocolVersion::normalize(3, 889).unwrap(), ProtocolVersion::V3_8);
        assert_eq!(ProtocolVersion::normalize(4, 1).unwrap(), ProtocolVersion::V3_8);
        assert!(ProtocolVersion::normalize(3, 2).unwrap_err().is_fatal());
        assert!(ProtocolVersion::normalize(2, 9).is_err());
    }

    #[test]
    fn negotiation_takes_the_lower_version() {
        assert_eq!(ProtocolVersion::V3_8.min(ProtocolVersion::V3_3), ProtocolVersion::V3_3);
        assert!(!ProtocolVersion::V3_3.has_security_list());
        assert!(ProtocolVersion::V3_7.has_security_list());
        assert!(!ProtocolVersion::V3_7.has_failure_reason());
    }
}
