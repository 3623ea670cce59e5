//! G.711 codec selection (C1).
//!
//! Narrowband 8 kHz telephony audio: A-law (PCMA, RTP payload type 8) and
//! mu-law (PCMU, RTP payload type 0). Stateless sample-level encode/decode,
//! 8 bits per sample — no resampling, no channel mixing, one byte in,
//! one byte out.

mod g711;

use serde::{Deserialize, Serialize};

/// Which G.711 variant a call negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Alaw,
    Ulaw,
}

impl Codec {
    /// RTP payload type for this codec (RFC 3551 static assignment).
    pub fn payload_type(self) -> u8 {
        match self {
            Codec::Alaw => 8,
            Codec::Ulaw => 0,
        }
    }

    /// The byte that represents silence on the wire for this codec.
    pub fn silence_byte(self) -> u8 {
        match self {
            Codec::Alaw => 0xD5,
            Codec::Ulaw => 0xFF,
        }
    }

    /// Resolve a codec from an RTP static payload type, if recognized.
    pub fn from_payload_type(pt: u8) -> Option<Codec> {
        match pt {
            8 => Some(Codec::Alaw),
            0 => Some(Codec::Ulaw),
            _ => None,
        }
    }

    pub fn decode_sample(self, byte: u8) -> i16 {
        match self {
            Codec::Alaw => g711::alaw_decode(byte),
            Codec::Ulaw => g711::ulaw_decode(byte),
        }
    }

    pub fn encode_sample(self, sample: i16) -> u8 {
        match self {
            Codec::Alaw => g711::alaw_encode(sample),
            Codec::Ulaw => g711::ulaw_encode(sample),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_types_match_rfc3551() {
        assert_eq!(Codec::Alaw.payload_type(), 8);
        assert_eq!(Codec::Ulaw.payload_type(), 0);
    }

    #[test]
    fn silence_bytes_match_spec() {
        assert_eq!(Codec::Alaw.silence_byte(), 0xD5);
        assert_eq!(Codec::Ulaw.silence_byte(), 0xFF);
    }

    #[test]
    fn from_payload_type_roundtrips() {
        assert_eq!(Codec::from_payload_type(8), Some(Codec::Alaw));
        assert_eq!(Codec::from_payload_type(0), Some(Codec::Ulaw));
        assert_eq!(Codec::from_payload_type(96), None);
    }
}
