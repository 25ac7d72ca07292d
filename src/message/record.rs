use super::util::be_u48;
use super::ProtocolVersion;
use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// DTLS 1.0/1.2 plaintext record header and fragment.
#[derive(Debug, PartialEq, Eq)]
pub struct DTLSRecord<'a> {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub length: u16,
    pub fragment: &'a [u8],
}

impl<'a> DTLSRecord<'a> {
    pub const HEADER_LEN: usize = 13;

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], DTLSRecord<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            DTLSRecord {
                content_type,
                version,
                epoch,
                sequence_number,
                length,
                fragment,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.epoch.to_be_bytes());
        output.extend_from_slice(&self.sequence_number.to_be_bytes()[2..]);
        output.extend_from_slice(&self.length.to_be_bytes());
        output.extend_from_slice(self.fragment);
    }
}

/// DTLS 1.3 unified header of an encrypted record (RFC 9147 4).
///
/// Only the bits visible on the wire are kept. Connection IDs are not
/// supported since their length is negotiated out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiphertextHeader {
    /// Low two bits of the epoch.
    pub epoch_bits: u8,
    /// Low 8 or 16 bits of the (encrypted) sequence number.
    pub sequence: u16,
    /// Whether the sequence number is 16 bits.
    pub long_sequence: bool,
    /// Explicit length, when present.
    pub length: Option<u16>,
}

impl CiphertextHeader {
    const FIXED_BITS: u8 = 0b0010_0000;
    const CID_BIT: u8 = 0b0001_0000;
    const SEQ_BIT: u8 = 0b0000_1000;
    const LEN_BIT: u8 = 0b0000_0100;

    /// Whether the first byte of a record is a unified header.
    pub fn is_unified(first: u8) -> bool {
        first & 0b1110_0000 == Self::FIXED_BITS
    }

    /// Parse the header and return the encrypted body.
    ///
    /// Without an explicit length the record runs to the end of the datagram.
    pub fn parse(input: &[u8]) -> IResult<&[u8], (CiphertextHeader, &[u8])> {
        let (rest, first) = be_u8(input)?;

        if !Self::is_unified(first) || first & Self::CID_BIT > 0 {
            return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
        }

        let long_sequence = first & Self::SEQ_BIT > 0;
        let (rest, sequence) = if long_sequence {
            be_u16(rest)?
        } else {
            let (rest, s) = be_u8(rest)?;
            (rest, s as u16)
        };

        let (rest, length) = if first & Self::LEN_BIT > 0 {
            let (rest, l) = be_u16(rest)?;
            (rest, Some(l))
        } else {
            (rest, None)
        };

        let (rest, body) = match length {
            Some(l) => take(l as usize)(rest)?,
            None => (&rest[rest.len()..], rest),
        };

        let header = CiphertextHeader {
            epoch_bits: first & 0b11,
            sequence,
            long_sequence,
            length,
        };

        Ok((rest, (header, body)))
    }

    /// Serialize with a 16 bit sequence number and an explicit length.
    pub fn serialize(epoch: u16, sequence: u64, body: &[u8], output: &mut Vec<u8>) {
        output.push(Self::FIXED_BITS | Self::SEQ_BIT | Self::LEN_BIT | (epoch as u8 & 0b11));
        output.extend_from_slice(&(sequence as u16).to_be_bytes());
        output.extend_from_slice(&(body.len() as u16).to_be_bytes());
        output.extend_from_slice(body);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Ack,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            26 => ContentType::Ack,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Ack => 26,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// Whether records of this type take part in a handshake flight.
    pub fn is_flight_content(&self) -> bool {
        matches!(
            self,
            ContentType::Handshake | ContentType::ChangeCipherSpec | ContentType::Ack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProtocolVersion;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // sequence_number
        0x00, 0x10, // length
        // fragment
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10,
    ];

    #[test]
    fn roundtrip() {
        let record = DTLSRecord {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS1_2,
            epoch: 1,
            sequence_number: 1,
            length: 16,
            fragment: &RECORD[13..],
        };

        let mut serialized = Vec::new();
        record.serialize(&mut serialized);
        assert_eq!(serialized, RECORD);

        let (rest, parsed) = DTLSRecord::parse(&serialized).unwrap();
        assert_eq!(parsed, record);

        assert!(rest.is_empty());
    }

    #[test]
    fn truncated_fragment_is_error() {
        assert!(DTLSRecord::parse(&RECORD[..20]).is_err());
    }

    #[test]
    fn unified_header_with_length() {
        let mut out = Vec::new();
        CiphertextHeader::serialize(2, 0x1_0005, &[9, 9, 9], &mut out);
        assert!(CiphertextHeader::is_unified(out[0]));

        let (rest, (header, body)) = CiphertextHeader::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.epoch_bits, 2);
        assert_eq!(header.sequence, 5);
        assert!(header.long_sequence);
        assert_eq!(header.length, Some(3));
        assert_eq!(body, &[9, 9, 9]);
    }

    #[test]
    fn unified_header_without_length_takes_rest() {
        // 001 C=0 S=0 L=0 EE=11, 8 bit sequence
        let input = [0b0010_0011, 0x07, 1, 2, 3, 4];
        let (rest, (header, body)) = CiphertextHeader::parse(&input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.epoch_bits, 3);
        assert_eq!(header.sequence, 7);
        assert!(!header.long_sequence);
        assert_eq!(header.length, None);
        assert_eq!(body, &[1, 2, 3, 4]);
    }

    #[test]
    fn unified_header_with_cid_is_rejected() {
        let input = [0b0011_1100, 0x00, 0x01, 0x00, 0x00];
        assert!(CiphertextHeader::parse(&input).is_err());
    }

    #[test]
    fn flight_content() {
        assert!(ContentType::Handshake.is_flight_content());
        assert!(ContentType::ChangeCipherSpec.is_flight_content());
        assert!(!ContentType::ApplicationData.is_flight_content());
        assert!(!ContentType::Alert.is_flight_content());
    }
}
