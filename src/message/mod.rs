//! Just enough of the DTLS wire format to tell flights apart.
//!
//! Plaintext record headers (DTLS 1.0/1.2 and the epoch 0 records of DTLS
//! 1.3) are parsed fully, including the handshake header of epoch 0
//! handshake records. Encrypted DTLS 1.3 records are only recognized by
//! their unified header.

mod handshake;
mod record;
mod util;

pub use handshake::{Header, MessageType};
pub use record::{CiphertextHeader, ContentType, DTLSRecord};

use nom::number::complete::be_u16;
use nom::IResult;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    DTLS1_3,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            0xFEFC => ProtocolVersion::DTLS1_3,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::DTLS1_3 => 0xFEFC,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// One record of an outbound datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum WireRecord<'a> {
    Plaintext {
        record: DTLSRecord<'a>,
        /// Handshake header, for handshake records in epoch 0.
        handshake: Option<Header>,
    },
    Ciphertext {
        header: CiphertextHeader,
        body: &'a [u8],
    },
}

impl<'a> WireRecord<'a> {
    /// Content type when visible on the wire.
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            WireRecord::Plaintext { record, .. } => Some(record.content_type),
            WireRecord::Ciphertext { .. } => None,
        }
    }

    /// Whether this record can belong to a handshake flight.
    ///
    /// Encrypted DTLS 1.3 records hide their content type and always count.
    pub fn is_flight_content(&self) -> bool {
        match self {
            WireRecord::Plaintext { record, .. } => record.content_type.is_flight_content(),
            WireRecord::Ciphertext { .. } => true,
        }
    }
}

/// Split a datagram into its records.
pub fn parse_datagram(datagram: &[u8]) -> Result<Vec<WireRecord<'_>>, Error> {
    if datagram.is_empty() {
        return Err(Error::Unclassifiable("empty datagram".into()));
    }

    let mut records = Vec::new();
    let mut input = datagram;

    while !input.is_empty() {
        let (rest, record) = parse_record(input).map_err(|e| {
            Error::Unclassifiable(format!(
                "malformed record at offset {}: {:?}",
                datagram.len() - input.len(),
                e.map_input(|i| i.len())
            ))
        })?;

        if let WireRecord::Plaintext { record, .. } = &record {
            if let ContentType::Unknown(v) = record.content_type {
                return Err(Error::Unclassifiable(format!("unknown content type {}", v)));
            }
        }

        records.push(record);
        input = rest;
    }

    Ok(records)
}

fn parse_record(input: &[u8]) -> IResult<&[u8], WireRecord<'_>> {
    if CiphertextHeader::is_unified(input[0]) {
        let (rest, (header, body)) = CiphertextHeader::parse(input)?;
        return Ok((rest, WireRecord::Ciphertext { header, body }));
    }

    let (rest, record) = DTLSRecord::parse(input)?;

    let handshake = if record.content_type == ContentType::Handshake && record.epoch == 0 {
        let (_, header) = Header::parse(record.fragment)?;
        Some(header)
    } else {
        None
    };

    Ok((rest, WireRecord::Plaintext { record, handshake }))
}
