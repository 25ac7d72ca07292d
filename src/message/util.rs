use nom::number::complete::{be_u16, be_u32};
use nom::IResult;

/// Parse a 48 bit big endian unsigned integer (DTLS record sequence number).
pub fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, hi) = be_u16(input)?;
    let (input, lo) = be_u32(input)?;
    Ok((input, ((hi as u64) << 32) | lo as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_u48() {
        let (rest, v) = be_u48(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xff]).unwrap();
        assert_eq!(v, (1 << 32) | 2);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn short_input_is_error() {
        assert!(be_u48(&[0, 0, 0]).is_err());
    }
}
