use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

/// I2P swaps `+/` for `-~` so destinations survive URLs and file names.
const I2P_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("invalid i2p base64 alphabet"),
    };

const I2P_BASE64: GeneralPurpose = GeneralPurpose::new(
    &I2P_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes with the I2P base64 alphabet (padded).
pub fn i2p_base64_encode(bytes: &[u8]) -> String {
    I2P_BASE64.encode(bytes)
}

/// Decode an I2P base64 string. Padding is optional.
pub fn i2p_base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    I2P_BASE64.decode(input.trim())
}

/// Lowercase RFC 4648 base32 without padding, as used by `.b32.i2p` names.
pub fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

    let mut out = String::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &b in bytes {
        buffer = (buffer << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    // Flush the tail, left-aligned in the last 5-bit group
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_uses_i2p_alphabet() {
        // 0xfb 0xff encodes to "+/8=" in standard base64
        assert_eq!(i2p_base64_encode(&[0xfb, 0xff]), "-~8=");
        assert_eq!(i2p_base64_decode("-~8=").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn base64_decode_accepts_missing_padding() {
        assert_eq!(i2p_base64_decode("-~8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn base64_rejects_standard_alphabet() {
        assert!(i2p_base64_decode("+/8=").is_err());
    }

    #[test]
    fn base32_matches_rfc4648_vectors() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"fo"), "mzxq");
        assert_eq!(base32_encode(b"foo"), "mzxw6");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn base32_of_hash_is_52_chars() {
        assert_eq!(base32_encode(&[0u8; 32]).len(), 52);
    }
}
