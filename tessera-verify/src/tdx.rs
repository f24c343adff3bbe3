use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

const HEADER_LEN: usize = 48;
/// report_data offset inside the TD report body.
const REPORT_DATA_IN_BODY: usize = 520;
const REPORT_DATA_LEN: usize = 64;
/// v5 quotes prefix the body with a 2-byte type and 4-byte size.
const V5_BODY_DESCRIPTOR: usize = 6;
const TEE_TYPE_TDX: u32 = 0x81;

/// The 64-byte report_data of a TDX quote, split the way the provider binds it:
/// the signing address in the first half, the request nonce in the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteReportData {
    pub version: u16,
    pub bytes: [u8; REPORT_DATA_LEN],
}

impl QuoteReportData {
    pub fn address_half(&self) -> &[u8] {
        &self.bytes[..32]
    }

    pub fn nonce_half(&self) -> &[u8] {
        &self.bytes[32..]
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce_half())
    }
}

/// Parse a TDX quote given as hex (optionally `0x`-prefixed) or base64.
pub fn parse_quote(quote: &str) -> Option<QuoteReportData> {
    let bytes = decode_quote(quote)?;
    report_data(&bytes)
}

fn decode_quote(quote: &str) -> Option<Vec<u8>> {
    let q = quote.trim();
    let stripped = q.strip_prefix("0x").unwrap_or(q);
    if let Ok(bytes) = hex::decode(stripped) {
        return Some(bytes);
    }
    STANDARD.decode(q).ok()
}

pub fn report_data(quote: &[u8]) -> Option<QuoteReportData> {
    if quote.len() < HEADER_LEN {
        return None;
    }
    let version = u16::from_le_bytes([quote[0], quote[1]]);
    let tee_type = u32::from_le_bytes([quote[4], quote[5], quote[6], quote[7]]);
    if tee_type != TEE_TYPE_TDX {
        tracing::debug!(tee_type, "quote is not a TDX quote");
        return None;
    }
    let offset = match version {
        4 => HEADER_LEN + REPORT_DATA_IN_BODY,
        5 => HEADER_LEN + V5_BODY_DESCRIPTOR + REPORT_DATA_IN_BODY,
        _ => return None,
    };
    let slice = quote.get(offset..offset + REPORT_DATA_LEN)?;
    let mut bytes = [0u8; REPORT_DATA_LEN];
    bytes.copy_from_slice(slice);
    Some(QuoteReportData { version, bytes })
}

/// Assemble a minimal quote carrying `report_data`. Only meaningful for fixtures.
pub fn synthetic_quote(version: u16, report_data: &[u8; REPORT_DATA_LEN]) -> Vec<u8> {
    let offset = match version {
        5 => HEADER_LEN + V5_BODY_DESCRIPTOR + REPORT_DATA_IN_BODY,
        _ => HEADER_LEN + REPORT_DATA_IN_BODY,
    };
    let mut quote = vec![0u8; offset + REPORT_DATA_LEN + 16];
    quote[..2].copy_from_slice(&version.to_le_bytes());
    quote[4..8].copy_from_slice(&TEE_TYPE_TDX.to_le_bytes());
    quote[offset..offset + REPORT_DATA_LEN].copy_from_slice(report_data);
    quote
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> [u8; 64] {
        let mut d = [0u8; 64];
        d[..32].fill(0x11);
        d[32..].fill(0xab);
        d
    }

    #[test]
    fn v4_hex_quote() {
        let quote = hex::encode(synthetic_quote(4, &data()));
        let rd = parse_quote(&quote).unwrap();
        assert_eq!(rd.version, 4);
        assert_eq!(rd.address_half(), &[0x11; 32]);
        assert_eq!(rd.nonce_hex(), "ab".repeat(32));
    }

    #[test]
    fn v5_base64_quote() {
        let quote = STANDARD.encode(synthetic_quote(5, &data()));
        let rd = parse_quote(&quote).unwrap();
        assert_eq!(rd.version, 5);
        assert_eq!(rd.nonce_half(), &[0xab; 32]);
    }

    #[test]
    fn rejects_short_or_foreign_quotes() {
        assert_eq!(parse_quote(""), None);
        assert_eq!(parse_quote("0x0400"), None);
        let mut sgx = synthetic_quote(4, &data());
        sgx[4] = 0x00;
        assert_eq!(report_data(&sgx), None);
        let mut v3 = synthetic_quote(4, &data());
        v3[0] = 3;
        assert_eq!(report_data(&v3), None);
    }
}
