//! Minimal X.509 CRL reader.
//!
//! Only what revocation checks need: the issuer name and the serial numbers
//! of revoked certificates. Signatures are not verified; CRLs are trusted
//! material registered by the embedder.

use crate::base::neterror::NetError;
use base64::{engine::general_purpose, Engine as _};

const TAG_INTEGER: u8 = 0x02;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_UTC_TIME: u8 = 0x17;
const TAG_GENERALIZED_TIME: u8 = 0x18;

/// Parsed revocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationList {
    /// DER of the issuer `Name`.
    pub issuer: Vec<u8>,
    /// Revoked serial numbers, big-endian without leading zero bytes.
    pub revoked: Vec<Vec<u8>>,
}

impl RevocationList {
    /// Parse a CRL in PEM (`X509 CRL`) or DER form.
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        let der = match std::str::from_utf8(data) {
            Ok(text) if text.contains("-----BEGIN X509 CRL-----") => pem_to_der(text)?,
            _ => data.to_vec(),
        };
        parse_der(&der)
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        let serial = strip_leading_zeros(serial);
        self.revoked.iter().any(|s| s == serial)
    }
}

fn malformed(what: &str) -> NetError {
    NetError::handshake_failed(format!("malformed CRL: {}", what))
}

fn pem_to_der(text: &str) -> Result<Vec<u8>, NetError> {
    let body: String = text
        .lines()
        .skip_while(|l| !l.starts_with("-----BEGIN X509 CRL-----"))
        .skip(1)
        .take_while(|l| !l.starts_with("-----END"))
        .map(str::trim)
        .collect();
    general_purpose::STANDARD
        .decode(body)
        .map_err(|_| malformed("bad base64"))
}

pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// One DER element: tag, contents, and the bytes after it.
struct Tlv<'a> {
    tag: u8,
    value: &'a [u8],
    rest: &'a [u8],
}

fn read_tlv(buf: &[u8]) -> Result<Tlv<'_>, NetError> {
    let (&tag, after_tag) = buf.split_first().ok_or_else(|| malformed("unexpected end"))?;
    let (&first, mut after_len) = after_tag
        .split_first()
        .ok_or_else(|| malformed("missing length"))?;

    let len = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || after_len.len() < count {
            return Err(malformed("bad length"));
        }
        let len = after_len[..count]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        after_len = &after_len[count..];
        len
    };

    if after_len.len() < len {
        return Err(malformed("truncated element"));
    }
    Ok(Tlv {
        tag,
        value: &after_len[..len],
        rest: &after_len[len..],
    })
}

fn expect(buf: &[u8], tag: u8, what: &str) -> Result<Tlv<'_>, NetError> {
    let tlv = read_tlv(buf)?;
    if tlv.tag != tag {
        return Err(malformed(what));
    }
    Ok(tlv)
}

fn parse_der(der: &[u8]) -> Result<RevocationList, NetError> {
    let cert_list = expect(der, TAG_SEQUENCE, "CertificateList")?;
    let tbs = expect(cert_list.value, TAG_SEQUENCE, "TBSCertList")?;

    let mut cur = tbs.value;

    // version is optional
    let mut next = read_tlv(cur)?;
    if next.tag == TAG_INTEGER {
        cur = next.rest;
        next = read_tlv(cur)?;
    }
    if next.tag != TAG_SEQUENCE {
        return Err(malformed("signature algorithm"));
    }
    cur = next.rest;

    let issuer = expect(cur, TAG_SEQUENCE, "issuer")?;
    let issuer_der = cur[..cur.len() - issuer.rest.len()].to_vec();
    cur = issuer.rest;

    let this_update = read_tlv(cur)?;
    if this_update.tag != TAG_UTC_TIME && this_update.tag != TAG_GENERALIZED_TIME {
        return Err(malformed("thisUpdate"));
    }
    cur = this_update.rest;

    let mut revoked = Vec::new();
    while !cur.is_empty() {
        let element = read_tlv(cur)?;
        cur = element.rest;
        match element.tag {
            TAG_UTC_TIME | TAG_GENERALIZED_TIME => {}
            TAG_SEQUENCE => {
                let mut entries = element.value;
                while !entries.is_empty() {
                    let entry = expect(entries, TAG_SEQUENCE, "revoked entry")?;
                    let serial = expect(entry.value, TAG_INTEGER, "serial")?;
                    revoked.push(strip_leading_zeros(serial.value).to_vec());
                    entries = entry.rest;
                }
            }
            // crlExtensions [0]
            _ => {}
        }
    }

    Ok(RevocationList {
        issuer: issuer_der,
        revoked,
    })
}
