// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Time-stamp request and token types.
//
// A token is the DER `ContentInfo` the TSA returned, kept byte-for-byte,
// together with the fields parsed out of its TSTInfo. The only way to get a
// `TimestampToken` is to parse DER, so every instance in the process has
// passed structural validation.
//
// ```text
// ContentInfo { contentType = signedData,
//   content [0] SignedData { version, digestAlgorithms SET,
//     encapContentInfo { eContentType = id-ct-TSTInfo,
//       eContent [0] OCTET STRING { TSTInfo } },
//     certificates [0] OPTIONAL, crls [1] OPTIONAL, signerInfos SET } }
// ```

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use notarium_core::error::{NotariumError, ProtocolReason, Result};
use notarium_core::types::{FINGERPRINT_LEN, Fingerprint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::der::{
    self, DerReader, TAG_BOOLEAN, TAG_CONTEXT_0, TAG_CONTEXT_1, TAG_GENERALIZED_TIME,
    TAG_INTEGER, TAG_NULL, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE, TAG_SET, Tlv,
};

// ---------------------------------------------------------------------------
// Object identifiers (encoded content bytes)
// ---------------------------------------------------------------------------

/// 2.16.840.1.101.3.4.2.1 (SHA-256)
pub const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// 1.2.840.113549.1.7.2 (CMS signedData)
pub const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];

/// 1.2.840.113549.1.9.16.1.4 (id-ct-TSTInfo)
pub const OID_TST_INFO: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x01, 0x04,
];

/// GeneralizedTime layout used by TSAs: seconds precision, optional
/// fraction, always UTC.
const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.fZ";

fn malformed(detail: impl Into<String>) -> NotariumError {
    NotariumError::protocol(ProtocolReason::MalformedDer, detail)
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What we ask the TSA to attest to.
///
/// The hash algorithm is always SHA-256 and is therefore not a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    pub fingerprint: Fingerprint,
    pub nonce: Option<u64>,
    /// Ask the TSA to include its signing certificate.
    pub cert_req: bool,
    /// Requested TSA policy, dotted OID form.
    pub policy: Option<String>,
}

impl TimestampRequest {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            nonce: None,
            cert_req: false,
            policy: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_cert_req(mut self, cert_req: bool) -> Self {
        self.cert_req = cert_req;
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }
}

// ---------------------------------------------------------------------------
// TSTInfo
// ---------------------------------------------------------------------------

/// Fields of a TSTInfo that Notarium relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    /// TSA policy under which the token was issued (dotted OID).
    pub policy: String,
    /// The fingerprint the TSA attests to.
    pub imprint: Fingerprint,
    /// Serial number, lowercase hex of the INTEGER content.
    pub serial: String,
    pub gen_time: DateTime<Utc>,
    /// Raw INTEGER content of the nonce, if the TSA echoed one.
    pub nonce: Option<Vec<u8>>,
}

impl TstInfo {
    /// The echoed nonce as a `u64`, if present and representable.
    pub fn nonce_u64(&self) -> Option<u64> {
        self.nonce
            .as_deref()
            .and_then(|content| der::integer_as_u64(content).ok().flatten())
    }

    fn parse(data: &[u8]) -> Result<Self> {
        let seq = der::parse_single(data, TAG_SEQUENCE)?;
        let mut r = seq.reader();

        let version = r.read(TAG_INTEGER)?.as_u64()?;
        if version != Some(1) {
            return Err(NotariumError::protocol(
                ProtocolReason::UnsupportedVersion,
                format!("TSTInfo version {version:?}, expected 1"),
            ));
        }

        let policy = der::decode_oid(r.read(TAG_OID)?.content)?;
        let imprint = parse_message_imprint(r.read(TAG_SEQUENCE)?)?;

        let serial = r.read(TAG_INTEGER)?;
        der::check_minimal_integer(serial.content)?;
        let serial = hex::encode(serial.content);

        let gen_time = parse_generalized_time(r.read(TAG_GENERALIZED_TIME)?)?;

        // accuracy, ordering
        r.read_optional(TAG_SEQUENCE)?;
        if let Some(ordering) = r.read_optional(TAG_BOOLEAN)? {
            ordering.as_bool()?;
        }

        let nonce = match r.read_optional(TAG_INTEGER)? {
            Some(tlv) => {
                der::check_minimal_integer(tlv.content)?;
                Some(tlv.content.to_vec())
            }
            None => None,
        };

        // tsa [0], extensions [1]
        r.read_optional(TAG_CONTEXT_0)?;
        r.read_optional(TAG_CONTEXT_1)?;
        r.finish()?;

        Ok(Self {
            policy,
            imprint,
            serial,
            gen_time,
            nonce,
        })
    }
}

/// Parse `MessageImprint ::= SEQUENCE { AlgorithmIdentifier, OCTET STRING }`.
///
/// Shared with request decoding.
pub(crate) fn parse_message_imprint(seq: Tlv<'_>) -> Result<Fingerprint> {
    let mut r = seq.reader();

    let alg = r.read(TAG_SEQUENCE)?;
    let mut alg_r = alg.reader();
    let oid = alg_r.read(TAG_OID)?;
    if oid.content != OID_SHA256 {
        let dotted = der::decode_oid(oid.content).unwrap_or_else(|_| hex::encode(oid.content));
        return Err(NotariumError::protocol(
            ProtocolReason::UnsupportedAlgorithm,
            format!("hash algorithm {dotted}, expected SHA-256"),
        ));
    }
    alg_r.read_optional(TAG_NULL)?;
    alg_r.finish()?;

    let hashed = r.read(TAG_OCTET_STRING)?;
    r.finish()?;

    Fingerprint::from_slice(hashed.content).ok_or_else(|| {
        malformed(format!(
            "SHA-256 imprint is {} bytes, expected {FINGERPRINT_LEN}",
            hashed.content.len()
        ))
    })
}

fn parse_generalized_time(tlv: Tlv<'_>) -> Result<DateTime<Utc>> {
    let s = std::str::from_utf8(tlv.content)
        .map_err(|_| malformed("GeneralizedTime is not ASCII"))?;
    let naive = NaiveDateTime::parse_from_str(s, GENERALIZED_TIME_FORMAT)
        .map_err(|e| malformed(format!("GeneralizedTime '{s}': {e}")))?;
    Ok(naive.and_utc())
}

/// Format a UTC instant as a DER GeneralizedTime string (seconds precision).
pub fn format_generalized_time(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%SZ").to_string()
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An opaque, immutable timestamp token.
#[derive(Clone, PartialEq, Eq)]
pub struct TimestampToken {
    der: Vec<u8>,
    info: TstInfo,
}

impl TimestampToken {
    /// Parse a DER `ContentInfo` carrying a SignedData/TSTInfo.
    ///
    /// CMS signatures and certificate chains are not validated.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let content_info = der::parse_single(der, TAG_SEQUENCE)?;
        let mut r = content_info.reader();

        let content_type = r.read(TAG_OID)?;
        if content_type.content != OID_SIGNED_DATA {
            return Err(NotariumError::protocol(
                ProtocolReason::UnexpectedContentType,
                format!(
                    "ContentInfo type {}, expected signedData",
                    describe_oid(content_type.content)
                ),
            ));
        }
        let explicit = r.read(TAG_CONTEXT_0)?;
        r.finish()?;

        let signed_data = der::parse_single(explicit.content, TAG_SEQUENCE)?;
        let mut sd = signed_data.reader();
        sd.read(TAG_INTEGER)?;
        sd.read(TAG_SET)?;

        let encap = sd.read(TAG_SEQUENCE)?;
        let e_content = read_encapsulated_tst_info(encap)?;

        // certificates [0], crls [1], then signerInfos
        sd.read_optional(TAG_CONTEXT_0)?;
        sd.read_optional(TAG_CONTEXT_1)?;
        sd.read(TAG_SET)?;
        sd.finish()?;

        let info = TstInfo::parse(e_content)?;
        Ok(Self {
            der: der.to_vec(),
            info,
        })
    }

    /// The exact bytes the TSA returned.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn info(&self) -> &TstInfo {
        &self.info
    }

    /// The fingerprint this token attests to.
    pub fn imprint(&self) -> &Fingerprint {
        &self.info.imprint
    }

    pub fn serial(&self) -> &str {
        &self.info.serial
    }

    pub fn gen_time(&self) -> DateTime<Utc> {
        self.info.gen_time
    }
}

fn read_encapsulated_tst_info<'a>(encap: Tlv<'a>) -> Result<&'a [u8]> {
    let mut r: DerReader<'a> = encap.reader();
    let e_content_type = r.read(TAG_OID)?;
    if e_content_type.content != OID_TST_INFO {
        return Err(NotariumError::protocol(
            ProtocolReason::UnexpectedContentType,
            format!(
                "encapsulated content {}, expected id-ct-TSTInfo",
                describe_oid(e_content_type.content)
            ),
        ));
    }
    let explicit = r
        .read_optional(TAG_CONTEXT_0)?
        .ok_or_else(|| malformed("SignedData carries no encapsulated TSTInfo"))?;
    r.finish()?;
    let octets = der::parse_single(explicit.content, TAG_OCTET_STRING)?;
    Ok(octets.content)
}

fn describe_oid(content: &[u8]) -> String {
    der::decode_oid(content).unwrap_or_else(|_| hex::encode(content))
}

impl fmt::Debug for TimestampToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampToken")
            .field("serial", &self.info.serial)
            .field("gen_time", &self.info.gen_time)
            .field("imprint", &self.info.imprint)
            .field("der_len", &self.der.len())
            .finish()
    }
}

impl Serialize for TimestampToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.der))
    }
}

impl<'de> Deserialize<'de> for TimestampToken {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let der = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Self::from_der(&der).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::der::DerWriter;
    use crate::stub::{TokenSpec, build_token};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; FINGERPRINT_LEN])
    }

    #[test]
    fn parses_stub_token() {
        let spec = TokenSpec::new(fp(7)).nonce(Some(42)).serial(1234);
        let der = build_token(&spec).unwrap();
        let token = TimestampToken::from_der(&der).unwrap();

        assert_eq!(token.imprint(), &fp(7));
        assert_eq!(token.info().nonce_u64(), Some(42));
        assert_eq!(token.serial(), "04d2");
        assert_eq!(token.info().policy, spec.policy);
        assert_eq!(token.gen_time(), spec.gen_time);
        assert_eq!(token.as_der(), &der[..]);
    }

    #[test]
    fn token_without_nonce() {
        let der = build_token(&TokenSpec::new(fp(1)).nonce(None)).unwrap();
        let token = TimestampToken::from_der(&der).unwrap();
        assert!(token.info().nonce.is_none());
        assert!(token.info().nonce_u64().is_none());
    }

    #[test]
    fn rejects_wrong_content_type() {
        let mut w = DerWriter::new();
        w.sequence(|ci| {
            ci.oid(OID_TST_INFO);
            ci.constructed(TAG_CONTEXT_0, |c| {
                c.null();
            });
        });
        let err = TimestampToken::from_der(&w.finish()).unwrap_err();
        assert_eq!(err.reason_code(), "unexpected_content_type");
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut der = build_token(&TokenSpec::new(fp(1))).unwrap();
        der.push(0x00);
        let err = TimestampToken::from_der(&der).unwrap_err();
        assert_eq!(err.reason_code(), "malformed_der");
    }

    #[test]
    fn rejects_unsupported_version() {
        let der = build_token(&TokenSpec::new(fp(1)).version(2)).unwrap();
        let err = TimestampToken::from_der(&der).unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_version");
    }

    #[test]
    fn generalized_time_with_fraction() {
        let mut w = DerWriter::new();
        w.generalized_time("20260314093015.25Z");
        let der = w.finish();
        let tlv = der::parse_single(&der, TAG_GENERALIZED_TIME).unwrap();
        let parsed = parse_generalized_time(tlv).unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 15).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn generalized_time_requires_utc() {
        let mut w = DerWriter::new();
        w.generalized_time("20260314093015");
        let der = w.finish();
        let tlv = der::parse_single(&der, TAG_GENERALIZED_TIME).unwrap();
        assert!(parse_generalized_time(tlv).is_err());
    }

    #[test]
    fn serde_uses_hex_and_revalidates() {
        let token = TimestampToken::from_der(&build_token(&TokenSpec::new(fp(9))).unwrap()).unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", hex::encode(token.as_der())));

        let back: TimestampToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);

        assert!(serde_json::from_str::<TimestampToken>("\"3000\"").is_err());
        assert!(serde_json::from_str::<TimestampToken>("\"zz\"").is_err());
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let token = TimestampToken::from_der(&build_token(&TokenSpec::new(fp(9))).unwrap()).unwrap();
        let dbg = format!("{token:?}");
        assert!(dbg.contains("der_len"));
        assert!(!dbg.contains(&hex::encode(token.as_der())));
    }
}
