// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Time-Stamp Protocol message codec.
//
// Request layout:
//
// ```text
// TimeStampReq ::= SEQUENCE {
//   version         INTEGER (1),
//   messageImprint  SEQUENCE { AlgorithmIdentifier { sha256, NULL }, OCTET STRING },
//   reqPolicy       OBJECT IDENTIFIER OPTIONAL,
//   nonce           INTEGER OPTIONAL,
//   certReq         BOOLEAN DEFAULT FALSE,
//   extensions      [0] IMPLICIT Extensions OPTIONAL }
// ```
//
// Response layout:
//
// ```text
// TimeStampResp ::= SEQUENCE {
//   status          PKIStatusInfo { status INTEGER, statusString SEQUENCE OF UTF8String OPTIONAL,
//                                   failInfo BIT STRING OPTIONAL },
//   timeStampToken  ContentInfo OPTIONAL }
// ```

use notarium_core::error::{NotariumError, ProtocolReason, Result};
use tracing::{debug, instrument, warn};

use crate::der::{
    self, DerWriter, TAG_BIT_STRING, TAG_BOOLEAN, TAG_CONTEXT_0, TAG_INTEGER, TAG_OID,
    TAG_SEQUENCE, Tlv,
};
use crate::token::{OID_SHA256, TimestampRequest, TimestampToken, parse_message_imprint};

/// How strictly to treat a TSA's answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecPolicy {
    /// Treat PKI status 1 ("granted with modifications") as success.
    pub accept_granted_with_mods: bool,
}

/// PKIStatus values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
    Waiting,
    RevocationWarning,
    RevocationNotification,
    Unknown(u64),
}

impl PkiStatus {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Granted,
            1 => Self::GrantedWithMods,
            2 => Self::Rejection,
            3 => Self::Waiting,
            4 => Self::RevocationWarning,
            5 => Self::RevocationNotification,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Self::Granted => 0,
            Self::GrantedWithMods => 1,
            Self::Rejection => 2,
            Self::Waiting => 3,
            Self::RevocationWarning => 4,
            Self::RevocationNotification => 5,
            Self::Unknown(other) => *other,
        }
    }
}

/// PKIFailureInfo named bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureInfo {
    BadAlg,
    BadRequest,
    BadDataFormat,
    TimeNotAvailable,
    UnacceptedPolicy,
    UnacceptedExtension,
    AddInfoNotAvailable,
    SystemFailure,
}

impl FailureInfo {
    const ALL: [FailureInfo; 8] = [
        Self::BadAlg,
        Self::BadRequest,
        Self::BadDataFormat,
        Self::TimeNotAvailable,
        Self::UnacceptedPolicy,
        Self::UnacceptedExtension,
        Self::AddInfoNotAvailable,
        Self::SystemFailure,
    ];

    pub fn bit(&self) -> usize {
        match self {
            Self::BadAlg => 0,
            Self::BadRequest => 2,
            Self::BadDataFormat => 5,
            Self::TimeNotAvailable => 14,
            Self::UnacceptedPolicy => 15,
            Self::UnacceptedExtension => 16,
            Self::AddInfoNotAvailable => 17,
            Self::SystemFailure => 25,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BadAlg => "badAlg",
            Self::BadRequest => "badRequest",
            Self::BadDataFormat => "badDataFormat",
            Self::TimeNotAvailable => "timeNotAvailable",
            Self::UnacceptedPolicy => "unacceptedPolicy",
            Self::UnacceptedExtension => "unacceptedExtension",
            Self::AddInfoNotAvailable => "addInfoNotAvailable",
            Self::SystemFailure => "systemFailure",
        }
    }

    /// DER BIT STRING content with only this bit set.
    pub fn to_bit_string(&self) -> Vec<u8> {
        let bit = self.bit();
        let mut content = vec![0u8; bit / 8 + 2];
        content[0] = 7 - (bit % 8) as u8;
        content[bit / 8 + 1] = 0x80 >> (bit % 8);
        content
    }
}

fn malformed(detail: impl Into<String>) -> NotariumError {
    NotariumError::protocol(ProtocolReason::MalformedDer, detail)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Encode a `TimeStampReq`.
pub fn encode_request(req: &TimestampRequest) -> Result<Vec<u8>> {
    let policy = req
        .policy
        .as_deref()
        .map(der::encode_oid)
        .transpose()
        .map_err(|e| NotariumError::Config(format!("requested TSA policy: {e}")))?;

    let mut w = DerWriter::new();
    w.sequence(|s| {
        s.integer_u64(1);
        s.sequence(|imprint| {
            imprint.sequence(|alg| {
                alg.oid(OID_SHA256);
                alg.null();
            });
            imprint.octet_string(req.fingerprint.as_bytes());
        });
        if let Some(policy) = &policy {
            s.oid(policy);
        }
        if let Some(nonce) = req.nonce {
            s.integer_u64(nonce);
        }
        // DEFAULT FALSE is never encoded.
        if req.cert_req {
            s.boolean(true);
        }
    });
    Ok(w.finish())
}

/// Decode a `TimeStampReq` produced by [`encode_request`] or any other
/// SHA-256 client.
pub fn decode_request(bytes: &[u8]) -> Result<TimestampRequest> {
    let seq = der::parse_single(bytes, TAG_SEQUENCE)?;
    let mut r = seq.reader();

    let version = r.read(TAG_INTEGER)?.as_u64()?;
    if version != Some(1) {
        return Err(NotariumError::protocol(
            ProtocolReason::UnsupportedVersion,
            format!("TimeStampReq version {version:?}, expected 1"),
        ));
    }

    let fingerprint = parse_message_imprint(r.read(TAG_SEQUENCE)?)?;

    let policy = match r.read_optional(TAG_OID)? {
        Some(oid) => Some(der::decode_oid(oid.content)?),
        None => None,
    };

    let nonce = match r.read_optional(TAG_INTEGER)? {
        Some(tlv) => Some(
            tlv.as_u64()?
                .ok_or_else(|| malformed("request nonce does not fit in 64 bits"))?,
        ),
        None => None,
    };

    let cert_req = match r.read_optional(TAG_BOOLEAN)? {
        Some(tlv) => {
            if !tlv.as_bool()? {
                return Err(malformed("certReq FALSE must be omitted in DER"));
            }
            true
        }
        None => false,
    };

    r.read_optional(TAG_CONTEXT_0)?;
    r.finish()?;

    Ok(TimestampRequest {
        fingerprint,
        nonce,
        cert_req,
        policy,
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Parse a bare token (`ContentInfo`).
pub fn parse_token(bytes: &[u8]) -> Result<TimestampToken> {
    TimestampToken::from_der(bytes)
}

/// Decode a `TimeStampResp` and check the token against the request.
///
/// Succeeds only when the status is granted (or granted with modifications
/// and `policy` allows it), a token is present, the imprint matches the
/// requested fingerprint exactly, a sent nonce is echoed exactly, and a
/// requested policy is honoured.
#[instrument(skip_all, fields(fingerprint = %request.fingerprint, len = bytes.len()))]
pub fn decode_response(
    bytes: &[u8],
    request: &TimestampRequest,
    policy: &CodecPolicy,
) -> Result<TimestampToken> {
    let resp = der::parse_single(bytes, TAG_SEQUENCE)?;
    let mut r = resp.reader();

    let status_info = r.read(TAG_SEQUENCE)?;
    let token_tlv = r.read_optional(TAG_SEQUENCE)?;
    r.finish()?;

    let (status, detail) = parse_status_info(status_info)?;
    check_status(status, &detail, policy)?;

    let token_tlv =
        token_tlv.ok_or_else(|| NotariumError::protocol(ProtocolReason::MissingToken, detail))?;
    let token = parse_token(token_tlv.raw)?;

    verify_against_request(&token, request)?;
    debug!(serial = token.serial(), "time-stamp response accepted");
    Ok(token)
}

fn parse_status_info(seq: Tlv<'_>) -> Result<(PkiStatus, String)> {
    let mut r = seq.reader();
    let status = match r.read(TAG_INTEGER)?.as_u64()? {
        Some(code) => PkiStatus::from_code(code),
        None => PkiStatus::Unknown(u64::MAX),
    };

    let mut parts: Vec<String> = Vec::new();
    if let Some(text) = r.read_optional(TAG_SEQUENCE)? {
        let mut texts = text.reader();
        while !texts.is_empty() {
            parts.push(texts.read(der::TAG_UTF8_STRING)?.as_utf8()?.to_owned());
        }
    }
    if let Some(bits) = r.read_optional(TAG_BIT_STRING)? {
        let names = fail_info_names(bits.content)?;
        if !names.is_empty() {
            parts.push(format!("failInfo: {}", names.join(", ")));
        }
    }
    r.finish()?;

    let detail = if parts.is_empty() {
        format!("PKI status {}", status.code())
    } else {
        format!("PKI status {}: {}", status.code(), parts.join("; "))
    };
    Ok((status, detail))
}

fn fail_info_names(content: &[u8]) -> Result<Vec<&'static str>> {
    let (&unused, bits) = content
        .split_first()
        .ok_or_else(|| malformed("empty BIT STRING"))?;
    if unused > 7 || (bits.is_empty() && unused != 0) {
        return Err(malformed(format!("BIT STRING with {unused} unused bits")));
    }
    let is_set = |bit: usize| {
        bits.get(bit / 8)
            .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
    };
    Ok(FailureInfo::ALL
        .iter()
        .filter(|info| is_set(info.bit()))
        .map(FailureInfo::name)
        .collect())
}

fn check_status(status: PkiStatus, detail: &str, policy: &CodecPolicy) -> Result<()> {
    let reason = match status {
        PkiStatus::Granted => return Ok(()),
        PkiStatus::GrantedWithMods if policy.accept_granted_with_mods => {
            warn!("TSA granted the request with modifications");
            return Ok(());
        }
        PkiStatus::GrantedWithMods => ProtocolReason::GrantedWithModifications,
        PkiStatus::Rejection => ProtocolReason::StatusRejected,
        PkiStatus::Waiting => ProtocolReason::StatusWaiting,
        PkiStatus::RevocationWarning | PkiStatus::RevocationNotification => {
            ProtocolReason::RevocationWarning
        }
        PkiStatus::Unknown(_) => ProtocolReason::UnknownStatus,
    };
    Err(NotariumError::protocol(reason, detail))
}

fn verify_against_request(token: &TimestampToken, request: &TimestampRequest) -> Result<()> {
    if token.imprint() != &request.fingerprint {
        return Err(NotariumError::protocol(
            ProtocolReason::ImprintMismatch,
            format!(
                "token attests {}, requested {}",
                token.imprint(),
                request.fingerprint
            ),
        ));
    }

    if let Some(sent) = request.nonce {
        let echoed = token.info().nonce.as_deref().ok_or_else(|| {
            NotariumError::protocol(
                ProtocolReason::NonceMissing,
                format!("sent nonce {sent}, token carries none"),
            )
        })?;
        if echoed != der::minimal_unsigned(&sent.to_be_bytes()) {
            return Err(NotariumError::protocol(
                ProtocolReason::NonceMismatch,
                format!("sent nonce {sent}, token carries 0x{}", hex::encode(echoed)),
            ));
        }
    }

    if let Some(requested) = &request.policy {
        if &token.info().policy != requested {
            return Err(NotariumError::protocol(
                ProtocolReason::PolicyMismatch,
                format!(
                    "requested policy {requested}, token issued under {}",
                    token.info().policy
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use notarium_core::types::{FINGERPRINT_LEN, Fingerprint};

    use super::*;
    use crate::stub::{TokenSpec, build_token, encode_response};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; FINGERPRINT_LEN])
    }

    fn granted(spec: &TokenSpec) -> Vec<u8> {
        encode_response(0, None, None, Some(&build_token(spec).unwrap()))
    }

    fn strict() -> CodecPolicy {
        CodecPolicy::default()
    }

    #[test]
    fn request_layout_without_nonce() {
        let der = encode_request(&TimestampRequest::new(fp(0xAB))).unwrap();
        let mut expected = vec![
            0x30, 0x36, // TimeStampReq
            0x02, 0x01, 0x01, // version 1
            0x30, 0x31, // messageImprint
            0x30, 0x0D, 0x06, 0x09, // AlgorithmIdentifier, OID
        ];
        expected.extend_from_slice(OID_SHA256);
        expected.extend_from_slice(&[0x05, 0x00, 0x04, 0x20]);
        expected.extend_from_slice(&[0xAB; 32]);
        assert_eq!(der, expected);
    }

    #[test]
    fn request_with_nonce_and_cert_req() {
        let req = TimestampRequest::new(fp(1))
            .with_nonce(128)
            .with_cert_req(true);
        let der = encode_request(&req).unwrap();
        assert!(der.ends_with(&[0x02, 0x02, 0x00, 0x80, 0x01, 0x01, 0xFF]));
        assert_eq!(decode_request(&der).unwrap(), req);
    }

    #[test]
    fn request_decodes_policy() {
        let req = TimestampRequest::new(fp(2))
            .with_policy("1.2.3.4.1")
            .with_nonce(u64::MAX);
        let der = encode_request(&req).unwrap();
        assert_eq!(decode_request(&der).unwrap(), req);
    }

    #[test]
    fn invalid_requested_policy_is_a_config_error() {
        let req = TimestampRequest::new(fp(2)).with_policy("not-an-oid");
        assert_eq!(encode_request(&req).unwrap_err().reason_code(), "config");
    }

    #[test]
    fn decode_request_rejects_explicit_false_cert_req() {
        let mut der = encode_request(&TimestampRequest::new(fp(1))).unwrap();
        // Append BOOLEAN FALSE and patch the outer length.
        der.extend_from_slice(&[0x01, 0x01, 0x00]);
        der[1] += 3;
        assert_eq!(
            decode_request(&der).unwrap_err().reason_code(),
            "malformed_der"
        );
    }

    #[test]
    fn granted_response_with_matching_nonce() {
        let req = TimestampRequest::new(fp(3)).with_nonce(77);
        let resp = granted(&TokenSpec::new(fp(3)).nonce(Some(77)));
        let token = decode_response(&resp, &req, &strict()).unwrap();
        assert_eq!(token.imprint(), &fp(3));
        assert_eq!(token.info().nonce_u64(), Some(77));
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let req = TimestampRequest::new(fp(3)).with_nonce(77);
        let resp = granted(&TokenSpec::new(fp(3)).nonce(Some(78)));
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "nonce_mismatch");
    }

    #[test]
    fn missing_nonce_is_rejected() {
        let req = TimestampRequest::new(fp(3)).with_nonce(77);
        let resp = granted(&TokenSpec::new(fp(3)).nonce(None));
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "nonce_missing");
    }

    #[test]
    fn unrequested_nonce_is_tolerated() {
        let req = TimestampRequest::new(fp(3));
        let resp = granted(&TokenSpec::new(fp(3)).nonce(Some(5)));
        assert!(decode_response(&resp, &req, &strict()).is_ok());
    }

    #[test]
    fn imprint_mismatch_is_rejected() {
        let req = TimestampRequest::new(fp(3));
        let resp = granted(&TokenSpec::new(fp(4)));
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "imprint_mismatch");
    }

    #[test]
    fn policy_mismatch_is_rejected() {
        let req = TimestampRequest::new(fp(3)).with_policy("1.2.3.4.99");
        let resp = granted(&TokenSpec::new(fp(3)).policy("1.2.3.4.1"));
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "policy_mismatch");
    }

    #[test]
    fn granted_with_mods_follows_policy() {
        let req = TimestampRequest::new(fp(3));
        let token = build_token(&TokenSpec::new(fp(3))).unwrap();
        let resp = encode_response(1, Some("nonce dropped"), None, Some(&token));

        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "granted_with_modifications");
        assert!(err.to_string().contains("nonce dropped"));

        let lenient = CodecPolicy {
            accept_granted_with_mods: true,
        };
        assert!(decode_response(&resp, &req, &lenient).is_ok());
    }

    #[test]
    fn rejection_carries_fail_info() {
        let req = TimestampRequest::new(fp(3));
        let resp = encode_response(
            2,
            Some("unsupported digest"),
            Some(FailureInfo::BadAlg),
            None,
        );
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "status_rejected");
        let msg = err.to_string();
        assert!(msg.contains("unsupported digest"));
        assert!(msg.contains("badAlg"));
    }

    #[test]
    fn waiting_status_is_transient() {
        let req = TimestampRequest::new(fp(3));
        let resp = encode_response(3, None, None, None);
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "status_waiting");
        assert_eq!(err.class(), notarium_core::ErrorClass::Transient);
    }

    #[test]
    fn revocation_and_unknown_statuses() {
        let req = TimestampRequest::new(fp(3));
        for (status, code) in [
            (4, "revocation_warning"),
            (5, "revocation_warning"),
            (9, "unknown_status"),
        ] {
            let resp = encode_response(status, None, None, None);
            let err = decode_response(&resp, &req, &strict()).unwrap_err();
            assert_eq!(err.reason_code(), code, "status {status}");
        }
    }

    #[test]
    fn granted_without_token() {
        let req = TimestampRequest::new(fp(3));
        let resp = encode_response(0, None, None, None);
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "missing_token");
    }

    #[test]
    fn garbage_is_malformed() {
        let req = TimestampRequest::new(fp(3));
        let cases: [&[u8]; 3] = [b"<html>busy</html>", &[], &[0x30, 0x80, 0x00, 0x00]];
        for bytes in cases {
            let err = decode_response(bytes, &req, &strict()).unwrap_err();
            assert_eq!(err.reason_code(), "malformed_der");
        }
    }

    #[test]
    fn unsupported_algorithm_in_token() {
        let req = TimestampRequest::new(fp(3));
        let resp = granted(&TokenSpec::new(fp(3)).hash_oid("2.16.840.1.101.3.4.2.3"));
        let err = decode_response(&resp, &req, &strict()).unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_algorithm");
    }

    #[test]
    fn fail_info_bit_strings() {
        assert_eq!(FailureInfo::BadAlg.to_bit_string(), [0x07, 0x80]);
        assert_eq!(FailureInfo::BadDataFormat.to_bit_string(), [0x02, 0x04]);
        assert_eq!(
            FailureInfo::SystemFailure.to_bit_string(),
            [0x06, 0x00, 0x00, 0x00, 0x40]
        );
        for info in FailureInfo::ALL {
            assert_eq!(
                fail_info_names(&info.to_bit_string()).unwrap(),
                vec![info.name()]
            );
        }
        assert!(fail_info_names(&[]).is_err());
        assert!(fail_info_names(&[0x08, 0x00]).is_err());
    }
}
