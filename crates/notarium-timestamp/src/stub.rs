// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process Time-Stamp Authority for tests, benchmarks and offline runs.
//
// Answers with well-formed DER built the same way a real TSA lays it out,
// minus signer certificates and signatures. Replies are scripted: each call
// pops the next `StubReply`, falling back to a fixed reply once the script
// runs dry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use notarium_core::error::{NotariumError, Result};
use notarium_core::types::Fingerprint;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::{FailureInfo, decode_request};
use crate::der::{self, DerWriter, TAG_BIT_STRING, TAG_CONTEXT_0, TAG_SET};
use crate::token::{
    OID_SHA256, OID_SIGNED_DATA, OID_TST_INFO, TimestampRequest, format_generalized_time,
};
use crate::transport::TsaTransport;

/// Policy OID the stub issues tokens under unless asked for another.
pub const STUB_POLICY: &str = "1.3.6.1.4.1.99999.1.1";

// ---------------------------------------------------------------------------
// DER builders
// ---------------------------------------------------------------------------

/// Everything that goes into a stub TSTInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub imprint: Fingerprint,
    pub nonce: Option<u64>,
    pub serial: u64,
    pub policy: String,
    pub hash_oid: String,
    pub gen_time: DateTime<Utc>,
    pub version: u64,
}

impl TokenSpec {
    pub fn new(imprint: Fingerprint) -> Self {
        Self {
            imprint,
            nonce: None,
            serial: 1,
            policy: STUB_POLICY.into(),
            hash_oid: "2.16.840.1.101.3.4.2.1".into(),
            gen_time: Utc::now().trunc_subsecs(0),
            version: 1,
        }
    }

    pub fn nonce(mut self, nonce: Option<u64>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    pub fn hash_oid(mut self, oid: impl Into<String>) -> Self {
        self.hash_oid = oid.into();
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// DER TSTInfo for `spec`.
pub fn encode_tst_info(spec: &TokenSpec) -> Result<Vec<u8>> {
    let policy = der::encode_oid(&spec.policy)?;
    let hash_oid = der::encode_oid(&spec.hash_oid)?;
    let gen_time = format_generalized_time(&spec.gen_time);

    let mut w = DerWriter::new();
    w.sequence(|tst| {
        tst.integer_u64(spec.version);
        tst.oid(&policy);
        tst.sequence(|imprint| {
            imprint.sequence(|alg| {
                alg.oid(&hash_oid);
                alg.null();
            });
            imprint.octet_string(spec.imprint.as_bytes());
        });
        tst.integer_u64(spec.serial);
        tst.generalized_time(&gen_time);
        if let Some(nonce) = spec.nonce {
            tst.integer_u64(nonce);
        }
    });
    Ok(w.finish())
}

/// Wrap a DER TSTInfo in SignedData and ContentInfo (no signer infos).
pub fn wrap_tst_info(tst_info: &[u8]) -> Vec<u8> {
    let mut w = DerWriter::new();
    w.sequence(|content_info| {
        content_info.oid(OID_SIGNED_DATA);
        content_info.constructed(TAG_CONTEXT_0, |explicit| {
            explicit.sequence(|signed_data| {
                signed_data.integer_u64(3);
                signed_data.constructed(TAG_SET, |algs| {
                    algs.sequence(|alg| {
                        alg.oid(OID_SHA256);
                        alg.null();
                    });
                });
                signed_data.sequence(|encap| {
                    encap.oid(OID_TST_INFO);
                    encap.constructed(TAG_CONTEXT_0, |e_content| {
                        e_content.octet_string(tst_info);
                    });
                });
                signed_data.constructed(TAG_SET, |_signer_infos| {});
            });
        });
    });
    w.finish()
}

/// A complete token (`ContentInfo`) for `spec`.
pub fn build_token(spec: &TokenSpec) -> Result<Vec<u8>> {
    Ok(wrap_tst_info(&encode_tst_info(spec)?))
}

/// DER `TimeStampResp`.
pub fn encode_response(
    status: u64,
    status_text: Option<&str>,
    fail_info: Option<FailureInfo>,
    token: Option<&[u8]>,
) -> Vec<u8> {
    let mut w = DerWriter::new();
    w.sequence(|resp| {
        resp.sequence(|info| {
            info.integer_u64(status);
            if let Some(text) = status_text {
                info.sequence(|free_text| {
                    free_text.utf8_string(text);
                });
            }
            if let Some(fail) = fail_info {
                info.tlv(TAG_BIT_STRING, &fail.to_bit_string());
            }
        });
        if let Some(token) = token {
            resp.raw(token);
        }
    });
    w.finish()
}

// ---------------------------------------------------------------------------
// Scripted authority
// ---------------------------------------------------------------------------

/// What the stub does with one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubReply {
    /// Grant, echoing the request's imprint, nonce and policy.
    Grant,
    /// Grant, but echo this nonce instead of the request's.
    GrantWithNonce(u64),
    /// Grant without echoing any nonce.
    GrantWithoutNonce,
    /// Grant, attesting this fingerprint instead of the requested one.
    GrantForImprint(Fingerprint),
    /// Status 1 with an otherwise correct token.
    GrantWithMods,
    /// A token-less response with this PKI status.
    Status(u64),
    /// Fail the exchange as a network error would.
    TransportFailure,
    /// Return these bytes verbatim.
    Garbage(Vec<u8>),
    /// Never answer.
    Hang,
}

/// Scripted in-process TSA.
pub struct StubAuthority {
    script: Mutex<VecDeque<StubReply>>,
    fallback: StubReply,
    serial: AtomicU64,
    calls: Mutex<Vec<Instant>>,
    requests: Mutex<Vec<TimestampRequest>>,
}

impl StubAuthority {
    /// Grants every request.
    pub fn granting() -> Self {
        Self::always(StubReply::Grant)
    }

    /// Answers every request the same way.
    pub fn always(reply: StubReply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    /// Plays `script` in order, then answers with `fallback` forever.
    pub fn scripted(script: impl IntoIterator<Item = StubReply>, fallback: StubReply) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            serial: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// When each exchange started (tokio clock, so virtual under a paused
    /// runtime).
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every request that decoded successfully, in arrival order.
    pub fn requests(&self) -> Vec<TimestampRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self) -> StubReply {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn grant(&self, status: u64, spec: TokenSpec) -> Result<Vec<u8>> {
        let token = build_token(&spec)?;
        Ok(encode_response(status, None, None, Some(&token)))
    }
}

#[async_trait]
impl TsaTransport for StubAuthority {
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        let reply = self.next_reply();
        debug!(?reply, "stub TSA answering");

        let req = match decode_request(request) {
            Ok(req) => req,
            Err(e) => {
                return Ok(encode_response(
                    2,
                    Some(&e.to_string()),
                    Some(FailureInfo::BadDataFormat),
                    None,
                ));
            }
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req.clone());

        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let spec = TokenSpec::new(req.fingerprint)
            .nonce(req.nonce)
            .serial(serial)
            .policy(req.policy.clone().unwrap_or_else(|| STUB_POLICY.into()));

        match reply {
            StubReply::Grant => self.grant(0, spec),
            StubReply::GrantWithNonce(nonce) => self.grant(0, spec.nonce(Some(nonce))),
            StubReply::GrantWithoutNonce => self.grant(0, spec.nonce(None)),
            StubReply::GrantForImprint(imprint) => self.grant(0, TokenSpec { imprint, ..spec }),
            StubReply::GrantWithMods => self.grant(1, spec),
            StubReply::Status(status) => {
                Ok(encode_response(status, Some("stub authority"), None, None))
            }
            StubReply::TransportFailure => Err(NotariumError::Transport(
                "stub authority: connection reset".into(),
            )),
            StubReply::Garbage(bytes) => Ok(bytes),
            StubReply::Hang => std::future::pending().await,
        }
    }
}
