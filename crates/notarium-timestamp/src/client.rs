// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resilient Time-Stamp Authority client.
//
// Each attempt builds a fresh request (with a fresh nonce), exchanges it over
// the transport, and decodes the answer against exactly that request.
// Transient failures back off and retry; anything else surfaces at once.
// Cancellation is observed before every attempt and raced against both the
// exchange and the backoff sleep.

use notarium_core::config::TimestampConfig;
use notarium_core::error::{NotariumError, Result};
use notarium_core::types::Fingerprint;
use ring::rand::{SecureRandom, SystemRandom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::{CodecPolicy, decode_response, encode_request};
use crate::retry::{BackoffPolicy, RetryDecision};
use crate::token::{TimestampRequest, TimestampToken};
use crate::transport::{HttpTransport, TsaTransport};

/// Obtains timestamp tokens for fingerprints.
pub struct TimestampClient<T> {
    transport: T,
    backoff: BackoffPolicy,
    codec: CodecPolicy,
    cert_req: bool,
    policy: Option<String>,
    rng: SystemRandom,
}

impl TimestampClient<HttpTransport> {
    /// HTTP client configured from the `timestamp` config section.
    pub fn from_config(config: &TimestampConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.tsa_url.clone(), config.attempt_timeout())?;
        Ok(Self::new(transport).with_config(config))
    }
}

impl<T: TsaTransport> TimestampClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            backoff: BackoffPolicy::default(),
            codec: CodecPolicy::default(),
            cert_req: true,
            policy: None,
            rng: SystemRandom::new(),
        }
    }

    /// Apply every setting in `config` except the endpoint itself.
    pub fn with_config(self, config: &TimestampConfig) -> Self {
        let policy = config.policy_oid.clone();
        let mut client = self
            .with_backoff(BackoffPolicy::from_config(config))
            .with_codec_policy(CodecPolicy {
                accept_granted_with_mods: config.accept_granted_with_mods,
            })
            .with_cert_req(config.cert_req);
        client.policy = policy;
        client
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_codec_policy(mut self, codec: CodecPolicy) -> Self {
        self.codec = codec;
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

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Request a token for `fingerprint`, retrying transient failures.
    pub async fn request_timestamp(
        &self,
        fingerprint: Fingerprint,
        use_nonce: bool,
    ) -> Result<TimestampToken> {
        self.request_timestamp_cancellable(fingerprint, use_nonce, &CancellationToken::new())
            .await
    }

    /// As [`request_timestamp`](Self::request_timestamp), giving up with
    /// [`NotariumError::Cancelled`] as soon as `cancel` fires.
    #[instrument(skip(self, fingerprint, cancel), fields(fingerprint = %fingerprint))]
    pub async fn request_timestamp_cancellable(
        &self,
        fingerprint: Fingerprint,
        use_nonce: bool,
        cancel: &CancellationToken,
    ) -> Result<TimestampToken> {
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                info!(attempts, "timestamp request cancelled");
                return Err(NotariumError::Cancelled { attempts });
            }
            attempts += 1;

            let request = self.build_request(fingerprint, use_nonce)?;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempts, "timestamp request cancelled mid-exchange");
                    return Err(NotariumError::Cancelled { attempts });
                }
                outcome = self.attempt(&request) => outcome,
            };

            let err = match outcome {
                Ok(token) => {
                    info!(attempts, serial = token.serial(), "timestamp obtained");
                    return Ok(token);
                }
                Err(err) => err,
            };
            warn!(attempt = attempts, error = %err, "timestamp attempt failed");

            match self.backoff.should_retry(&err, attempts) {
                RetryDecision::GiveUp => return Err(err),
                RetryDecision::Exhausted => {
                    return Err(NotariumError::TimestampUnavailable {
                        attempts,
                        last_error: err.to_string(),
                    });
                }
                RetryDecision::RetryAfter(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(attempts, "timestamp request cancelled during backoff");
                            return Err(NotariumError::Cancelled { attempts });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, request: &TimestampRequest) -> Result<TimestampToken> {
        let query = encode_request(request)?;
        let reply = self.transport.exchange(&query).await?;
        decode_response(&reply, request, &self.codec)
    }

    fn build_request(&self, fingerprint: Fingerprint, use_nonce: bool) -> Result<TimestampRequest> {
        let mut request = TimestampRequest::new(fingerprint).with_cert_req(self.cert_req);
        if let Some(policy) = &self.policy {
            request = request.with_policy(policy.clone());
        }
        if use_nonce {
            let nonce = self.fresh_nonce()?;
            debug!(nonce, "generated request nonce");
            request = request.with_nonce(nonce);
        }
        Ok(request)
    }

    fn fresh_nonce(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.rng
            .fill(&mut buf)
            .map_err(|_| NotariumError::Randomness("nonce generation failed".into()))?;
        Ok(u64::from_be_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use notarium_core::types::FINGERPRINT_LEN;

    use super::*;
    use crate::stub::{StubAuthority, StubReply};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; FINGERPRINT_LEN])
    }

    fn backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    fn client(stub: &Arc<StubAuthority>) -> TimestampClient<Arc<StubAuthority>> {
        TimestampClient::new(Arc::clone(stub)).with_backoff(backoff())
    }

    #[tokio::test(start_paused = true)]
    async fn grants_on_first_attempt() {
        let stub = Arc::new(StubAuthority::granting());
        let token = client(&stub).request_timestamp(fp(1), true).await.unwrap();
        assert_eq!(token.imprint(), &fp(1));
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_three_failures_with_growing_gaps() {
        let stub = Arc::new(StubAuthority::always(StubReply::TransportFailure));
        let err = client(&stub).request_timestamp(fp(1), true).await.unwrap_err();

        match err {
            NotariumError::TimestampUnavailable {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection reset"));
            }
            other => panic!("expected TimestampUnavailable, got {other:?}"),
        }

        let instants = stub.call_instants();
        assert_eq!(instants.len(), 3);
        let first_gap = instants[1] - instants[0];
        let second_gap = instants[2] - instants[1];
        assert!(first_gap >= Duration::from_millis(100));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let stub = Arc::new(StubAuthority::scripted(
            [StubReply::TransportFailure, StubReply::TransportFailure],
            StubReply::Grant,
        ));
        let token = client(&stub).request_timestamp(fp(2), true).await.unwrap();
        assert_eq!(token.imprint(), &fp(2));
        assert_eq!(stub.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_gets_a_fresh_nonce() {
        let stub = Arc::new(StubAuthority::scripted(
            [StubReply::TransportFailure],
            StubReply::Grant,
        ));
        client(&stub).request_timestamp(fp(2), true).await.unwrap();

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].nonce.is_some());
        assert!(requests[1].nonce.is_some());
        assert_ne!(requests[0].nonce, requests[1].nonce);
    }

    #[tokio::test(start_paused = true)]
    async fn nonce_can_be_disabled() {
        let stub = Arc::new(StubAuthority::granting());
        client(&stub).request_timestamp(fp(2), false).await.unwrap();
        assert_eq!(stub.requests()[0].nonce, None);
        assert!(stub.requests()[0].cert_req);
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_violation_is_not_retried() {
        let stub = Arc::new(StubAuthority::always(StubReply::GrantWithNonce(7)));
        let err = client(&stub).request_timestamp(fp(3), true).await.unwrap_err();
        // Astronomically unlikely that the random nonce is 7.
        assert_eq!(err.reason_code(), "nonce_mismatch");
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let stub = Arc::new(StubAuthority::always(StubReply::Status(2)));
        let err = client(&stub).request_timestamp(fp(3), true).await.unwrap_err();
        assert_eq!(err.reason_code(), "status_rejected");
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_is_retried() {
        let stub = Arc::new(StubAuthority::scripted(
            [StubReply::Status(3)],
            StubReply::Grant,
        ));
        client(&stub).request_timestamp(fp(3), true).await.unwrap();
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn granted_with_mods_honours_config() {
        let stub = Arc::new(StubAuthority::always(StubReply::GrantWithMods));
        let strict = client(&stub);
        assert_eq!(
            strict.request_timestamp(fp(4), true).await.unwrap_err().reason_code(),
            "granted_with_modifications"
        );

        let config = TimestampConfig {
            accept_granted_with_mods: true,
            ..TimestampConfig::default()
        };
        let lenient = TimestampClient::new(Arc::clone(&stub)).with_config(&config);
        assert!(lenient.request_timestamp(fp(4), true).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn requested_policy_is_sent() {
        let stub = Arc::new(StubAuthority::granting());
        let token = client(&stub)
            .with_policy("1.2.3.4.5")
            .request_timestamp(fp(4), true)
            .await
            .unwrap();
        assert_eq!(token.info().policy, "1.2.3.4.5");
        assert_eq!(stub.requests()[0].policy.as_deref(), Some("1.2.3.4.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_attempt() {
        let stub = Arc::new(StubAuthority::granting());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&stub)
            .request_timestamp_cancellable(fp(5), true, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NotariumError::Cancelled { attempts: 0 }));
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_backoff() {
        let stub = Arc::new(StubAuthority::always(StubReply::TransportFailure));
        let client = TimestampClient::new(Arc::clone(&stub)).with_backoff(BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = client
            .request_timestamp_cancellable(fp(5), true, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NotariumError::Cancelled { attempts: 1 }));
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_exchange() {
        let stub = Arc::new(StubAuthority::always(StubReply::Hang));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = client(&stub)
            .request_timestamp_cancellable(fp(5), true, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NotariumError::Cancelled { attempts: 1 }));
    }
}
