// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! notarium-timestamp — trusted timestamping over the Time-Stamp Protocol.
//!
//! DER encoding of time-stamp queries, strict decoding and verification of
//! the authority's replies, and a client that retries transient failures
//! with capped exponential backoff and honours cancellation.

pub mod client;
pub mod codec;
pub mod der;
pub mod retry;
pub mod stub;
pub mod token;
pub mod transport;

pub use client::TimestampClient;
pub use codec::{CodecPolicy, decode_request, decode_response, encode_request, parse_token};
pub use retry::BackoffPolicy;
pub use stub::{StubAuthority, StubReply};
pub use token::{TimestampRequest, TimestampToken, TstInfo};
pub use transport::{HttpTransport, TsaTransport};
