//! Minimal SIP user agent engine.
//!
//! Builds and parses the handful of SIP messages a registering phone needs,
//! answers Digest challenges, and drives the blocking retry loops for
//! REGISTER, INVITE responses and BYE over a caller supplied [`Transport`].

use thiserror::Error;

pub mod auth;
pub mod call;
pub mod codec;
pub mod config;
pub mod dialog;
pub mod message;
pub mod parser;
pub mod registration;
pub mod stack;
pub mod transaction;
pub mod transport;

pub use auth::{compute_digest_response, Credentials, DigestChallenge};
pub use call::{CallHandle, CallState};
pub use config::{Identity, UaConfig};
pub use dialog::DialogIdentity;
pub use message::{header_value, Header, HeaderList, Method, Request, Response};
pub use parser::{parse_message, ContactBinding, ReceivedMessage, StartLine};
pub use registration::{LeasePolicy, RegistrationLease};
pub use stack::SipStack;
pub use transaction::{AttemptOutcome, ControlRequest, MatchPolicy, TransactionEngine};
pub use transport::{Inbound, Transport, TransportError};

#[derive(Debug, Error)]
pub enum SipError {
    #[error("buffer capacity exceeded")]
    Capacity,
    #[error("malformed message: {0}")]
    Invalid(&'static str),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("{method} gave up after {attempts} attempts (last: {last})")]
    Exhausted {
        method: Method,
        attempts: u32,
        last: AttemptOutcome,
    },
    #[error("server rejected request with status {0}")]
    Rejected(u16),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("200 OK was never acknowledged")]
    AckTimeout,
}

pub type Result<T> = std::result::Result<T, SipError>;
