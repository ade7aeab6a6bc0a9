use core::fmt;

use log::{debug, info, warn};

use crate::{
    auth::Credentials,
    call::CallHandle,
    codec::{build_bye, build_register},
    config::{Identity, UaConfig},
    dialog::DialogIdentity,
    message::Method,
    parser::{parse_message, ReceivedMessage},
    transport::Transport,
    Result, SipError,
};

/// Hard ceiling on transmissions per control request.
pub const MAX_ATTEMPTS: u32 = 10;
/// Status that ends a transaction without further retries.
pub const FATAL_STATUS: u16 = 500;

/// Which reply fields must echo the request for a 200 to count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// CSeq number, CSeq method and Call-ID.
    #[default]
    Sequence,
    /// As `Sequence`, plus the From tag.
    SequenceAndTag,
}

/// Why the most recent attempt did not finish the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing came back before the transport gave up.
    NoReply,
    /// Something came back but could not be parsed as a response.
    Malformed,
    /// A response with a non-final or non-success status.
    Status(u16),
    /// A 200 whose CSeq, Call-ID or tag belong to a different request.
    Mismatch,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::NoReply => f.write_str("no reply"),
            AttemptOutcome::Malformed => f.write_str("malformed reply"),
            AttemptOutcome::Status(code) => write!(f, "status {}", code),
            AttemptOutcome::Mismatch => f.write_str("200 for another request"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ControlRequest<'a> {
    Register { expires: u32 },
    Bye(&'a CallHandle),
}

impl ControlRequest<'_> {
    pub fn method(&self) -> Method {
        match self {
            ControlRequest::Register { .. } => Method::Register,
            ControlRequest::Bye(_) => Method::Bye,
        }
    }
}

/// What a matching reply has to echo.
struct Expected {
    cseq: u32,
    call_id: String,
    tag: String,
}

impl Expected {
    fn matches(&self, reply: &ReceivedMessage, method: Method, policy: MatchPolicy) -> bool {
        let sequence = reply.cseq == Some(self.cseq)
            && reply.cseq_method == Some(method)
            && reply.call_id.as_deref() == Some(self.call_id.as_str());
        match policy {
            MatchPolicy::Sequence => sequence,
            MatchPolicy::SequenceAndTag => {
                sequence && reply.from_tag.as_deref() == Some(self.tag.as_str())
            }
        }
    }
}

/// Bounded retry loop for the requests this UA originates.
pub struct TransactionEngine<'a> {
    identity: &'a Identity,
    config: &'a UaConfig,
}

impl<'a> TransactionEngine<'a> {
    pub fn new(identity: &'a Identity, config: &'a UaConfig) -> Self {
        Self { identity, config }
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Send `request` until a matching 200 arrives, a fatal status ends the
    /// transaction, or the attempt budget is spent.
    ///
    /// Credentials are cleared first, so the opening attempt always goes out
    /// unauthenticated and the server's challenge is answered on the next.
    pub fn send_control_request<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        dialog: &mut DialogIdentity,
        credentials: &mut Credentials,
        request: ControlRequest<'_>,
    ) -> Result<ReceivedMessage> {
        credentials.clear();

        let method = request.method();
        let accepted = self.config.accepted_methods();
        let attempts = self.max_attempts();
        let mut bye_cseq = match request {
            ControlRequest::Bye(call) => call.last_cseq().wrapping_add(1),
            ControlRequest::Register { .. } => 0,
        };
        let mut last = AttemptOutcome::NoReply;

        for attempt in 1..=attempts {
            let branch = dialog.next_branch().to_string();
            let (wire, expected) = match request {
                ControlRequest::Register { expires } => {
                    let req = build_register(self.identity, dialog, credentials, expires, self.config)?;
                    let expected = Expected {
                        cseq: dialog.cseq(),
                        call_id: dialog.call_id().to_string(),
                        tag: dialog.tag().to_string(),
                    };
                    (req.render()?, expected)
                }
                ControlRequest::Bye(call) => {
                    let req = build_bye(call, &branch, bye_cseq, self.identity, self.config)?;
                    let expected = Expected {
                        cseq: bye_cseq,
                        call_id: call.call_id().to_string(),
                        tag: call.response_tag().to_string(),
                    };
                    (req.render()?, expected)
                }
            };

            debug!("{} attempt {}/{}:\n{}", method, attempt, attempts, wire);
            let raw = match transport.send_request(wire.as_bytes()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("{} attempt {} got no reply: {}", method, attempt, e);
                    last = AttemptOutcome::NoReply;
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&raw);
            debug!("{} reply:\n{}", method, text);
            let reply = match parse_message(&text, &accepted) {
                Ok(reply) if reply.is_empty() => {
                    last = AttemptOutcome::NoReply;
                    continue;
                }
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{} attempt {} got a malformed reply: {}", method, attempt, e);
                    last = AttemptOutcome::Malformed;
                    continue;
                }
            };

            if let Some(echoed) = reply.cseq {
                match request {
                    ControlRequest::Register { .. } => dialog.advance_from_peer(echoed),
                    ControlRequest::Bye(_) => bye_cseq = echoed.wrapping_add(1),
                }
            }
            if let Some(challenge) = &reply.challenge {
                debug!("{} challenged by realm {}", method, challenge.realm);
                credentials.update(challenge.clone());
            }

            match reply.status() {
                Some(FATAL_STATUS) => {
                    warn!("{} rejected with {}", method, FATAL_STATUS);
                    return Err(SipError::Rejected(FATAL_STATUS));
                }
                Some(200) if expected.matches(&reply, method, self.config.match_policy) => {
                    info!("{} completed after {} attempt(s)", method, attempt);
                    return Ok(reply);
                }
                Some(200) => {
                    warn!("{} attempt {}: 200 does not match the request", method, attempt);
                    last = AttemptOutcome::Mismatch;
                }
                Some(code) => last = AttemptOutcome::Status(code),
                None => last = AttemptOutcome::Malformed,
            }
        }

        warn!("{} failed after {} attempts ({})", method, attempts, last);
        Err(SipError::Exhausted {
            method,
            attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::transport::{Inbound, TransportError};

    type Responder = Box<dyn FnMut(&ReceivedMessage) -> Option<String>>;

    struct ScriptedTransport {
        responder: Responder,
        sent: Vec<ReceivedMessage>,
        inbound: VecDeque<Inbound>,
    }

    impl ScriptedTransport {
        fn new(responder: impl FnMut(&ReceivedMessage) -> Option<String> + 'static) -> Self {
            Self {
                responder: Box::new(responder),
                sent: Vec::new(),
                inbound: VecDeque::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send_request(&mut self, message: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
            let text = std::str::from_utf8(message).unwrap();
            let req = parse_message(text, &UaConfig::default().accepted_methods()).unwrap();
            let reply = (self.responder)(&req);
            self.sent.push(req);
            reply.map(String::into_bytes).ok_or(TransportError::Timeout)
        }

        fn receive_request(&mut self) -> std::result::Result<Inbound, TransportError> {
            self.inbound.pop_front().ok_or(TransportError::Timeout)
        }

        fn send_response(&mut self, _message: &[u8]) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn reply(req: &ReceivedMessage, code: u16, extra: &str) -> String {
        format!(
            "SIP/2.0 {} X\r\nVia: {}\r\nFrom: {}\r\nTo: {};tag=srv\r\nCall-ID: {}\r\nCSeq: {}\r\n{}Content-Length: 0\r\n\r\n",
            code,
            req.header("Via").unwrap(),
            req.header("From").unwrap(),
            req.header("To").unwrap(),
            req.header("Call-ID").unwrap(),
            req.header("CSeq").unwrap(),
            extra,
        )
    }

    fn identity() -> Identity {
        Identity {
            user: "620".into(),
            password: "secret".into(),
            device_label: "callguard".into(),
            client_ip: "192.168.178.20".into(),
            server_ip: "192.168.178.1".into(),
            client_port: 5062,
            server_port: 5060,
        }
    }

    fn register(transport: &mut ScriptedTransport, config: &UaConfig) -> Result<ReceivedMessage> {
        let identity = identity();
        let mut dialog = DialogIdentity::new(&identity.client_ip);
        let mut creds = Credentials::default();
        TransactionEngine::new(&identity, config).send_control_request(
            transport,
            &mut dialog,
            &mut creds,
            ControlRequest::Register { expires: 300 },
        )
    }

    #[test]
    fn challenge_then_success() {
        let mut transport = ScriptedTransport::new(|req| {
            Some(match req.header("Authorization") {
                None => reply(req, 401, "WWW-Authenticate: Digest realm=\"fritz.box\", nonce=\"n1\"\r\n"),
                Some(_) => reply(req, 200, ""),
            })
        });
        let ok = register(&mut transport, &UaConfig::default()).unwrap();
        assert_eq!(ok.status(), Some(200));
        assert_eq!(transport.sent.len(), 2);
        assert_eq!(transport.sent[0].header("Authorization"), None);
        assert!(transport.sent[1].header("Authorization").is_some());
        // CSeq follows the peer's echo, the branch is fresh.
        assert_eq!(transport.sent[1].cseq, Some(transport.sent[0].cseq.unwrap() + 1));
        assert_ne!(transport.sent[0].header("Via"), transport.sent[1].header("Via"));
    }

    #[test]
    fn never_more_than_ten_transmissions() {
        let mut transport = ScriptedTransport::new(|_| None);
        let config = UaConfig {
            max_attempts: 50,
            ..UaConfig::default()
        };
        let err = register(&mut transport, &config).unwrap_err();
        assert!(matches!(
            err,
            SipError::Exhausted {
                method: Method::Register,
                attempts: 10,
                last: AttemptOutcome::NoReply
            }
        ));
        assert_eq!(transport.sent.len(), 10);
    }

    #[test]
    fn fatal_status_stops_immediately() {
        let mut transport = ScriptedTransport::new(|req| Some(reply(req, 500, "")));
        let err = register(&mut transport, &UaConfig::default()).unwrap_err();
        assert!(matches!(err, SipError::Rejected(500)));
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn garbage_is_reported_apart_from_silence() {
        let mut transport =
            ScriptedTransport::new(|_| Some("SIP/2.0 200 OK\r\nbroken header\r\n\r\n".to_string()));
        let err = register(&mut transport, &UaConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SipError::Exhausted {
                last: AttemptOutcome::Malformed,
                ..
            }
        ));
    }

    #[test]
    fn mismatched_ok_is_retried() {
        let mut first = true;
        let mut transport = ScriptedTransport::new(move |req| {
            if first {
                first = false;
                Some(reply(req, 200, "").replace(req.header("Call-ID").unwrap(), "stale@elsewhere"))
            } else {
                Some(reply(req, 200, ""))
            }
        });
        register(&mut transport, &UaConfig::default()).unwrap();
        assert_eq!(transport.sent.len(), 2);
    }

    #[test]
    fn tag_policy_requires_from_tag_echo() {
        let config = UaConfig {
            match_policy: MatchPolicy::SequenceAndTag,
            ..UaConfig::default()
        };
        let mut transport = ScriptedTransport::new(|req| {
            let from = req.header("From").unwrap();
            Some(reply(req, 200, "").replace(from, "<sip:620@192.168.178.1>;tag=other"))
        });
        assert!(matches!(
            register(&mut transport, &config),
            Err(SipError::Exhausted {
                last: AttemptOutcome::Mismatch,
                ..
            })
        ));

        let mut transport = ScriptedTransport::new(|req| Some(reply(req, 200, "")));
        register(&mut transport, &config).unwrap();
        assert_eq!(transport.sent.len(), 1);
        assert!(transport.inbound.is_empty());
    }
}
