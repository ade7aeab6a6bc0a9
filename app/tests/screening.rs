use std::collections::VecDeque;
use std::net::SocketAddr;

use app::{blocklist::Blocklist, screen_call};
use sip_core::{
    parse_message, CallState, Identity, Inbound, Method, SipStack, Transport, TransportError,
    UaConfig,
};

/// Registrar that accepts everything and a caller that ACKs every 200.
#[derive(Default)]
struct Loopback {
    inbound: VecDeque<String>,
    sent_methods: Vec<Method>,
    statuses: Vec<u16>,
}

fn echo(request: &str, code: u16) -> String {
    let msg = parse_message(request, &UaConfig::default().accepted_methods()).unwrap();
    let mut out = format!("SIP/2.0 {code} OK\r\n");
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        out.push_str(&format!("{}: {}\r\n", name, msg.header(name).unwrap()));
    }
    out.push_str("Contact: <sip:620@10.0.0.2:5062>;expires=300\r\nContent-Length: 0\r\n\r\n");
    out
}

impl Transport for Loopback {
    fn send_request(&mut self, message: &[u8]) -> Result<Vec<u8>, TransportError> {
        let text = std::str::from_utf8(message).unwrap();
        let msg = parse_message(text, &UaConfig::default().accepted_methods()).unwrap();
        self.sent_methods.extend(msg.method());
        Ok(echo(text, 200).into_bytes())
    }

    fn receive_request(&mut self) -> Result<Inbound, TransportError> {
        let message = self.inbound.pop_front().ok_or(TransportError::Timeout)?;
        Ok(Inbound {
            message: message.into_bytes(),
            peer: SocketAddr::from(([10, 0, 0, 1], 5060)),
        })
    }

    fn send_response(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let text = std::str::from_utf8(message).unwrap();
        let msg = parse_message(text, &[]).unwrap();
        let code = msg.status().unwrap();
        if code == 200 && msg.cseq_method == Some(Method::Invite) {
            self.inbound.push_back(format!(
                "ACK sip:620@10.0.0.2:5062 SIP/2.0\r\nCall-ID: {}\r\nCSeq: {} ACK\r\n\r\n",
                msg.call_id.unwrap(),
                msg.cseq.unwrap()
            ));
        }
        self.statuses.push(code);
        Ok(())
    }

    fn close(&mut self) {}
}

fn invite(number: &str) -> String {
    format!(
        "INVITE sip:620@10.0.0.2:5062 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK{number}\r\n\
         From: <sip:{number}@fritz.box>;tag=f{number}\r\n\
         To: <sip:620@fritz.box>\r\n\
         Call-ID: {number}@10.0.0.1\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:{number}@10.0.0.1:5060>\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

fn ua() -> SipStack<Loopback> {
    let identity = Identity {
        user: "620".into(),
        password: "pw".into(),
        device_label: "callguard".into(),
        client_ip: "10.0.0.2".into(),
        server_ip: "10.0.0.1".into(),
        client_port: 5062,
        server_port: 5060,
    };
    let mut ua = SipStack::new(identity, UaConfig::default(), Loopback::default());
    ua.register().unwrap();
    ua
}

#[test]
fn blocked_number_is_picked_up_and_hung_up() {
    let mut ua = ua();
    ua.transport_mut().inbound.push_back(invite("09001234"));
    let mut call = ua.perceive_call().unwrap();

    screen_call(&mut ua, &mut call, &Blocklist::parse("0900"));

    assert_eq!(call.state(), CallState::Terminated);
    assert_eq!(ua.transport().statuses, [100, 180, 200]);
    assert_eq!(ua.transport().sent_methods, [Method::Register, Method::Bye]);
    assert_eq!(ua.active_number(), None);
}

#[test]
fn other_numbers_keep_ringing() {
    let mut ua = ua();
    ua.transport_mut().inbound.push_back(invite("0301234567"));
    let mut call = ua.perceive_call().unwrap();

    screen_call(&mut ua, &mut call, &Blocklist::parse("0900"));

    assert_eq!(call.state(), CallState::Ringing);
    assert_eq!(ua.transport().statuses, [100, 180]);
    assert_eq!(ua.active_number(), Some("0301234567"));
}
