//! Builders for every message this UA sends.

use crate::{
    auth::{Credentials, DigestCredentials},
    call::CallHandle,
    config::{Identity, UaConfig},
    dialog::DialogIdentity,
    message::{Method, Request, Response},
    parser::ReceivedMessage,
    Result, SipError,
};

const MAX_FORWARDS: &str = "70";
const SUPPORTED: &str = "replaces, from-change, 100rel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteResponse {
    Trying,
    Ringing,
    Ok,
    /// Final answer to an INVITE the caller cancelled.
    RequestTerminated,
}

impl InviteResponse {
    pub fn status_code(self) -> u16 {
        match self {
            InviteResponse::Trying => 100,
            InviteResponse::Ringing => 180,
            InviteResponse::Ok => 200,
            InviteResponse::RequestTerminated => 487,
        }
    }
}

pub fn registrar_uri(identity: &Identity) -> String {
    format!("sip:{}", identity.server_ip)
}

fn via(identity: &Identity, branch: &str) -> String {
    format!(
        "SIP/2.0/UDP {}:{};rport;branch={}",
        identity.client_ip, identity.client_port, branch
    )
}

/// URI this UA registers as its binding.
pub fn contact_uri(identity: &Identity) -> String {
    format!(
        "sip:{}@{}:{};transport=udp",
        identity.user, identity.client_ip, identity.client_port
    )
}

fn local_contact(identity: &Identity) -> String {
    format!(
        "<sip:{}@{}:{}>",
        identity.user, identity.client_ip, identity.client_port
    )
}

/// REGISTER using the dialog's current branch, tag, Call-ID and CSeq.
/// Authorization (or Proxy-Authorization after a 407) is added only once
/// `credentials` hold a challenge.
pub fn build_register(
    identity: &Identity,
    dialog: &DialogIdentity,
    credentials: &mut Credentials,
    expires: u32,
    config: &UaConfig,
) -> Result<Request> {
    let uri = registrar_uri(identity);
    let address = format!(
        "\"{}\" <sip:{}@{}>",
        identity.device_label, identity.user, identity.server_ip
    );
    let contact = format!(
        "<{}>;+sip.instance=\"<urn:uuid:{}>\"",
        contact_uri(identity),
        dialog.instance()
    );
    let authorization = credentials.authorization(
        &DigestCredentials {
            username: &identity.user,
            password: &identity.password,
        },
        Method::Register.as_str(),
        &uri,
        "",
    )?;

    let mut req = Request::new(Method::Register, uri);
    req.add_header("Via", via(identity, dialog.branch()))?;
    req.add_header("From", format!("{};tag={}", address, dialog.tag()))?;
    req.add_header("To", address)?;
    req.add_header("Call-ID", dialog.call_id())?;
    req.add_header("CSeq", format!("{} {}", dialog.cseq(), Method::Register))?;
    req.add_header("Contact", contact)?;
    if let Some((name, value)) = authorization {
        req.add_header(name, value)?;
    }
    req.add_header("Allow", config.allow_header())?;
    req.add_header("Max-Forwards", MAX_FORWARDS)?;
    req.add_header("User-Agent", config.user_agent.as_str())?;
    req.add_header("Expires", expires.to_string())?;
    req.add_header("Content-Length", "0")?;
    Ok(req)
}

/// Response to the INVITE held by `call`. Via, From, To and Call-ID are
/// echoed. Everything past Trying tags the To header with the call's
/// response tag.
pub fn build_invite_response(
    kind: InviteResponse,
    call: &CallHandle,
    identity: &Identity,
    config: &UaConfig,
) -> Result<Response> {
    let invite = call.invite();
    let mut resp = Response::new(kind.status_code());

    let mut has_via = false;
    for (_, value) in invite.headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case("Via")) {
        resp.add_header("Via", value.as_str())?;
        has_via = true;
    }
    if !has_via {
        return Err(SipError::Invalid("Via"));
    }

    resp.add_header("From", invite.require("From")?)?;
    let to = invite.require("To")?;
    match kind {
        InviteResponse::Trying => resp.add_header("To", to)?,
        InviteResponse::Ringing | InviteResponse::Ok | InviteResponse::RequestTerminated => {
            resp.add_header("To", with_tag(to, call.response_tag()))?
        }
    }
    resp.add_header("Call-ID", invite.require("Call-ID")?)?;
    resp.add_header("CSeq", format!("{} {}", call.invite_cseq(), Method::Invite))?;

    if matches!(kind, InviteResponse::Ringing | InviteResponse::Ok) {
        resp.add_header("Contact", local_contact(identity))?;
        resp.add_header("Allow", config.allow_header())?;
        resp.add_header("Supported", SUPPORTED)?;
    }
    resp.add_header("User-Agent", config.user_agent.as_str())?;
    resp.add_header("Content-Length", "0")?;
    Ok(resp)
}

/// BYE for an answered inbound call. We originate this request, so the
/// INVITE's From and To swap places.
pub fn build_bye(
    call: &CallHandle,
    branch: &str,
    cseq: u32,
    identity: &Identity,
    config: &UaConfig,
) -> Result<Request> {
    let invite = call.invite();
    let target = invite
        .contact_uri
        .as_deref()
        .ok_or(SipError::Invalid("Contact"))?;

    let mut req = Request::new(Method::Bye, target);
    req.add_header("Via", via(identity, branch))?;
    req.add_header("From", with_tag(invite.require("To")?, call.response_tag()))?;
    req.add_header("To", invite.require("From")?)?;
    req.add_header("Call-ID", invite.require("Call-ID")?)?;
    req.add_header("CSeq", format!("{} {}", cseq, Method::Bye))?;
    req.add_header("Contact", format!("<{}>", target))?;
    req.add_header("Max-Forwards", MAX_FORWARDS)?;
    req.add_header("User-Agent", config.user_agent.as_str())?;
    req.add_header("Content-Length", "0")?;
    Ok(req)
}

/// Plain response to an inbound request (BYE, CANCEL) that only needs its
/// transaction headers echoed.
pub fn build_echo_response(
    status_code: u16,
    request: &ReceivedMessage,
    config: &UaConfig,
) -> Result<Response> {
    let mut resp = Response::new(status_code);
    for (_, value) in request.headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case("Via")) {
        resp.add_header("Via", value.as_str())?;
    }
    resp.add_header("From", request.require("From")?)?;
    resp.add_header("To", request.require("To")?)?;
    resp.add_header("Call-ID", request.require("Call-ID")?)?;
    resp.add_header("CSeq", request.require("CSeq")?)?;
    resp.add_header("User-Agent", config.user_agent.as_str())?;
    resp.add_header("Content-Length", "0")?;
    Ok(resp)
}

fn with_tag(address: &str, tag: &str) -> String {
    if address.to_ascii_lowercase().contains(";tag=") {
        address.to_string()
    } else {
        format!("{};tag={}", address, tag)
    }
}
