use std::time::Instant;

use log::{debug, info, warn};

use crate::{
    auth::Credentials,
    call::{CallHandle, CallState},
    codec::{build_echo_response, build_invite_response, contact_uri, InviteResponse},
    config::{Identity, UaConfig},
    dialog::DialogIdentity,
    message::Method,
    parser::{parse_message, ReceivedMessage},
    registration::RegistrationLease,
    transaction::{ControlRequest, TransactionEngine},
    transport::{Transport, TransportError},
    Result, SipError,
};

/// The call currently owned by the UA. Handles given out by
/// [`SipStack::perceive_call`] are only honoured while they match it.
#[derive(Debug, Clone)]
struct ActiveCall {
    /// Snapshot taken when the call was perceived.
    call: CallHandle,
    answered: bool,
}

/// High-level SIP user agent that wires registration, the transaction
/// engine and the inbound call state machine to one transport.
///
/// Everything is blocking and sequential; the caller's loop decides when to
/// refresh the registration and when to look for calls.
pub struct SipStack<T: Transport> {
    identity: Identity,
    config: UaConfig,
    transport: T,
    dialog: DialogIdentity,
    credentials: Credentials,
    lease: RegistrationLease,
    active_call: Option<ActiveCall>,
}

impl<T: Transport> SipStack<T> {
    pub fn new(identity: Identity, config: UaConfig, transport: T) -> Self {
        let dialog = DialogIdentity::new(&identity.client_ip);
        let lease = RegistrationLease::new(config.expires);
        Self {
            identity,
            config,
            transport,
            dialog,
            credentials: Credentials::default(),
            lease,
            active_call: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &UaConfig {
        &self.config
    }

    pub fn dialog(&self) -> &DialogIdentity {
        &self.dialog
    }

    pub fn lease(&self) -> &RegistrationLease {
        &self.lease
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_registered(&self) -> bool {
        self.lease.is_registered()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Number of the call currently in progress, if any.
    pub fn active_number(&self) -> Option<&str> {
        self.active_call.as_ref().map(|active| active.call.number())
    }

    /// The client address changed. The registration dialog is bound to it,
    /// so a new one starts and the UA must register again.
    pub fn set_client_ip(&mut self, client_ip: &str) {
        if self.identity.client_ip == client_ip {
            return;
        }
        info!("client address {} -> {}", self.identity.client_ip, client_ip);
        self.identity.client_ip = client_ip.to_string();
        self.dialog.restart(client_ip);
        self.lease.expire();
    }

    fn control(&mut self, request: ControlRequest<'_>) -> Result<ReceivedMessage> {
        TransactionEngine::new(&self.identity, &self.config).send_control_request(
            &mut self.transport,
            &mut self.dialog,
            &mut self.credentials,
            request,
        )
    }

    // --- Registration --------------------------------------------------------

    pub fn register(&mut self) -> Result<()> {
        let expires = self.config.expires;
        match self.control(ControlRequest::Register { expires }) {
            Ok(reply) => {
                let granted = reply.expires_for(&contact_uri(&self.identity));
                self.lease
                    .renew(granted, expires, &self.config.lease_policy, Instant::now());
                info!(
                    "registered {}@{} for {}s",
                    self.identity.user,
                    self.identity.server_ip,
                    self.lease.expires()
                );
                Ok(())
            }
            Err(e) => {
                self.lease.expire();
                Err(e)
            }
        }
    }

    /// Register again when unregistered or when the lease is due.
    /// Returns whether a REGISTER transaction ran.
    pub fn refresh_registration(&mut self, now: Instant) -> Result<bool> {
        if !self.lease.is_due(now) {
            return Ok(false);
        }
        debug!("registration due");
        self.register()?;
        Ok(true)
    }

    /// Withdraw the binding with `Expires: 0`.
    pub fn unregister(&mut self) -> Result<()> {
        self.control(ControlRequest::Register { expires: 0 })?;
        self.lease.expire();
        info!("unregistered {}@{}", self.identity.user, self.identity.server_ip);
        Ok(())
    }

    // --- Inbound calls -------------------------------------------------------

    /// Wait once for an inbound message. An INVITE is answered with Trying
    /// (and Ringing unless silent) and returned as a new call; anything else,
    /// including every failure, yields `None`.
    pub fn perceive_call(&mut self) -> Option<CallHandle> {
        if !self.lease.is_registered() {
            debug!("perceive_call: not registered");
            return None;
        }

        let msg = match self.receive() {
            Ok(msg) => msg,
            Err(SipError::Transport(TransportError::Timeout)) => return None,
            Err(e) => {
                warn!("perceive_call: {}", e);
                return None;
            }
        };

        match msg.method() {
            Some(Method::Invite) => {}
            Some(Method::Bye) | Some(Method::Cancel) => {
                self.on_peer_teardown(&msg);
                return None;
            }
            other => {
                debug!("perceive_call: ignoring {:?}", other);
                return None;
            }
        }

        if let (Some(active), Some(call_id)) = (&self.active_call, msg.call_id.as_deref()) {
            if active.call.call_id() == call_id {
                debug!("perceive_call: retransmitted INVITE for {}", call_id);
                return None;
            }
        }

        let mut call = match CallHandle::from_invite(msg) {
            Ok(call) => call,
            Err(e) => {
                warn!("perceive_call: unusable INVITE: {}", e);
                return None;
            }
        };

        if let Err(e) = self.respond(&mut call, InviteResponse::Trying) {
            warn!("perceive_call: sending Trying failed: {}", e);
            return None;
        }
        if !self.config.silent {
            if let Err(e) = self.respond(&mut call, InviteResponse::Ringing) {
                warn!("perceive_call: sending Ringing failed: {}", e);
                return None;
            }
        }

        if let Some(previous) = self.active_call.take() {
            info!("call from {} superseded", previous.call.number());
        }
        self.active_call = Some(ActiveCall {
            call: call.clone(),
            answered: false,
        });
        info!(
            "incoming call from {} ({})",
            call.number(),
            call.name().unwrap_or("unknown")
        );
        Some(call)
    }

    /// Answer the call with 200 OK and wait for the caller's ACK.
    ///
    /// Every receive timeout, and every retransmitted INVITE, resends the
    /// 200. When the wait budget runs out the dialog is torn down with a BYE
    /// and `AckTimeout` is returned, so no call is left half open.
    pub fn pick_up_call(&mut self, call: &mut CallHandle) -> Result<()> {
        self.ensure_active(call)?;
        if !call.state().can_advance(CallState::Answered) {
            return Err(SipError::InvalidState("call is not ringing"));
        }
        self.respond(call, InviteResponse::Ok)?;
        if let Some(active) = self.active_call.as_mut() {
            active.answered = true;
        }

        let waits = self.config.max_ack_waits.max(1);
        for wait in 1..=waits {
            let msg = match self.receive() {
                Ok(msg) => msg,
                Err(SipError::Transport(TransportError::Timeout)) => {
                    debug!("no ACK yet ({}/{}), resending 200", wait, waits);
                    self.resend_ok(call);
                    continue;
                }
                Err(e) => {
                    warn!("waiting for ACK: {}", e);
                    continue;
                }
            };

            if msg.call_id.as_deref() != Some(call.call_id()) {
                debug!("waiting for ACK: ignoring message for another dialog");
                continue;
            }

            match msg.method() {
                Some(Method::Ack) if msg.cseq == Some(call.invite_cseq()) => {
                    call.observe_cseq(call.invite_cseq());
                    info!("call from {} answered", call.number());
                    return Ok(());
                }
                Some(Method::Invite) => self.resend_ok(call),
                Some(Method::Bye) | Some(Method::Cancel) => {
                    self.on_peer_teardown(&msg);
                    call.advance(CallState::Terminated)?;
                    return Err(SipError::InvalidState("call ended by peer"));
                }
                _ => debug!("waiting for ACK: ignoring {:?}", msg.start),
            }
        }

        warn!("call from {} never acknowledged, abandoning", call.number());
        if let Err(e) = self.control(ControlRequest::Bye(&*call)) {
            warn!("BYE for unacknowledged call failed: {}", e);
        }
        call.advance(CallState::Terminated)?;
        self.active_call = None;
        Err(SipError::AckTimeout)
    }

    /// End an answered call with BYE. Succeeds only on a matching 200.
    pub fn hang_up(&mut self, call: &mut CallHandle) -> Result<()> {
        self.ensure_active(call)?;
        if call.state() != CallState::Answered {
            return Err(SipError::InvalidState("call is not answered"));
        }

        let reply = self.control(ControlRequest::Bye(&*call))?;
        if let Some(cseq) = reply.cseq {
            call.observe_cseq(cseq);
        }
        call.advance(CallState::Terminated)?;
        self.active_call = None;
        info!("hung up on {}", call.number());
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.lease.expire();
        self.active_call = None;
    }

    // --- Helpers -------------------------------------------------------------

    fn receive(&mut self) -> Result<ReceivedMessage> {
        let inbound = self.transport.receive_request()?;
        let text = String::from_utf8_lossy(&inbound.message);
        debug!("received from {}:\n{}", inbound.peer, text);
        parse_message(&text, &self.config.accepted_methods())
    }

    fn ensure_active(&self, call: &CallHandle) -> Result<()> {
        match &self.active_call {
            Some(active)
                if active.call.call_id() == call.call_id() && active.call.number() == call.number() =>
            {
                Ok(())
            }
            _ => Err(SipError::InvalidState("no such call in progress")),
        }
    }

    fn respond(&mut self, call: &mut CallHandle, kind: InviteResponse) -> Result<()> {
        let next = match kind {
            InviteResponse::Trying => CallState::Trying,
            InviteResponse::Ringing => CallState::Ringing,
            InviteResponse::Ok => CallState::Answered,
            InviteResponse::RequestTerminated => CallState::Terminated,
        };
        if !call.state().can_advance(next) {
            return Err(SipError::InvalidState("call state transition"));
        }
        self.send_invite_response(kind, call)?;
        call.advance(next)
    }

    fn send_invite_response(&mut self, kind: InviteResponse, call: &CallHandle) -> Result<()> {
        let wire = build_invite_response(kind, call, &self.identity, &self.config)?.render()?;
        debug!("sending {}:\n{}", kind.status_code(), wire);
        self.transport.send_response(wire.as_bytes())?;
        Ok(())
    }

    fn resend_ok(&mut self, call: &CallHandle) {
        if let Err(e) = self.send_invite_response(InviteResponse::Ok, call) {
            warn!("resending 200 failed: {}", e);
        }
    }

    // The peer gave up on a call. Ours is confirmed with 200 and forgotten,
    // and a cancelled INVITE that was never answered gets its 487. Any other
    // dialog gets 481.
    fn on_peer_teardown(&mut self, msg: &ReceivedMessage) {
        let ours = self
            .active_call
            .as_ref()
            .is_some_and(|active| msg.call_id.as_deref() == Some(active.call.call_id()));
        let status = if ours { 200 } else { 481 };

        match build_echo_response(status, msg, &self.config).and_then(|r| r.render()) {
            Ok(wire) => {
                if let Err(e) = self.transport.send_response(wire.as_bytes()) {
                    warn!("answering {:?} failed: {}", msg.method(), e);
                }
            }
            Err(e) => warn!("cannot answer {:?}: {}", msg.method(), e),
        }

        if !ours {
            debug!("{:?} for unknown call {:?}", msg.method(), msg.call_id);
            return;
        }
        if let Some(active) = self.active_call.take() {
            if msg.method() == Some(Method::Cancel) && !active.answered {
                if let Err(e) =
                    self.send_invite_response(InviteResponse::RequestTerminated, &active.call)
                {
                    warn!("terminating cancelled INVITE failed: {}", e);
                }
            }
            info!("call from {} ended by peer", active.call.number());
        }
    }
}
