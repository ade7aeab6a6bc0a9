use crate::{
    dialog::{new_tag, Tag},
    message::Method,
    parser::ReceivedMessage,
    Result, SipError,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    #[default]
    Idle,
    Trying,
    Ringing,
    Answered,
    Terminated,
}

impl CallState {
    pub fn can_advance(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Trying)
                | (Trying, Ringing)
                | (Trying, Answered)
                | (Ringing, Answered)
                | (Trying, Terminated)
                | (Ringing, Terminated)
                | (Answered, Terminated)
        )
    }
}

/// One inbound call, from its INVITE to the end of the dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    number: String,
    name: Option<String>,
    response_tag: Tag,
    state: CallState,
    invite: ReceivedMessage,
    last_cseq: u32,
}

impl CallHandle {
    pub(crate) fn from_invite(invite: ReceivedMessage) -> Result<Self> {
        if invite.method() != Some(Method::Invite) {
            return Err(SipError::Invalid("not an INVITE"));
        }
        invite.call_id.as_ref().ok_or(SipError::Invalid("Call-ID"))?;
        let last_cseq = invite.cseq.ok_or(SipError::Invalid("CSeq"))?;
        let number = invite
            .from_number
            .clone()
            .ok_or(SipError::Invalid("From number"))?;

        Ok(Self {
            number,
            name: invite.from_name.clone(),
            response_tag: new_tag(),
            state: CallState::Idle,
            invite,
            last_cseq,
        })
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call_id(&self) -> &str {
        self.invite.call_id.as_deref().unwrap_or_default()
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn response_tag(&self) -> &str {
        &self.response_tag
    }

    pub fn invite(&self) -> &ReceivedMessage {
        &self.invite
    }

    /// CSeq of the INVITE this call answers.
    pub fn invite_cseq(&self) -> u32 {
        self.invite.cseq.unwrap_or_default()
    }

    pub fn last_cseq(&self) -> u32 {
        self.last_cseq
    }

    pub(crate) fn observe_cseq(&mut self, cseq: u32) {
        self.last_cseq = self.last_cseq.max(cseq);
    }

    pub(crate) fn advance(&mut self, next: CallState) -> Result<()> {
        if !self.state.can_advance(next) {
            return Err(SipError::InvalidState("call state transition"));
        }
        log::debug!("call {} {:?} -> {:?}", self.number, self.state, next);
        self.state = next;
        Ok(())
    }
}
