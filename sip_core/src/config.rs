use std::time::Duration;

use crate::{message::Method, registration::LeasePolicy, transaction::MatchPolicy};

/// Who we are and where the registrar lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub password: String,
    /// Display name put into From/To of REGISTER.
    pub device_label: String,
    pub client_ip: String,
    pub server_ip: String,
    pub client_port: u16,
    pub server_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UaConfig {
    /// Methods advertised in Allow and accepted on inbound request lines.
    /// REGISTER is always accepted in addition.
    pub allowed_methods: Vec<Method>,
    pub expires: u32,
    pub user_agent: String,
    pub lease_policy: LeasePolicy,
    pub match_policy: MatchPolicy,
    /// Skip 180 Ringing so the caller only ever sees 100 Trying.
    pub silent: bool,
    pub max_attempts: u32,
    pub max_ack_waits: u32,
}

impl Default for UaConfig {
    fn default() -> Self {
        Self {
            allowed_methods: vec![Method::Invite, Method::Ack, Method::Bye, Method::Cancel],
            expires: 3600,
            user_agent: concat!("callguard/", env!("CARGO_PKG_VERSION")).to_string(),
            lease_policy: LeasePolicy::Fraction(0.75),
            match_policy: MatchPolicy::Sequence,
            silent: false,
            max_attempts: 10,
            max_ack_waits: 10,
        }
    }
}

impl UaConfig {
    pub fn with_lead_time(mut self, lead: Duration) -> Self {
        self.lease_policy = LeasePolicy::LeadTime(lead);
        self
    }

    /// Methods the parser recognises on request lines.
    pub fn accepted_methods(&self) -> Vec<Method> {
        let mut methods = self.allowed_methods.clone();
        if !methods.contains(&Method::Register) {
            methods.push(Method::Register);
        }
        methods
    }

    pub fn allow_header(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
