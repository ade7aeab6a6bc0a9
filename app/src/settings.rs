//! Compile-time configuration loaded via `toml-cfg`.

use std::time::Duration;

use sip_core::{Identity, LeasePolicy, MatchPolicy, UaConfig};

use crate::blocklist::Blocklist;

#[toml_cfg::toml_config]
pub struct Settings {
    #[default("620")]
    pub sip_user: &'static str,
    #[default("")]
    pub sip_password: &'static str,
    #[default("callguard")]
    pub device_label: &'static str,
    #[default("192.168.178.1")]
    pub server_ip: &'static str,
    #[default(5060)]
    pub server_port: u16,
    #[default(5062)]
    pub client_port: u16,
    #[default(3600)]
    pub expires: u32,
    #[default(75)]
    pub lease_percent: u32,
    #[default(0)]
    pub lease_lead_secs: u64,
    #[default(2000)]
    pub read_timeout_ms: u64,
    #[default(false)]
    pub silent: bool,
    #[default(false)]
    pub match_from_tag: bool,
    #[default(30)]
    pub retry_pause_secs: u64,
    #[default("")]
    pub blocklist: &'static str,
}

impl Settings {
    pub fn identity(&self, client_ip: &str) -> Identity {
        Identity {
            user: self.sip_user.to_string(),
            password: self.sip_password.to_string(),
            device_label: self.device_label.to_string(),
            client_ip: client_ip.to_string(),
            server_ip: self.server_ip.to_string(),
            client_port: self.client_port,
            server_port: self.server_port,
        }
    }

    pub fn ua_config(&self) -> UaConfig {
        let match_policy = if self.match_from_tag {
            MatchPolicy::SequenceAndTag
        } else {
            MatchPolicy::Sequence
        };

        let config = UaConfig {
            expires: self.expires,
            lease_policy: LeasePolicy::Fraction(f64::from(self.lease_percent.min(100)) / 100.0),
            match_policy,
            silent: self.silent,
            ..UaConfig::default()
        };
        if self.lease_lead_secs > 0 {
            config.with_lead_time(Duration::from_secs(self.lease_lead_secs))
        } else {
            config
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_pause_secs)
    }

    pub fn blocklist(&self) -> Blocklist {
        Blocklist::parse(self.blocklist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            sip_user: "621",
            sip_password: "pw",
            device_label: "guard",
            server_ip: "10.0.0.1",
            server_port: 5060,
            client_port: 5070,
            expires: 600,
            lease_percent: 50,
            lease_lead_secs: 0,
            read_timeout_ms: 0,
            silent: true,
            match_from_tag: true,
            retry_pause_secs: 5,
            blocklist: "0900,0137",
        }
    }

    #[test]
    fn converts_into_core_config() {
        let s = settings();
        let identity = s.identity("10.0.0.9");
        assert_eq!(identity.user, "621");
        assert_eq!(identity.client_ip, "10.0.0.9");
        assert_eq!(identity.client_port, 5070);

        let config = s.ua_config();
        assert_eq!(config.expires, 600);
        assert_eq!(config.lease_policy, LeasePolicy::Fraction(0.5));
        assert_eq!(config.match_policy, MatchPolicy::SequenceAndTag);
        assert!(config.silent);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(s.read_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn lead_time_wins_over_percentage() {
        let s = Settings {
            lease_lead_secs: 60,
            ..settings()
        };
        assert_eq!(
            s.ua_config().lease_policy,
            LeasePolicy::LeadTime(Duration::from_secs(60))
        );
    }
}
