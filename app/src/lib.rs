use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::Instant;

use log::{info, warn};
use sip_core::{CallHandle, SipError, SipStack, Transport};
use thiserror::Error;

use crate::blocklist::Blocklist;
use crate::transport::{local_ip_toward, UdpTransport};

pub mod blocklist;
pub mod settings;
pub mod transport;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid server address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sip error: {0}")]
    Sip(#[from] SipError),
}

pub fn run() -> Result<(), AppError> {
    let settings = &settings::SETTINGS;
    info!("starting callguard for {}@{}", settings.sip_user, settings.server_ip);

    let server_ip: IpAddr = settings.server_ip.parse()?;
    let server = SocketAddr::new(server_ip, settings.server_port);
    let client_ip = local_ip_toward(server)?;
    let transport = UdpTransport::bind(settings.client_port, server, settings.read_timeout())?;

    let mut ua = SipStack::new(
        settings.identity(&client_ip.to_string()),
        settings.ua_config(),
        transport,
    );
    let blocklist = settings.blocklist();
    info!("blocking {} number prefix(es)", blocklist.len());

    loop {
        if let Err(err) = ua.refresh_registration(Instant::now()) {
            warn!("registration failed: {err}; retrying in {:?}", settings.retry_pause());
            thread::sleep(settings.retry_pause());
            // The route to the server may have changed meanwhile.
            match local_ip_toward(server) {
                Ok(ip) => ua.set_client_ip(&ip.to_string()),
                Err(e) => warn!("cannot resolve client address: {e}"),
            }
            continue;
        }

        if let Some(mut call) = ua.perceive_call() {
            screen_call(&mut ua, &mut call, &blocklist);
        }
    }
}

/// Pick up and hang up blocked callers. Everyone else keeps ringing.
pub fn screen_call<T: Transport>(ua: &mut SipStack<T>, call: &mut CallHandle, blocklist: &Blocklist) {
    if !blocklist.matches(call.number()) {
        info!("letting {} ring", call.number());
        return;
    }

    info!("blocking call from {}", call.number());
    if let Err(err) = ua.pick_up_call(call) {
        warn!("could not pick up {}: {err}", call.number());
        return;
    }
    if let Err(err) = ua.hang_up(call) {
        warn!("could not hang up on {}: {err}", call.number());
    }
}
