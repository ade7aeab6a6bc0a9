use core::fmt::Write;

use md5::{Digest, Md5};

use crate::{Result, SipError};

/// Nonce count; every nonce is used exactly once by this UA.
const NONCE_COUNT: &str = "00000001";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    /// Came from `Proxy-Authenticate` (407) rather than `WWW-Authenticate`.
    pub proxy: bool,
}

impl DigestChallenge {
    /// Header that answers this challenge.
    pub fn answer_header(&self) -> &'static str {
        if self.proxy {
            "Proxy-Authorization"
        } else {
            "Authorization"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    None,
    Auth,
    AuthInt,
}

impl Qop {
    fn select(offered: Option<&str>) -> Self {
        let Some(offered) = offered else {
            return Qop::None;
        };
        let mut tokens = offered.split(',').map(str::trim);
        if tokens.clone().any(|t| t.eq_ignore_ascii_case("auth")) {
            Qop::Auth
        } else if tokens.any(|t| t.eq_ignore_ascii_case("auth-int")) {
            Qop::AuthInt
        } else {
            Qop::None
        }
    }
}

/// State carried between a challenge and the requests answering it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub challenge: Option<DigestChallenge>,
    pub response: Option<String>,
}

impl Credentials {
    pub fn clear(&mut self) {
        self.challenge = None;
        self.response = None;
    }

    pub fn update(&mut self, challenge: DigestChallenge) {
        self.challenge = Some(challenge);
        self.response = None;
    }

    /// Header name and value answering the stored challenge for `method`,
    /// or `None` while no challenge has been seen.
    pub fn authorization(
        &mut self,
        creds: &DigestCredentials<'_>,
        method: &str,
        uri: &str,
        body: &str,
    ) -> Result<Option<(&'static str, String)>> {
        let Some(challenge) = &self.challenge else {
            return Ok(None);
        };
        let cnonce = new_cnonce();
        let response = compute_digest_response(challenge, creds, method, uri, body, &cnonce)?;
        let value = authorization_value(challenge, creds, uri, &response, &cnonce)?;
        let name = challenge.answer_header();
        self.response = Some(response);
        Ok(Some((name, value)))
    }
}

pub fn parse_challenge(input: &str) -> Result<DigestChallenge> {
    let mut parts = input.trim().splitn(2, ' ');
    let scheme = parts.next().ok_or(SipError::Invalid("auth scheme"))?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(SipError::Invalid("auth scheme"));
    }
    let params = parts.next().ok_or(SipError::Invalid("auth params"))?;

    let mut realm = None;
    let mut nonce = None;
    let mut qop = None;

    for param in split_params(params) {
        let Some((key, raw_val)) = param.split_once('=') else {
            continue;
        };
        let value = raw_val.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "qop" => qop = Some(value),
            _ => {}
        }
    }

    Ok(DigestChallenge {
        realm: realm.ok_or(SipError::Invalid("realm"))?,
        nonce: nonce.ok_or(SipError::Invalid("nonce"))?,
        qop,
        proxy: false,
    })
}

// Comma separated, but commas inside quotes (qop="auth,auth-int") belong to
// the value.
fn split_params(params: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (idx, ch) in params.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                out.push(params[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push(params[start..].trim());
    out.retain(|p| !p.is_empty());
    out
}

pub fn authorization_value(
    challenge: &DigestChallenge,
    creds: &DigestCredentials<'_>,
    uri: &str,
    response: &str,
    cnonce: &str,
) -> Result<String> {
    let mut value = String::new();
    write!(
        value,
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm=MD5",
        creds.username, challenge.realm, challenge.nonce, uri, response
    )
    .map_err(|_| SipError::Capacity)?;

    if Qop::select(challenge.qop.as_deref()) != Qop::None {
        write!(value, ", qop=auth, nc={}, cnonce=\"{}\"", NONCE_COUNT, cnonce)
            .map_err(|_| SipError::Capacity)?;
    }
    Ok(value)
}

/// RFC 2617 response hash.
///
/// `auth-int` hashes the request body into A2. A plain `auth` qop uses the
/// RFC 2617 qop form too, not the no-qop formula. Both qop forms put the
/// literal `auth` token into the final hash.
pub fn compute_digest_response(
    challenge: &DigestChallenge,
    creds: &DigestCredentials<'_>,
    method: &str,
    uri: &str,
    body: &str,
    cnonce: &str,
) -> Result<String> {
    let mut a1 = String::new();
    write!(a1, "{}:{}:{}", creds.username, challenge.realm, creds.password)
        .map_err(|_| SipError::Capacity)?;

    let qop = Qop::select(challenge.qop.as_deref());
    let mut a2 = String::new();
    match qop {
        Qop::AuthInt => write!(a2, "{}:{}:{}", method, uri, body),
        Qop::None | Qop::Auth => write!(a2, "{}:{}", method, uri),
    }
    .map_err(|_| SipError::Capacity)?;

    let ha1 = md5_hex(a1.as_bytes());
    let ha2 = md5_hex(a2.as_bytes());

    let mut combo = String::new();
    match qop {
        Qop::None => write!(combo, "{}:{}:{}", ha1, challenge.nonce, ha2),
        Qop::Auth | Qop::AuthInt => write!(
            combo,
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, NONCE_COUNT, cnonce, ha2
        ),
    }
    .map_err(|_| SipError::Capacity)?;

    Ok(md5_hex(combo.as_bytes()))
}

fn new_cnonce() -> String {
    let bytes: [u8; 8] = rand::random();
    let mut out = String::new();
    for b in &bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

pub(crate) fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    let mut out = String::new();
    for b in &digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
