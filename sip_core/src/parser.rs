use crate::{auth::DigestChallenge, message::Method, Result, SipError};

/// One entry of a Contact header. A registrar's 200 lists every binding of
/// the address of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactBinding {
    pub uri: String,
    pub expires: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StartLine {
    /// Nothing was received, or only whitespace.
    #[default]
    Empty,
    Status { code: u16, reason: String },
    /// `method` is `None` when the token is not one of the accepted methods.
    Request { method: Option<Method>, uri: String },
}

/// Everything this UA reads out of one inbound datagram.
///
/// A fresh value is produced for every parse, so fields from an earlier
/// message can never leak into a later one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub start: StartLine,
    /// Header lines in arrival order, up to and including Content-Length.
    pub headers: Vec<(String, String)>,
    pub call_id: Option<String>,
    pub cseq: Option<u32>,
    pub cseq_method: Option<Method>,
    pub content_length: Option<usize>,
    pub body: Option<String>,
    pub rport: Option<u16>,
    pub bindings: Vec<ContactBinding>,
    /// URI of the first Contact binding.
    pub contact_uri: Option<String>,
    pub expires: Option<u32>,
    pub from_tag: Option<String>,
    pub from_name: Option<String>,
    pub from_number: Option<String>,
    pub to_tag: Option<String>,
    pub challenge: Option<DigestChallenge>,
}

impl ReceivedMessage {
    pub fn is_empty(&self) -> bool {
        self.start == StartLine::Empty
    }

    pub fn status(&self) -> Option<u16> {
        match self.start {
            StartLine::Status { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<Method> {
        match self.start {
            StartLine::Request { method, .. } => method,
            _ => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Lifetime granted to the binding for `contact`, else the first
    /// binding's, else the Expires header.
    pub fn expires_for(&self, contact: &str) -> Option<u32> {
        self.bindings
            .iter()
            .find(|b| same_contact(&b.uri, contact))
            .and_then(|b| b.expires)
            .or(self.expires)
    }

    /// Required header lookup for code paths that echo or reuse the value.
    pub fn require(&self, name: &'static str) -> Result<&str> {
        self.header(name).ok_or(SipError::Invalid(name))
    }
}

/// Parses one datagram. Request methods outside `accepted` yield a request
/// start line without a method.
///
/// Empty input is not an error and gives an empty record. A header line
/// without the `": "` separator fails the whole message.
pub fn parse_message(raw: &str, accepted: &[Method]) -> Result<ReceivedMessage> {
    let text = raw.trim_start_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Ok(ReceivedMessage::default());
    }

    let mut lines = text.lines();
    let first = lines.next().ok_or(SipError::Invalid("empty message"))?;

    let mut msg = ReceivedMessage {
        start: parse_start_line(first, accepted)?,
        ..ReceivedMessage::default()
    };

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(": ")
            .ok_or(SipError::Invalid("header line without separator"))?;
        let name = expand_compact(name.trim());
        let value = value.trim();
        let is_length = name.eq_ignore_ascii_case("Content-Length");
        msg.headers.push((name.to_string(), value.to_string()));
        if is_length {
            msg.content_length = Some(
                value
                    .parse()
                    .map_err(|_| SipError::Invalid("Content-Length"))?,
            );
            break;
        }
    }

    if let Some(len) = msg.content_length.filter(|len| *len >= 1) {
        msg.body = raw
            .len()
            .checked_sub(len)
            .and_then(|start| raw.get(start..))
            .map(str::to_string);
    }

    derive_fields(&mut msg)?;
    Ok(msg)
}

fn parse_start_line(line: &str, accepted: &[Method]) -> Result<StartLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if tokens.first().is_some_and(|t| t.starts_with("SIP/")) {
        let code = tokens
            .get(1)
            .and_then(|t| t.parse::<u16>().ok())
            .ok_or(SipError::Invalid("status line"))?;
        return Ok(StartLine::Status {
            code,
            reason: tokens.get(2..).unwrap_or_default().join(" "),
        });
    }

    // The method normally leads the line, but tolerate one stray token in
    // front of it.
    let found = tokens.iter().take(2).enumerate().find_map(|(idx, token)| {
        token
            .parse::<Method>()
            .ok()
            .filter(|m| accepted.contains(m))
            .map(|m| (idx, m))
    });

    let (method, uri_idx) = match found {
        Some((idx, m)) => (Some(m), idx + 1),
        None => (None, 1),
    };

    Ok(StartLine::Request {
        method,
        uri: tokens.get(uri_idx).copied().unwrap_or_default().to_string(),
    })
}

fn expand_compact(name: &str) -> &str {
    match name {
        "v" => "Via",
        "f" => "From",
        "t" => "To",
        "i" => "Call-ID",
        "m" => "Contact",
        "l" => "Content-Length",
        other => other,
    }
}

fn derive_fields(msg: &mut ReceivedMessage) -> Result<()> {
    msg.call_id = msg.header("Call-ID").map(str::to_string);

    if let Some(cseq) = msg.header("CSeq") {
        let mut parts = cseq.split_whitespace();
        let number = parts
            .next()
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or(SipError::Invalid("CSeq"))?;
        let method = parts.next().and_then(|m| m.parse::<Method>().ok());
        msg.cseq = Some(number);
        msg.cseq_method = method;
    }

    msg.rport = msg
        .header("Via")
        .and_then(|via| param(via, "rport"))
        .and_then(|v| v.parse().ok());

    let bindings: Vec<ContactBinding> = msg
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("Contact"))
        .flat_map(|(_, value)| split_top_level(value))
        .filter_map(|entry| {
            Some(ContactBinding {
                uri: uri_of(entry)?.to_string(),
                expires: param(after_uri(entry), "expires").and_then(|v| v.parse().ok()),
            })
        })
        .collect();
    if let Some(first) = bindings.first() {
        msg.contact_uri = Some(first.uri.clone())
            .filter(|uri| uri.starts_with("sip:") || uri.starts_with("sips:"));
        msg.expires = first.expires;
    }
    msg.bindings = bindings;
    if msg.expires.is_none() {
        msg.expires = msg.header("Expires").and_then(|v| v.parse().ok());
    }

    if let Some(from) = msg.header("From") {
        let tag = param(after_uri(from), "tag").map(str::to_string);
        let name = display_name(from).map(str::to_string);
        let number = uri_of(from).and_then(user_part).map(str::to_string);
        msg.from_tag = tag;
        msg.from_name = name;
        msg.from_number = number;
    }

    msg.to_tag = msg
        .header("To")
        .and_then(|to| param(after_uri(to), "tag"))
        .map(str::to_string);

    msg.challenge = match msg.header("WWW-Authenticate") {
        Some(value) => crate::auth::parse_challenge(value).ok(),
        None => msg
            .header("Proxy-Authenticate")
            .and_then(|value| crate::auth::parse_challenge(value).ok())
            .map(|challenge| DigestChallenge {
                proxy: true,
                ..challenge
            }),
    };

    Ok(())
}

// Comma separated entries, ignoring commas inside `<...>` and quotes.
fn split_top_level(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_angle = false;
    let mut quoted = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => in_angle = true,
            '>' if !quoted => in_angle = false,
            ',' if !quoted && !in_angle => {
                out.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out.retain(|entry| !entry.is_empty());
    out
}

fn same_contact(a: &str, b: &str) -> bool {
    let base = |uri: &str| uri.split(';').next().unwrap_or_default().trim().to_string();
    base(a).eq_ignore_ascii_case(&base(b))
}

/// `<sip:...>` if bracketed, otherwise everything up to the first `;`.
fn uri_of(value: &str) -> Option<&str> {
    match (value.find('<'), value.find('>')) {
        (Some(start), Some(end)) if start < end => Some(value[start + 1..end].trim()),
        _ => value.split(';').next().map(str::trim).filter(|s| !s.is_empty()),
    }
}

/// The parameter section of an address header.
fn after_uri(value: &str) -> &str {
    match value.find('>') {
        Some(end) => &value[end + 1..],
        None => value.find(';').map(|idx| &value[idx..]).unwrap_or(""),
    }
}

fn param<'a>(value: &'a str, key: &str) -> Option<&'a str> {
    value.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case(key)
            .then(|| v.trim().trim_matches('"'))
    })
}

fn display_name(value: &str) -> Option<&str> {
    let head = &value[..value.find('<')?];
    let name = head.trim().trim_matches('"').trim();
    (!name.is_empty()).then_some(name)
}

fn user_part(uri: &str) -> Option<&str> {
    let rest = uri
        .strip_prefix("sip:")
        .or_else(|| uri.strip_prefix("sips:"))
        .or_else(|| uri.strip_prefix("tel:"))?;
    let user = rest.split(['@', ';']).next()?;
    (!user.is_empty()).then_some(user)
}
