use core::fmt::Write;
use core::str::FromStr;

use heapless::Vec;

use crate::{Result, SipError};

pub const MAX_HEADERS: usize = 16;
pub const SIP_VERSION: &str = "SIP/2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SipError;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "REGISTER" => Ok(Method::Register),
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            _ => Err(SipError::Invalid("unknown method")),
        }
    }
}

/// One `Name: value` line of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: &'static str,
    pub value: String,
}

pub type HeaderList = Vec<Header, MAX_HEADERS>;

impl Header {
    /// Values may not contain line breaks; every header renders to exactly
    /// one line.
    pub fn new(name: &'static str, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.contains(['\r', '\n']) {
            return Err(SipError::Invalid("header value contains a line break"));
        }
        Ok(Header { name, value })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub reason: &'static str,
    pub headers: HeaderList,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderList::new(),
        }
    }

    pub fn add_header(&mut self, name: &'static str, value: impl Into<String>) -> Result<()> {
        push_header(&mut self.headers, name, value)
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        write!(out, "{} {} {}\r\n", self.method, self.uri, SIP_VERSION)
            .map_err(|_| SipError::Capacity)?;
        render_headers(&mut out, &self.headers)?;
        Ok(out)
    }
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            reason: reason_phrase(status_code),
            headers: HeaderList::new(),
        }
    }

    pub fn add_header(&mut self, name: &'static str, value: impl Into<String>) -> Result<()> {
        push_header(&mut self.headers, name, value)
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        write!(out, "{} {} {}\r\n", SIP_VERSION, self.status_code, self.reason)
            .map_err(|_| SipError::Capacity)?;
        render_headers(&mut out, &self.headers)?;
        Ok(out)
    }
}

fn push_header(headers: &mut HeaderList, name: &'static str, value: impl Into<String>) -> Result<()> {
    headers
        .push(Header::new(name, value)?)
        .map_err(|_| SipError::Capacity)
}

// Header lines, then the single blank line that ends the message. Bodies are
// never sent by this UA.
fn render_headers(out: &mut String, headers: &HeaderList) -> Result<()> {
    for header in headers {
        write!(out, "{}: {}\r\n", header.name, header.value).map_err(|_| SipError::Capacity)?;
    }
    out.push_str("\r\n");
    Ok(())
}

pub fn reason_phrase(status_code: u16) -> &'static str {
    match status_code {
        100 => "Trying",
        180 => "Ringing",
        200 => "OK",
        401 => "Unauthorized",
        407 => "Proxy Authentication Required",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        _ => "Unknown",
    }
}

pub fn header_value<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}
