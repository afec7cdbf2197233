//! STOMP 1.2 framing as spoken by the backend broker over `/ws`.
//!
//! Frames travel as WebSocket text messages. A lone EOL is a heart-beat.

use std::time::Duration;

use crate::common::error::{ClientError, ClientResult};

pub const STOMP_VERSION: &str = "1.2";
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Publish destination for outgoing chat messages.
pub const SEND_MESSAGE_DESTINATION: &str = "/app/sendMessage";

pub fn chat_topic(group_id: &str) -> String {
    format!("/topic/group/{}", group_id)
}

pub fn poll_topic(group_id: &str) -> String {
    format!("/topic/group/{}/polls", group_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED frames carry headers unescaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected | Command::Stomp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins, as STOMP 1.2 requires for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, token: Option<&str>, heart_beat: (u32, u32)) -> Self {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        if let Some(token) = token {
            frame = frame.header("Authorization", format!("Bearer {}", token));
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, json_body: impl Into<String>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(json_body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. Returns `Ok(None)` for a heart-beat.
    pub fn decode(raw: &str) -> ClientResult<Option<Frame>> {
        let trimmed = raw.trim_start_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match trimmed.find("\n\n") {
            Some(i) => (&trimmed[..i], &trimmed[i + 2..]),
            None => match trimmed.find("\r\n\r\n") {
                Some(i) => (&trimmed[..i], &trimmed[i + 4..]),
                None => return Err(ClientError::Protocol("frame without header terminator".into())),
            },
        };

        let mut lines = head.lines();
        let command_line = lines.next().unwrap_or("").trim_end_matches('\r');
        let command = Command::parse(command_line)
            .ok_or_else(|| ClientError::Protocol(format!("unknown command '{}'", command_line)))?;

        let escape = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| ClientError::Protocol(format!("malformed header '{}'", line)))?;
            if escape {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let mut frame = Frame { command, headers, body: String::new() };
        let body = match frame.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
            Some(len) => rest
                .get(..len)
                .ok_or_else(|| ClientError::Protocol("body shorter than content-length".into()))?,
            None => rest.split('\0').next().unwrap_or(""),
        };
        frame.body = body.to_string();
        Ok(Some(frame))
    }
}

/// Heart-beat intervals agreed with the broker, as `(outgoing, incoming)`.
/// `client` is what we advertised in CONNECT, `server` the CONNECTED header.
pub fn negotiate_heartbeat(client: (u32, u32), server: Option<&str>) -> (Option<Duration>, Option<Duration>) {
    let (sx, sy) = server
        .and_then(|h| h.split_once(','))
        .and_then(|(a, b)| Some((a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?)))
        .unwrap_or((0, 0));
    let (cx, cy) = client;
    let outgoing = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy) as u64));
    let incoming = (cy != 0 && sx != 0).then(|| Duration::from_millis(cy.max(sx) as u64));
    (outgoing, incoming)
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> ClientResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ClientError::Protocol(format!("invalid header escape \\{}", other.map(String::from).unwrap_or_default())))
            }
        }
    }
    Ok(out)
}
