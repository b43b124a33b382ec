//! Maps request lines and button presses onto relay transitions.
//!
//! The request target is matched by exact path: `/on` and `/off` are
//! commands, everything else (other paths, other methods, garbage) falls
//! through to the control page. A query string or fragment is ignored.

use crate::{
    error::SwitchError,
    page::render_control_page,
    store::NonVolatileStore,
    switch::{RelayOutput, RelaySwitch},
    types::{Command, RelayState, Transition},
};

pub const ON_PATH: &str = "/on";
pub const OFF_PATH: &str = "/off";

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_HTML: &str = "text/html";

/// Upper bound on buffered request bytes; anything past it is dropped.
pub const MAX_REQUEST_HEAD_BYTES: usize = 2048;
/// Time a client gets to send its request head before it is routed as-is.
pub const REQUEST_READ_TIMEOUT_MS: u64 = 3_000;

/// Whether `buf` holds a full request head, or enough to stop reading.
pub fn request_head_complete(buf: &[u8]) -> bool {
    buf.len() >= MAX_REQUEST_HEAD_BYTES || buf.windows(4).any(|window| window == b"\r\n\r\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: CONTENT_TYPE_TEXT,
            body: body.into(),
        }
    }

    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: CONTENT_TYPE_HTML,
            body,
        }
    }

    /// Sent when the relay moved but its state could not be persisted.
    pub fn persistence_failure() -> Self {
        Self {
            status: 500,
            content_type: CONTENT_TYPE_TEXT,
            body: "Relay state not saved".to_string(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            500 => "Internal Server Error",
            _ => "",
        }
    }

    pub fn to_http_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}; charset=utf-8\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

/// Extracts the command from the first line of `request_text`.
pub fn parse_command(request_text: &str) -> Command {
    let line = request_text.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Command::Query;
    };

    if !matches!(method, "GET" | "POST") {
        return Command::Query;
    }

    let path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    match path {
        ON_PATH => Command::TurnOn,
        OFF_PATH => Command::TurnOff,
        _ => Command::Query,
    }
}

pub fn route<S: NonVolatileStore, O: RelayOutput>(
    switch: &mut RelaySwitch<S, O>,
    request_text: &str,
) -> Result<(Command, Response), SwitchError> {
    let command = parse_command(request_text);

    let response = match command {
        Command::TurnOn => {
            switch.set_state(RelayState::On)?;
            Response::text("Relay turned on")
        }
        Command::TurnOff => {
            switch.set_state(RelayState::Off)?;
            Response::text("Relay turned off")
        }
        Command::Query => Response::html(render_control_page(switch.current_state())),
    };

    Ok((command, response))
}

/// Feeds a confirmed physical press into the same transition path.
pub fn press_button<S: NonVolatileStore, O: RelayOutput>(
    switch: &mut RelaySwitch<S, O>,
) -> Result<Transition, SwitchError> {
    switch.toggle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::OutputError, store::MemoryStore};
    use pretty_assertions::assert_eq;

    struct NullOutput;

    impl RelayOutput for NullOutput {
        fn drive(&mut self, _state: RelayState) -> Result<(), OutputError> {
            Ok(())
        }
    }

    fn switch(state: RelayState) -> RelaySwitch<MemoryStore, NullOutput> {
        let store = MemoryStore::from_bytes([state.to_byte(), 0]);
        RelaySwitch::new(store, NullOutput, state).unwrap()
    }

    #[test]
    fn parses_exact_paths() {
        assert_eq!(parse_command("GET /on HTTP/1.1"), Command::TurnOn);
        assert_eq!(parse_command("GET /off HTTP/1.1\r\nHost: x"), Command::TurnOff);
        assert_eq!(parse_command("POST /off HTTP/1.1"), Command::TurnOff);
        assert_eq!(parse_command("GET /on?x=1 HTTP/1.1"), Command::TurnOn);
        assert_eq!(parse_command("GET /off#now HTTP/1.1"), Command::TurnOff);
    }

    #[test]
    fn substrings_no_longer_match() {
        assert_eq!(parse_command("GET /offline HTTP/1.1"), Command::Query);
        assert_eq!(parse_command("GET /toggle/on HTTP/1.1"), Command::Query);
        assert_eq!(parse_command("GET /status?next=/off HTTP/1.1"), Command::Query);
    }

    #[test]
    fn odd_input_falls_through_to_query() {
        assert_eq!(parse_command(""), Command::Query);
        assert_eq!(parse_command("\r\n"), Command::Query);
        assert_eq!(parse_command("/on"), Command::Query);
        assert_eq!(parse_command("DELETE /on HTTP/1.1"), Command::Query);
        assert_eq!(parse_command("get /on HTTP/1.1"), Command::Query);
    }

    #[test]
    fn commands_answer_with_plain_text() {
        let mut switch = switch(RelayState::Off);

        let (command, response) = route(&mut switch, "GET /on HTTP/1.1").unwrap();
        assert_eq!(command, Command::TurnOn);
        assert_eq!(response, Response::text("Relay turned on"));
        assert_eq!(switch.current_state(), RelayState::On);

        let (_, response) = route(&mut switch, "GET /off HTTP/1.1").unwrap();
        assert_eq!(response.body, "Relay turned off");
        assert_eq!(switch.current_state(), RelayState::Off);
    }

    #[test]
    fn repeated_command_still_acknowledges() {
        let mut switch = switch(RelayState::On);
        let (_, response) = route(&mut switch, "GET /on HTTP/1.1").unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(switch.store().write_count(), 0);
    }

    #[test]
    fn unknown_request_renders_page_for_current_state() {
        let mut switch = switch(RelayState::On);
        let (command, response) = route(&mut switch, "GET /status HTTP/1.1").unwrap();

        assert_eq!(command, Command::Query);
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, CONTENT_TYPE_HTML);
        assert!(response.body.contains(" checked>"));
    }

    #[test]
    fn button_press_toggles() {
        let mut switch = switch(RelayState::On);
        assert_eq!(press_button(&mut switch).unwrap(), Transition::Applied);
        assert_eq!(switch.current_state(), RelayState::Off);
    }

    #[test]
    fn http_bytes_carry_length_and_close() {
        let raw = String::from_utf8(Response::text("Relay turned on").to_http_bytes()).unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(raw.contains("Content-Length: 15\r\n"));
        assert!(raw.contains("Connection: close\r\n"));
        assert!(raw.ends_with("\r\n\r\nRelay turned on"));
    }

    #[test]
    fn head_completes_on_blank_line_or_size_cap() {
        assert!(!request_head_complete(b"GET /on HTTP/1.1\r\nHost: a\r\n"));
        assert!(request_head_complete(b"GET /on HTTP/1.1\r\nHost: a\r\n\r\n"));
        assert!(request_head_complete(&[b'a'; MAX_REQUEST_HEAD_BYTES]));
    }

    #[test]
    fn persistence_failure_is_a_500() {
        let raw = String::from_utf8(Response::persistence_failure().to_http_bytes()).unwrap();
        assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }
}
