//! Typed views of protocol lines.
//!
//! [`WireLine`] is the raw form: a line split on every literal `:`. Because
//! the escaping never leaves a raw `:` inside a field, the split is exact and
//! each field is decoded on demand. The remaining types are the parsed
//! values handed to callers and subscribers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::wire::directive::Directive;
use crate::wire::escape::{decode, decode_parameter, encode, encode_parameter};
use crate::{ClientError, Result};

/// Boolean field value used by the engine.
pub const TRUE: &str = "true";
/// Boolean field value used by the engine.
pub const FALSE: &str = "false";

/// Parse an engine boolean: case-insensitive `"true"`, anything else is false.
#[must_use]
pub fn is_true(text: &str) -> bool {
    text.eq_ignore_ascii_case(TRUE)
}

const fn bool_field(value: bool) -> &'static str {
    if value {
        TRUE
    } else {
        FALSE
    }
}

/// Encode each field and join them with `:`.
#[must_use]
pub fn encode_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields.into_iter().map(encode).collect::<Vec<_>>().join(":")
}

/// Append encoded `key=value` parameters to an encoded line.
fn append_parameters<'a>(
    line: &mut String,
    parameters: impl IntoIterator<Item = &'a (String, String)>,
) {
    for (key, value) in parameters {
        line.push(':');
        line.push_str(&encode_parameter(key, value));
    }
}

// ── Raw line ──────────────────────────────────────────────────────────────────

/// A protocol line split into its still-encoded fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireLine {
    fields: Vec<String>,
}

impl WireLine {
    /// Split `line` on every literal `:`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        Self {
            fields: line.split(':').map(str::to_owned).collect(),
        }
    }

    /// Number of fields, directive included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the line has no fields (never true for a parsed line).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encoded field at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when the line has fewer fields.
    pub fn raw(&self, index: usize) -> Result<&str> {
        self.fields.get(index).map(String::as_str).ok_or_else(|| {
            ClientError::Decode(format!("missing field {index} in '{}'", self.fields.join(":")))
        })
    }

    /// Decoded field at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when the field is missing or malformed.
    pub fn decoded(&self, index: usize) -> Result<String> {
        decode(self.raw(index)?)
    }

    /// Decoded field at `index`, or an empty string when the line is shorter.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when the field is present but malformed.
    pub fn decoded_or_empty(&self, index: usize) -> Result<String> {
        self.fields.get(index).map_or_else(|| Ok(String::new()), |f| decode(f))
    }

    /// Encoded fields from `index` onwards.
    #[must_use]
    pub fn tail(&self, index: usize) -> &[String] {
        self.fields.get(index..).unwrap_or_default()
    }

    /// Decoded `key=value` parameters from `index` onwards, in wire order.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a parameter is malformed.
    pub fn parameters(&self, index: usize) -> Result<Vec<(String, String)>> {
        self.tail(index).iter().map(|p| decode_parameter(p)).collect()
    }

    /// The directive of this line, or `None` for an unknown keyword.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when the first field is malformed.
    pub fn directive(&self) -> Result<Option<Directive>> {
        Ok(Directive::from_keyword(&self.decoded(0)?))
    }
}

// ── Connection role ───────────────────────────────────────────────────────────

/// Role announced by the connect line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Engine-wide message processing.
    #[default]
    Global,
    /// Control of a single channel.
    Channel,
    /// Audio playback into a channel.
    Play,
    /// Audio recording from a channel.
    Record,
    /// Playback and recording.
    PlayRec,
}

impl Role {
    /// Keyword sent on the connect line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Channel => "channel",
            Self::Play => "play",
            Self::Record => "record",
            Self::PlayRec => "playrec",
        }
    }
}

// ── Outbound requests ─────────────────────────────────────────────────────────

/// Parameters of an `install` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Handler priority; the engine default applies when `None`.
    pub priority: Option<i32>,
    /// Message name to handle.
    pub name: String,
    /// Message parameter the engine filters on.
    pub filter_name: Option<String>,
    /// Value the filtered parameter must match.
    pub filter_value: Option<String>,
}

impl InstallRequest {
    /// Install for `name` with default priority and no filter.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            priority: None,
            name: name.into(),
            filter_name: None,
            filter_value: None,
        }
    }

    /// Set the handler priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Filter on message parameter `name`.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>) -> Self {
        self.filter_name = Some(name.into());
        self
    }

    /// Restrict handling to messages where parameter `name` equals `value`.
    #[must_use]
    pub fn filter_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_name = Some(name.into());
        self.filter_value = Some(value.into());
        self
    }
}

/// Builders for every line this client sends.
pub mod lines {
    use super::{append_parameters, bool_field, encode_fields, InstallRequest, MessageEvent, Role};
    use crate::wire::directive::Directive;

    /// `%>connect:<role>[:<channel id>[:<channel type>]]`.
    #[must_use]
    pub fn connect(role: Role, channel_id: Option<&str>, channel_type: Option<&str>) -> String {
        let mut fields = vec![Directive::Connect.keyword(), role.as_str()];
        if let Some(id) = channel_id {
            fields.push(id);
            if let Some(kind) = channel_type {
                fields.push(kind);
            }
        }
        encode_fields(fields)
    }

    /// `%>output:<text>`; the text is sent unescaped.
    ///
    /// The text must not contain line breaks; see [`output_lines`].
    #[must_use]
    pub fn output(text: &str) -> String {
        format!("{}:{text}", encode_fields([Directive::Output.keyword()]))
    }

    /// One `%>output` line per line of `text`.
    #[must_use]
    pub fn output_lines(text: &str) -> Vec<String> {
        if text.is_empty() {
            return vec![output("")];
        }
        text.lines().map(output).collect()
    }

    /// `%>setlocal:<name>:<value>`.
    #[must_use]
    pub fn set_local(name: &str, value: &str) -> String {
        encode_fields([Directive::SetLocal.keyword(), name, value])
    }

    /// `%>message:<id>:<time>:<name>:<result>[:<key>=<value>...]`.
    #[must_use]
    pub fn message(
        id: &str,
        time: i64,
        name: &str,
        result: &str,
        parameters: &[(String, String)],
    ) -> String {
        let time = time.to_string();
        let mut line =
            encode_fields([Directive::Message.keyword(), id, time.as_str(), name, result]);
        append_parameters(&mut line, parameters);
        line
    }

    /// `%<message:<id>:<handled>:<name>:<result>[:<key>=<value>...]`, the
    /// acknowledgment of an engine-initiated message.
    ///
    /// Only the parameters added by subscribers are sent back.
    #[must_use]
    pub fn acknowledge(event: &MessageEvent) -> String {
        let mut line = encode_fields([
            Directive::MessageReply.keyword(),
            event.id.as_str(),
            bool_field(event.handled),
            event.name.as_str(),
            event.result.as_str(),
        ]);
        append_parameters(&mut line, &event.new_parameters);
        line
    }

    /// `%<message:<id>:false::`, declining a message that could not be read.
    #[must_use]
    pub fn decline(id: &str) -> String {
        encode_fields([Directive::MessageReply.keyword(), id, bool_field(false), "", ""])
    }

    /// `%>install:[<priority>]:<name>[:<filter name>[:<filter value>]]`.
    #[must_use]
    pub fn install(request: &InstallRequest) -> String {
        let priority = request.priority.map(|p| p.to_string()).unwrap_or_default();
        let mut fields = vec![
            Directive::Install.keyword(),
            priority.as_str(),
            request.name.as_str(),
        ];
        if let Some(filter) = request.filter_name.as_deref() {
            fields.push(filter);
            if let Some(value) = request.filter_value.as_deref() {
                fields.push(value);
            }
        }
        encode_fields(fields)
    }

    /// `%>uninstall:<name>`.
    #[must_use]
    pub fn uninstall(name: &str) -> String {
        encode_fields([Directive::Uninstall.keyword(), name])
    }

    /// `%>watch:<name>`.
    #[must_use]
    pub fn watch(name: &str) -> String {
        encode_fields([Directive::Watch.keyword(), name])
    }

    /// `%>unwatch:<name>`.
    #[must_use]
    pub fn unwatch(name: &str) -> String {
        encode_fields([Directive::Unwatch.keyword(), name])
    }
}

// ── Parsed results ────────────────────────────────────────────────────────────

/// Answer to `install` or `uninstall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallResult {
    /// Priority reported by the engine; `-1` when it is not an integer.
    pub priority: i32,
    /// Whether the engine accepted the request.
    pub success: bool,
}

impl InstallResult {
    /// Parse `%<install:<priority>:<name>:<success>` or the `uninstall` equivalent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a field is missing or malformed.
    pub fn from_line(line: &WireLine) -> Result<Self> {
        Ok(Self::parse(&line.decoded(1)?, &line.decoded(3)?))
    }

    /// Build from decoded priority and success fields.
    #[must_use]
    pub fn parse(priority: &str, success: &str) -> Self {
        Self {
            priority: priority.trim().parse().unwrap_or(-1),
            success: is_true(success),
        }
    }
}

/// Answer to `setlocal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSetting {
    /// Current value of the parameter after the request.
    pub value: String,
    /// Whether the engine accepted the request.
    pub success: bool,
}

impl LocalSetting {
    /// Parse `%<setlocal:<name>:<value>:<success>`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a field is missing or malformed.
    pub fn from_line(line: &WireLine) -> Result<Self> {
        Ok(Self {
            value: line.decoded(2)?,
            success: is_true(&line.decoded_or_empty(3)?),
        })
    }
}

/// Answer to a message request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    /// Id the request was sent with.
    pub id: String,
    /// Whether a handler declared the message processed.
    pub handled: bool,
    /// Message name, possibly changed by handlers.
    pub name: String,
    /// Textual return value.
    pub result: String,
    /// Parameters after processing, in wire order.
    pub parameters: Vec<(String, String)>,
}

impl MessageResponse {
    /// Parse `%<message:<id>:<handled>:<name>:<result>[:<key>=<value>...]`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a field is missing or malformed.
    pub fn from_line(line: &WireLine) -> Result<Self> {
        Ok(Self {
            id: line.decoded(1)?,
            handled: is_true(&line.decoded(2)?),
            name: line.decoded(3)?,
            result: line.decoded_or_empty(4)?,
            parameters: line.parameters(5)?,
        })
    }

    /// First value of parameter `key`.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A message request whose answer is parsed into a dedicated type.
///
/// Implementations describe what to send and how to read the answer;
/// [`Client::send_typed`](crate::client::Client::send_typed) does the rest.
pub trait TypedMessage {
    /// Parsed answer.
    type Output;

    /// Message name.
    fn name(&self) -> &str;

    /// Default textual return value.
    fn result(&self) -> &str {
        ""
    }

    /// Message parameters.
    fn parameters(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Turn the engine's answer into [`Self::Output`].
    ///
    /// # Errors
    ///
    /// Implementations return [`ClientError::Decode`] for answers they cannot interpret.
    fn parse_response(&self, response: MessageResponse) -> Result<Self::Output>;
}

// ── Notifications ─────────────────────────────────────────────────────────────

/// A message delivered to subscribers.
///
/// Built for every engine-initiated `%>message` and for every `%<message`
/// that no pending request claims (watched messages). For engine-initiated
/// messages, subscribers may change [`handled`](Self::handled),
/// [`name`](Self::name), [`result`](Self::result) and append to
/// [`new_parameters`](Self::new_parameters); the acknowledgment carries the
/// final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Engine-assigned message id.
    pub id: String,
    /// Whether the message is declared processed.
    pub handled: bool,
    /// Message name.
    pub name: String,
    /// Textual return value.
    pub result: String,
    /// Creation time, present for engine-initiated messages.
    pub time: Option<DateTime<Utc>>,
    /// Message parameters as received.
    pub parameters: HashMap<String, String>,
    /// Parameters to add or change in the acknowledgment.
    pub new_parameters: Vec<(String, String)>,
}

impl MessageEvent {
    /// Parse an engine-initiated `%>message:<id>:<time>:<name>:<result>[:<key>=<value>...]`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a field is missing or malformed.
    pub fn from_dispatch(line: &WireLine) -> Result<Self> {
        let time = line
            .decoded(2)?
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        Self::build(line, false, time)
    }

    /// Parse an unclaimed `%<message:<id>:<handled>:<name>:<result>[:<key>=<value>...]`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] when a field is missing or malformed.
    pub fn from_notification(line: &WireLine) -> Result<Self> {
        let handled = is_true(&line.decoded(2)?);
        Self::build(line, handled, None)
    }

    fn build(line: &WireLine, handled: bool, time: Option<DateTime<Utc>>) -> Result<Self> {
        Ok(Self {
            id: line.decoded(1)?,
            handled,
            name: line.decoded(3)?,
            result: line.decoded_or_empty(4)?,
            time,
            parameters: line.parameters(5)?.into_iter().collect(),
            new_parameters: Vec::new(),
        })
    }

    /// Value of parameter `key`.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Value of parameter `key`, or `fallback` when absent.
    #[must_use]
    pub fn parameter_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(fallback)
    }

    /// Queue a parameter for the acknowledgment.
    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.new_parameters.push((key.into(), value.into()));
    }

    /// Declare the message processed (or not).
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }
}
