//! Protocol directives and request correlation keys.

use std::fmt::{Display, Formatter};

/// First field of a protocol line, identifying its meaning.
///
/// Keywords are given in decoded form; on the wire the leading `%` is itself
/// escaped, so `%>message` travels as `%%>message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// `%>connect`: declares the connection role. First line only.
    Connect,
    /// `%>output`: free text for the engine log.
    Output,
    /// `%>setlocal`: query or change an engine local parameter.
    SetLocal,
    /// `%<setlocal`: answer to [`Directive::SetLocal`].
    SetLocalReply,
    /// `%>message`: a message request, in either direction.
    Message,
    /// `%<message`: a message answer, acknowledgment, or watched notification.
    MessageReply,
    /// `%>install`: register as a handler for a message name.
    Install,
    /// `%<install`: answer to [`Directive::Install`].
    InstallReply,
    /// `%>uninstall`: remove a handler registration.
    Uninstall,
    /// `%<uninstall`: answer to [`Directive::Uninstall`].
    UninstallReply,
    /// `%>watch`: subscribe to processed messages of a name.
    Watch,
    /// `%<watch`: answer to [`Directive::Watch`].
    WatchReply,
    /// `%>unwatch`: cancel a watch subscription.
    Unwatch,
    /// `%<unwatch`: answer to [`Directive::Unwatch`].
    UnwatchReply,
    /// `Error in`: the engine could not parse a line it received.
    Error,
}

impl Directive {
    /// All directives, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Connect,
        Self::Output,
        Self::SetLocal,
        Self::SetLocalReply,
        Self::Message,
        Self::MessageReply,
        Self::Install,
        Self::InstallReply,
        Self::Uninstall,
        Self::UninstallReply,
        Self::Watch,
        Self::WatchReply,
        Self::Unwatch,
        Self::UnwatchReply,
        Self::Error,
    ];

    /// Decoded wire keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Connect => "%>connect",
            Self::Output => "%>output",
            Self::SetLocal => "%>setlocal",
            Self::SetLocalReply => "%<setlocal",
            Self::Message => "%>message",
            Self::MessageReply => "%<message",
            Self::Install => "%>install",
            Self::InstallReply => "%<install",
            Self::Uninstall => "%>uninstall",
            Self::UninstallReply => "%<uninstall",
            Self::Watch => "%>watch",
            Self::WatchReply => "%<watch",
            Self::Unwatch => "%>unwatch",
            Self::UnwatchReply => "%<unwatch",
            Self::Error => "Error in",
        }
    }

    /// Look up a directive by its decoded keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.keyword() == keyword)
    }
}

impl Display for Directive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Pairs a request with its response: the reply directive plus a qualifier.
///
/// The qualifier is the parameter or message name for `setlocal`, `install`,
/// `uninstall`, `watch` and `unwatch`, and the generated message id for
/// `message`. At most one request per key may be outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// Directive the response arrives with.
    pub directive: Directive,
    /// Decoded qualifier field.
    pub qualifier: String,
}

impl CorrelationKey {
    /// Build a key from a reply directive and qualifier.
    #[must_use]
    pub fn new(directive: Directive, qualifier: impl Into<String>) -> Self {
        Self {
            directive,
            qualifier: qualifier.into(),
        }
    }
}

impl Display for CorrelationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.directive, self.qualifier)
    }
}
