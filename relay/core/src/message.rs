//! Routable Messages
//!
//! The hub is generic over any payload implementing [`Routable`]. A payload
//! declares where it wants to go ([`Destination`]), how to rewrite itself when
//! nobody is listening there ([`Routable::fallback`]), and how to express a
//! diagnostic about a payload the hub could not classify
//! ([`Routable::diagnostic`]).
//!
//! [`Message`] is the closed vocabulary shared by the bundled collaborators.

use std::fmt;

use crate::endpoint::EndpointId;

/// Where a message wants to be delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// A specific endpoint, matched against the hub's entry points
    Endpoint(EndpointId),
    /// No particular endpoint; always handled by the fallback
    Unaddressed,
    /// The payload could not be classified; the reason becomes a diagnostic
    Unrecognized(String),
}

/// A payload the hub knows how to dispatch
pub trait Routable: Send + Sized + 'static {
    /// Destination of this message
    fn destination(&self) -> Destination;

    /// Replacement delivered to the fallback when no entry point matches
    #[must_use]
    fn fallback(self) -> Self {
        self
    }

    /// Message describing a payload that could not be classified
    fn diagnostic(reason: String) -> Self;
}

/// Messages exchanged between the relay collaborators
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A line of text for a display endpoint
    Text {
        /// Endpoint that should render the line
        to: EndpointId,
        /// The line itself
        line: String,
    },

    /// Increment a named counter
    Count {
        /// Endpoint that owns the counter
        to: EndpointId,
        /// Counter key
        key: String,
        /// Amount to add (may be negative)
        delta: i64,
    },

    /// An error meant for whoever reports failures
    Fatal {
        /// Human-readable description
        text: String,
    },

    /// A value from outside the vocabulary above, kept only for diagnostics
    Foreign {
        /// Rust type name of the original value
        type_name: String,
        /// Debug rendering of the original value
        repr: String,
    },
}

impl Message {
    /// Create a text message
    pub fn text(to: EndpointId, line: impl Into<String>) -> Self {
        Self::Text {
            to,
            line: line.into(),
        }
    }

    /// Create a counter increment
    pub fn count(to: EndpointId, key: impl Into<String>, delta: i64) -> Self {
        Self::Count {
            to,
            key: key.into(),
            delta,
        }
    }

    /// Create an error report
    pub fn fatal(text: impl Into<String>) -> Self {
        Self::Fatal { text: text.into() }
    }

    /// Wrap an arbitrary value the vocabulary cannot express
    pub fn foreign<V: fmt::Debug + ?Sized>(value: &V) -> Self {
        Self::Foreign {
            type_name: std::any::type_name::<V>().to_string(),
            repr: format!("{value:?}"),
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Count { .. } => "count",
            Self::Fatal { .. } => "fatal",
            Self::Foreign { .. } => "foreign",
        }
    }
}

impl Routable for Message {
    fn destination(&self) -> Destination {
        match self {
            Self::Text { to, .. } | Self::Count { to, .. } => Destination::Endpoint(*to),
            Self::Fatal { .. } => Destination::Unaddressed,
            Self::Foreign { type_name, repr } => {
                Destination::Unrecognized(format!("unrecognized message of type {type_name}: {repr}"))
            }
        }
    }

    fn fallback(self) -> Self {
        match self {
            Self::Text { to, line } => Self::Fatal {
                text: format!("no entry point for {to}: {line}"),
            },
            Self::Count { to, key, delta } => Self::Fatal {
                text: format!("no entry point for {to}: count {key:?} by {delta:+}"),
            },
            Self::Foreign { type_name, repr } => Self::Fatal {
                text: format!("unrecognized message of type {type_name}: {repr}"),
            },
            fatal @ Self::Fatal { .. } => fatal,
        }
    }

    fn diagnostic(reason: String) -> Self {
        Self::Fatal { text: reason }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { to, line } => write!(f, "{to} <- {line}"),
            Self::Count { to, key, delta } => write!(f, "{to} <- {key} {delta:+}"),
            Self::Fatal { text } => write!(f, "fatal: {text}"),
            Self::Foreign { type_name, .. } => write!(f, "foreign value of type {type_name}"),
        }
    }
}
