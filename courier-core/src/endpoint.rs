//! Logical addressing for envelopes.
//!
//! - [`Endpoint`]: application id + instance id + optional channel hint
//! - [`EndpointPattern`]: wildcard match over endpoints, used to restrict
//!   which routers may carry an envelope

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wildcard segment in an [`EndpointPattern`].
pub const WILDCARD: &str = "*";

/// A logical destination.
///
/// # Examples
///
/// ```
/// use courier_core::Endpoint;
///
/// let ep = Endpoint::new("shell", "root").with_channel("pipe");
/// assert_eq!(ep.to_string(), "shell/root#pipe");
/// assert_eq!("shell/root#pipe".parse::<Endpoint>().unwrap(), ep);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Application id.
    pub application: String,
    /// Running instance of the application.
    pub instance: String,
    /// Optional channel/transport hint.
    pub channel: Option<String>,
}

impl Endpoint {
    /// Create an endpoint without a channel hint.
    pub fn new(application: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            instance: instance.into(),
            channel: None,
        }
    }

    /// Return a copy of this endpoint with a channel hint.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether both endpoints name the same running instance.
    ///
    /// The channel hint is ignored: it selects a transport, not a process.
    pub fn same_instance(&self, other: &Endpoint) -> bool {
        self.application == other.application && self.instance == other.instance
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}/{}#{}", self.application, self.instance, channel),
            None => write!(f, "{}/{}", self.application, self.instance),
        }
    }
}

/// Error parsing an endpoint or pattern from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    /// No `/` separating application and instance.
    #[error("missing instance segment in {0:?}")]
    MissingInstance(String),

    /// A segment was empty.
    #[error("empty segment in {0:?}")]
    EmptySegment(String),
}

/// Split `app/instance[#channel]` into its three segments.
fn split_segments(s: &str) -> Result<(&str, &str, Option<&str>), EndpointParseError> {
    let (address, channel) = match s.split_once('#') {
        Some((address, channel)) => (address, Some(channel)),
        None => (s, None),
    };
    let (application, instance) = address
        .split_once('/')
        .ok_or_else(|| EndpointParseError::MissingInstance(s.to_string()))?;

    if application.is_empty() || instance.is_empty() || channel.is_some_and(str::is_empty) {
        return Err(EndpointParseError::EmptySegment(s.to_string()));
    }
    Ok((application, instance, channel))
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (application, instance, channel) = split_segments(s)?;
        Ok(Self {
            application: application.to_string(),
            instance: instance.to_string(),
            channel: channel.map(str::to_string),
        })
    }
}

/// Wildcard pattern over endpoints.
///
/// `None` segments match anything. A pattern without a channel segment
/// matches endpoints with or without a channel hint.
///
/// # Examples
///
/// ```
/// use courier_core::{Endpoint, EndpointPattern};
///
/// let pattern: EndpointPattern = "shell/*#pipe".parse().unwrap();
/// assert!(pattern.matches(&Endpoint::new("shell", "7").with_channel("pipe")));
/// assert!(!pattern.matches(&Endpoint::new("shell", "7")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPattern {
    /// Required application id, or any.
    pub application: Option<String>,
    /// Required instance id, or any.
    pub instance: Option<String>,
    /// Required channel hint, or any.
    pub channel: Option<String>,
}

impl EndpointPattern {
    /// Pattern matching every endpoint.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern matching every instance of one application.
    pub fn application(application: impl Into<String>) -> Self {
        Self {
            application: Some(application.into()),
            ..Self::default()
        }
    }

    /// Pattern matching endpoints carrying the given channel hint.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::default()
        }
    }

    /// Check whether an endpoint matches this pattern.
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        let segment = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);

        segment(&self.application, &endpoint.application)
            && segment(&self.instance, &endpoint.instance)
            && match &self.channel {
                None => true,
                Some(want) => endpoint.channel.as_deref() == Some(want.as_str()),
            }
    }
}

impl FromStr for EndpointPattern {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (application, instance, channel) = split_segments(s)?;
        let segment = |v: &str| (v != WILDCARD).then(|| v.to_string());
        Ok(Self {
            application: segment(application),
            instance: segment(instance),
            channel: channel.and_then(segment),
        })
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segment = |v: &Option<String>| v.clone().unwrap_or_else(|| WILDCARD.to_string());
        write!(f, "{}/{}", segment(&self.application), segment(&self.instance))?;
        if let Some(channel) = &self.channel {
            write!(f, "#{}", channel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_without_channel() {
        let ep: Endpoint = "shell/42".parse().expect("parse");
        assert_eq!(ep, Endpoint::new("shell", "42"));
        assert_eq!(ep.to_string(), "shell/42");
    }

    #[test]
    fn test_parse_endpoint_errors() {
        assert_eq!(
            "shell".parse::<Endpoint>(),
            Err(EndpointParseError::MissingInstance("shell".to_string()))
        );
        assert_eq!(
            "shell/".parse::<Endpoint>(),
            Err(EndpointParseError::EmptySegment("shell/".to_string()))
        );
        assert_eq!(
            "shell/1#".parse::<Endpoint>(),
            Err(EndpointParseError::EmptySegment("shell/1#".to_string()))
        );
    }

    #[test]
    fn test_same_instance_ignores_channel() {
        let a = Endpoint::new("shell", "1").with_channel("pipe");
        let b = Endpoint::new("shell", "1");
        let c = Endpoint::new("shell", "2");
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
    }

    #[test]
    fn test_pattern_wildcards() {
        let any = EndpointPattern::any();
        assert!(any.matches(&Endpoint::new("a", "b").with_channel("c")));

        let app: EndpointPattern = "shell/*".parse().expect("parse");
        assert_eq!(app, EndpointPattern::application("shell"));
        assert!(app.matches(&Endpoint::new("shell", "9")));
        assert!(!app.matches(&Endpoint::new("worker", "9")));

        let exact: EndpointPattern = "shell/root#pipe".parse().expect("parse");
        assert!(exact.matches(&Endpoint::new("shell", "root").with_channel("pipe")));
        assert!(!exact.matches(&Endpoint::new("shell", "root").with_channel("memory")));
    }

    #[test]
    fn test_pattern_display() {
        assert_eq!(EndpointPattern::any().to_string(), "*/*");
        assert_eq!(EndpointPattern::channel("pipe").to_string(), "*/*#pipe");
    }
}
