//! Message model for the instance rendezvous channel.
//!
//! Every frame after the identity handshake carries one `Message`. The
//! coordinator decodes and reacts to the four control methods; any other
//! method is routed by destination without interpretation, so applications
//! can define their own vocabulary on top.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sender identity used for all control traffic the coordinator originates.
pub const SERVER_ID: &str = "huddle-server";

/// Where a message should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// The coordinating instance only.
    Server,
    /// Every other connected peer. Never echoed back to the sender.
    Broadcast,
    /// Only the transport this frame travels on. Never relayed.
    Direct,
}

/// Message method.
///
/// The four named variants are the control vocabulary of the directory
/// protocol. `Other` carries application-defined method names opaquely;
/// reserved names are normalized to their variant on decode, so round-trips
/// are exact for any message built through [`Method::from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Identity announcement from a freshly connected peer.
    Init,
    /// Identity query, and its answer. Both directions use the same method;
    /// receivers treat any `WhoIs` as an announcement.
    WhoIs,
    /// Liveness plus identity re-announcement.
    Ping,
    /// Directory snapshot, coordinator → peers only.
    MetaInfo,
    /// Application-defined method, relayed without interpretation.
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Init => "init",
            Method::WhoIs => "whois",
            Method::Ping => "ping",
            Method::MetaInfo => "metainfo",
            Method::Other(name) => name,
        }
    }

    /// Is this one of the four methods the coordinator itself understands?
    pub fn is_control(&self) -> bool {
        !matches!(self, Method::Other(_))
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "init" => Method::Init,
            "whois" => Method::WhoIs,
            "ping" => Method::Ping,
            "metainfo" => Method::MetaInfo,
            other => Method::Other(other.to_string()),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Method::from(name.as_str()))
    }
}

/// One unit of communication on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity the sender claims at send time.
    pub sender_id: String,
    pub dest: Destination,
    pub method: Method,
    /// Method-specific payload. For `MetaInfo`: a count followed by that
    /// many peer identities, in directory order.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Message {
    pub fn init(sender: impl Into<String>) -> Self {
        Self {
            sender_id: sender.into(),
            dest: Destination::Server,
            method: Method::Init,
            args: Vec::new(),
        }
    }

    pub fn ping(sender: impl Into<String>) -> Self {
        Self {
            sender_id: sender.into(),
            dest: Destination::Server,
            method: Method::Ping,
            args: Vec::new(),
        }
    }

    /// Identity announcement/reply. Sent by a peer answering a query, or
    /// unsolicited; the receiving end does not distinguish the two.
    pub fn whois(sender: impl Into<String>) -> Self {
        Self {
            sender_id: sender.into(),
            dest: Destination::Server,
            method: Method::WhoIs,
            args: Vec::new(),
        }
    }

    /// Directory snapshot carrying `ids` in their current order.
    pub fn meta_info(ids: &[String]) -> Self {
        let mut args = Vec::with_capacity(ids.len() + 1);
        args.push(ids.len().to_string());
        args.extend(ids.iter().cloned());
        Self {
            sender_id: SERVER_ID.to_string(),
            dest: Destination::Direct,
            method: Method::MetaInfo,
            args,
        }
    }

    /// Parse a `MetaInfo` payload back into the peer list.
    ///
    /// Returns `None` for non-directory messages and for snapshots whose
    /// leading count does not match the number of identities that follow.
    pub fn directory(&self) -> Option<Vec<String>> {
        if self.method != Method::MetaInfo {
            return None;
        }
        let count: usize = self.args.first()?.parse().ok()?;
        let ids = self.args.get(1..)?;
        if ids.len() != count {
            return None;
        }
        Some(ids.to_vec())
    }
}
