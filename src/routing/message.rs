//! Routable messages and their addressing modes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a remote client (user or device owner)
pub type ClientId = Uuid;

/// Identity of a group whose members receive multicasts
pub type GroupId = Uuid;

/// How a message selects its target connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum Address {
    /// Every connection opened by this client
    Unicast(ClientId),
    /// Every connection holding this group membership
    Multicast(GroupId),
    /// Every live connection
    Broadcast,
}

impl Address {
    /// Short label used in log fields
    pub fn mode(&self) -> &'static str {
        match self {
            Address::Unicast(_) => "unicast",
            Address::Multicast(_) => "multicast",
            Address::Broadcast => "broadcast",
        }
    }
}

/// A payload paired with the address it should be delivered to.
///
/// The address is fixed at construction; a message is consumed once by
/// [`Hub::dispatch`](crate::websocket::Hub::dispatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutableMessage {
    address: Address,
    payload: Bytes,
}

impl RoutableMessage {
    pub fn new(address: Address, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    pub fn unicast(client: ClientId, payload: impl Into<Bytes>) -> Self {
        Self::new(Address::Unicast(client), payload)
    }

    pub fn multicast(group: GroupId, payload: impl Into<Bytes>) -> Self {
        Self::new(Address::Multicast(group), payload)
    }

    pub fn broadcast(payload: impl Into<Bytes>) -> Self {
        Self::new(Address::Broadcast, payload)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw payload bytes; cloning is a reference-count bump
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_fix_address() {
        let client = Uuid::new_v4();
        let group = Uuid::new_v4();

        assert_eq!(
            RoutableMessage::unicast(client, "a").address(),
            Address::Unicast(client)
        );
        assert_eq!(
            RoutableMessage::multicast(group, "b").address(),
            Address::Multicast(group)
        );
        assert_eq!(RoutableMessage::broadcast("c").address(), Address::Broadcast);
    }

    #[test]
    fn test_payload_is_untouched() {
        let raw = vec![0u8, 159, 146, 150];
        let msg = RoutableMessage::broadcast(raw.clone());
        assert_eq!(msg.payload().as_ref(), raw.as_slice());
    }

    #[test]
    fn test_address_serialize() {
        let group: Uuid = "3fa85f64-5717-4562-b3fc-2c963f66afa6".parse().unwrap();
        let json = serde_json::to_string(&Address::Multicast(group)).unwrap();
        assert!(json.contains("\"mode\":\"multicast\""));
        assert!(json.contains("3fa85f64-5717-4562-b3fc-2c963f66afa6"));

        let json = serde_json::to_string(&Address::Broadcast).unwrap();
        assert_eq!(json, r#"{"mode":"broadcast"}"#);
    }
}
