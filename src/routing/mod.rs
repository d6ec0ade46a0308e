//! Message Routing Model
//!
//! Addressing shared by the event bridge, the hub and the notification triggers.
//!
//! ## Routing keys
//!
//! Broker records carry a composite key of the form `<kind>:<id>`:
//! - `user:<uuid>` - unicast to every connection of that client
//! - `group:<uuid>` - multicast to every connection subscribed to the group
//! - `broadcast:*` - every live connection

mod key;
mod message;

pub use key::{DecodeError, SEPARATOR};
pub use message::{Address, ClientId, GroupId, RoutableMessage};
