//! Relay breaker control: the HTTP client for the relay device service and
//! the router that fans a channel or group command out to it.

pub mod device;
pub mod router;

pub use device::{HttpRelayDevice, RelayAck, RelayDevice, RelayDeviceError};
pub use router::{CommandRouter, RelayTarget, ResolvedTarget, RouterError};
