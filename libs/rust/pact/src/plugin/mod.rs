//! Out-of-process plugins: discovery, handshake, content and transports.

pub mod bridge;
pub mod catalogue;
pub mod channel;
pub mod grpc;
pub mod manifest;
pub mod proto;

pub use bridge::{
    ContentDifference, GeneratedContent, HTTP_TRANSPORT, PluginBridge, PluginHandle, PluginRef,
    TransportFactory,
};
pub use catalogue::{Capability, CapabilityKind, Catalogue};
pub use channel::{PLUGIN_INTERFACE_VERSION, PluginChannel, PluginConnection, PluginConnector};
pub use grpc::{GrpcPluginChannel, ProcessPluginConnector};
