//! Message verification for asynchronous (message) interactions.
//!
//! A provider under verification wraps its HTTP service in a
//! [`MessageDispatchLayer`]; the verifier then asks for each message by
//! description on [`MESSAGE_PATH`].

pub mod handlers;
pub mod proxy;

pub use handlers::{GeneratedMessage, HandlerError, MessageHandler, MessageHandlers};
pub use proxy::{
    LEGACY_METADATA_HEADER, MESSAGE_CONTENT_TYPE, MESSAGE_PATH, METADATA_HEADER, MessageDispatch,
    MessageDispatchLayer, dispatch,
};
