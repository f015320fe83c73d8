//! # Remox Gateway
//!
//! The remote-resident half of Remox mobile code: a managed object that
//! accepts serialized code units, reconstructs them with the issuing side's
//! distribution server as its code source, and executes them against the
//! local management connection.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Module resolution over local and remote code sources
pub mod loader;

/// The invocation gateway, its registry and managed-object surface
pub mod gateway;

pub use gateway::{
    register_gateway_factories, unit_value, GatewayRegistry, InvocationGateway, UNIT_TYPE_NAME,
};
pub use loader::GatewayLoader;
