//! The management connection facade and object metadata model
//!
//! The connection is an external collaborator: Remox builds on its
//! create/delete/get/set/query/invoke primitives but does not implement the
//! transport itself. [`crate::local::LocalServer`] provides the in-process
//! implementation used for local attach and as the remote-side registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RemoxError;
use crate::value::Value;
use crate::Result;

/// Address of a managed object, `domain:key=value[,key=value...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Parses an object id. The form is `domain:properties`; both parts
    /// must be non-empty. Query patterns may contain `*` wildcards.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        match id.split_once(':') {
            Some((domain, properties)) if !domain.is_empty() && !properties.is_empty() => {
                Ok(Self(id))
            }
            _ => Err(RemoxError::Metadata(format!(
                "invalid object id [{}]: expected domain:properties",
                id
            ))),
        }
    }

    /// The full id string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain part, before the first `:`
    pub fn domain(&self) -> &str {
        self.0.split_once(':').map(|(domain, _)| domain).unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for one attribute of a managed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeInfo {
    /// Attribute name
    pub name: String,
    /// Wire type token of the attribute value
    pub type_token: String,
    /// Whether the attribute can be read
    pub readable: bool,
    /// Whether the attribute can be written
    pub writable: bool,
}

impl AttributeInfo {
    /// A readable, non-writable attribute
    pub fn readonly(name: impl Into<String>, type_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
            readable: true,
            writable: false,
        }
    }

    /// A readable and writable attribute
    pub fn mutable(name: impl Into<String>, type_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
            readable: true,
            writable: true,
        }
    }
}

/// Metadata for one parameter of a managed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name
    pub name: String,
    /// Wire type token
    pub type_token: String,
}

impl ParameterInfo {
    /// Creates a parameter description
    pub fn new(name: impl Into<String>, type_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
        }
    }
}

/// Metadata for one operation of a managed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name
    pub name: String,
    /// Ordered parameter descriptions
    pub params: Vec<ParameterInfo>,
    /// Wire type token of the return value
    pub return_token: String,
}

impl OperationInfo {
    /// Creates an operation description
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParameterInfo>,
        return_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            return_token: return_token.into(),
        }
    }
}

/// The shape a connection reports for a managed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// The implementing class name
    pub class_name: String,
    /// Attribute metadata
    pub attributes: Vec<AttributeInfo>,
    /// Operation metadata
    pub operations: Vec<OperationInfo>,
}

/// An event emitted by a managed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// The emitting object
    pub source: ObjectId,
    /// Notification kind, e.g. `remox.gateway.installed`
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Structured payload
    pub payload: Value,
    /// Per-source sequence number
    pub sequence: u64,
}

/// Receiver of managed object notifications
pub trait NotificationListener: Send + Sync {
    /// Called for every matching notification
    fn on_notification(&self, notification: &Notification);
}

/// Handle identifying a listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub Uuid);

/// The raw connect/query/invoke primitives the Remox core builds upon.
///
/// All failures of the underlying channel surface as
/// [`RemoxError::Transport`]; they are never retried here.
#[async_trait]
pub trait ManagementConnection: Send + Sync {
    /// Stable identity of this connection, used to key per-connection
    /// singletons such as the invocation gateway
    fn connection_id(&self) -> &str;

    /// True when this connection reaches an in-process management server
    fn is_local(&self) -> bool {
        false
    }

    /// Reports the shape of a managed object
    async fn describe(&self, object: &ObjectId) -> Result<ObjectDescriptor>;

    /// Reads an attribute value
    async fn get_attribute(&self, object: &ObjectId, name: &str) -> Result<Value>;

    /// Writes an attribute value
    async fn set_attribute(&self, object: &ObjectId, name: &str, value: Value) -> Result<()>;

    /// Invokes an operation with an already-resolved signature
    async fn invoke(
        &self,
        object: &ObjectId,
        operation: &str,
        signature: &[String],
        args: Vec<Value>,
    ) -> Result<Value>;

    /// Lists object ids matching a `*`-wildcard pattern
    async fn query(&self, pattern: &str) -> Result<Vec<ObjectId>>;

    /// Instantiates and registers a managed object by class name
    async fn create(&self, class_name: &str, object: &ObjectId, args: Vec<Value>) -> Result<()>;

    /// Unregisters a managed object
    async fn delete(&self, object: &ObjectId) -> Result<()>;

    /// True when an object is registered under the id
    async fn is_registered(&self, object: &ObjectId) -> Result<bool>;

    /// Registers a notification listener on an object
    async fn add_listener(
        &self,
        object: &ObjectId,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<ListenerId>;

    /// Removes a previously registered listener
    async fn remove_listener(&self, object: &ObjectId, listener: ListenerId) -> Result<()>;
}
