//! In-process management server
//!
//! [`LocalServer`] is both the local-attach surface and the remote-side
//! substrate: it registers [`ManagedResource`] trait objects under object
//! ids, instantiates objects by class name through registered factories
//! (the path remote installation uses), fans notifications out to
//! listeners, and implements [`ManagementConnection`] for in-process calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::{
    ListenerId, ManagementConnection, Notification, NotificationListener, ObjectDescriptor,
    ObjectId,
};
use crate::error::RemoxError;
use crate::value::Value;
use crate::Result;

/// A managed object registered with a [`LocalServer`]
#[async_trait]
pub trait ManagedResource: Send + Sync {
    /// The shape this object reports to connections
    fn descriptor(&self) -> ObjectDescriptor;

    /// Reads an attribute
    async fn get_attribute(&self, name: &str) -> Result<Value>;

    /// Writes an attribute
    async fn set_attribute(&self, name: &str, value: Value) -> Result<()> {
        let _ = value;
        Err(RemoxError::NoSuchAttribute {
            object: self.descriptor().class_name,
            attribute: name.to_string(),
        })
    }

    /// Invokes an operation with an already-resolved signature
    async fn invoke(&self, operation: &str, signature: &[String], args: Vec<Value>)
        -> Result<Value>;
}

/// Constructor invoked when a connection creates an object by class name
pub type ResourceFactory =
    Box<dyn Fn(Vec<Value>) -> Result<Arc<dyn ManagedResource>> + Send + Sync>;

/// An in-process management server
pub struct LocalServer {
    connection_id: String,
    objects: RwLock<HashMap<ObjectId, Arc<dyn ManagedResource>>>,
    factories: RwLock<HashMap<String, ResourceFactory>>,
    listeners: RwLock<HashMap<ObjectId, Vec<(ListenerId, Arc<dyn NotificationListener>)>>>,
    sequence: AtomicU64,
}

impl LocalServer {
    /// Creates a server with a unique connection id
    pub fn new() -> Arc<Self> {
        Self::with_id(format!("local-{}", Uuid::new_v4()))
    }

    /// Creates a server with an explicit connection id
    pub fn with_id(connection_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            connection_id: connection_id.into(),
            objects: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        })
    }

    /// Registers a managed object under an id.
    ///
    /// Registering over an existing id replaces the object.
    pub async fn register(&self, object_id: ObjectId, resource: Arc<dyn ManagedResource>) {
        debug!(object = %object_id, "Registering managed object");
        self.objects.write().await.insert(object_id, resource);
    }

    /// Removes a managed object
    pub async fn unregister(&self, object_id: &ObjectId) -> bool {
        self.objects.write().await.remove(object_id).is_some()
    }

    /// Registers a class-name factory used by [`ManagementConnection::create`]
    pub async fn register_factory(&self, class_name: impl Into<String>, factory: ResourceFactory) {
        self.factories.write().await.insert(class_name.into(), factory);
    }

    /// Returns the registered object, if any
    pub async fn resource(&self, object_id: &ObjectId) -> Option<Arc<dyn ManagedResource>> {
        self.objects.read().await.get(object_id).cloned()
    }

    /// Emits a notification from a source object to its listeners
    pub async fn emit(&self, source: &ObjectId, kind: &str, message: &str, payload: Value) {
        let notification = Notification {
            source: source.clone(),
            kind: kind.to_string(),
            message: message.to_string(),
            payload,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let listeners = self.listeners.read().await;
        if let Some(registered) = listeners.get(source) {
            for (_, listener) in registered {
                listener.on_notification(&notification);
            }
        }
    }

    async fn lookup(&self, object: &ObjectId) -> Result<Arc<dyn ManagedResource>> {
        self.resource(object)
            .await
            .ok_or_else(|| RemoxError::NoSuchObject(object.to_string()))
    }
}

/// Matches an id against a `*`-wildcard pattern
fn matches_pattern(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }
    let fragments: Vec<&str> = pattern.split('*').collect();
    let last_index = fragments.len() - 1;

    let mut remaining = match candidate.strip_prefix(fragments[0]) {
        Some(rest) => rest,
        None => return false,
    };
    for fragment in &fragments[1..last_index] {
        if fragment.is_empty() {
            continue;
        }
        match remaining.find(fragment) {
            Some(position) => remaining = &remaining[position + fragment.len()..],
            None => return false,
        }
    }
    remaining.ends_with(fragments[last_index])
}

#[async_trait]
impl ManagementConnection for LocalServer {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn describe(&self, object: &ObjectId) -> Result<ObjectDescriptor> {
        Ok(self.lookup(object).await?.descriptor())
    }

    async fn get_attribute(&self, object: &ObjectId, name: &str) -> Result<Value> {
        self.lookup(object).await?.get_attribute(name).await
    }

    async fn set_attribute(&self, object: &ObjectId, name: &str, value: Value) -> Result<()> {
        self.lookup(object).await?.set_attribute(name, value).await
    }

    async fn invoke(
        &self,
        object: &ObjectId,
        operation: &str,
        signature: &[String],
        args: Vec<Value>,
    ) -> Result<Value> {
        self.lookup(object).await?.invoke(operation, signature, args).await
    }

    async fn query(&self, pattern: &str) -> Result<Vec<ObjectId>> {
        let objects = self.objects.read().await;
        let mut matched: Vec<ObjectId> = objects
            .keys()
            .filter(|id| matches_pattern(pattern, id.as_str()))
            .cloned()
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn create(&self, class_name: &str, object: &ObjectId, args: Vec<Value>) -> Result<()> {
        let resource = {
            let factories = self.factories.read().await;
            let factory = factories.get(class_name).ok_or_else(|| {
                RemoxError::NoSuchObject(format!("no factory registered for class [{}]", class_name))
            })?;
            factory(args)?
        };
        info!(class = class_name, object = %object, "Created managed object");
        self.register(object.clone(), resource).await;
        Ok(())
    }

    async fn delete(&self, object: &ObjectId) -> Result<()> {
        if self.unregister(object).await {
            Ok(())
        } else {
            Err(RemoxError::NoSuchObject(object.to_string()))
        }
    }

    async fn is_registered(&self, object: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(object))
    }

    async fn add_listener(
        &self,
        object: &ObjectId,
        listener: Arc<dyn NotificationListener>,
    ) -> Result<ListenerId> {
        if !self.is_registered(object).await? {
            return Err(RemoxError::NoSuchObject(object.to_string()));
        }
        let id = ListenerId(Uuid::new_v4());
        self.listeners
            .write()
            .await
            .entry(object.clone())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn remove_listener(&self, object: &ObjectId, listener: ListenerId) -> Result<()> {
        let mut listeners = self.listeners.write().await;
        if let Some(registered) = listeners.get_mut(object) {
            let before = registered.len();
            registered.retain(|(id, _)| *id != listener);
            if registered.len() < before {
                return Ok(());
            }
        }
        Err(RemoxError::NoSuchObject(format!(
            "no such listener on [{}]",
            object
        )))
    }
}
