//! Managed object handles
//!
//! An [`ObjectHandle`] is the capability set of one managed object: its
//! readable attribute names and its operations keyed by name, each name
//! owning the set of signatures registered under it. Handles are immutable
//! after construction; if the remote object's shape changes, a fresh lookup
//! produces a fresh handle.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::connection::{ManagementConnection, ObjectDescriptor, ObjectId};
use crate::error::RemoxError;
use crate::resolve::{self, OperationSignature};
use crate::value::Value;
use crate::Result;

/// A handle to one managed object on a connection
pub struct ObjectHandle {
    object_id: ObjectId,
    connection: Arc<dyn ManagementConnection>,
    class_name: String,
    attribute_names: HashSet<String>,
    writable_attributes: HashSet<String>,
    operations: HashMap<String, BTreeSet<OperationSignature>>,
}

impl ObjectHandle {
    /// Looks up an object on the connection and builds its handle.
    ///
    /// Reflection or type-token failures while building the signature table
    /// are fatal here: a handle with incomplete metadata is unsafe to expose.
    pub async fn lookup(
        connection: Arc<dyn ManagementConnection>,
        object_id: ObjectId,
    ) -> Result<Self> {
        let descriptor = connection.describe(&object_id).await?;
        Self::from_descriptor(connection, object_id, &descriptor)
    }

    /// Builds a handle from an already-fetched descriptor
    pub fn from_descriptor(
        connection: Arc<dyn ManagementConnection>,
        object_id: ObjectId,
        descriptor: &ObjectDescriptor,
    ) -> Result<Self> {
        let mut attribute_names = HashSet::new();
        let mut writable_attributes = HashSet::new();
        for attribute in &descriptor.attributes {
            if attribute.readable {
                attribute_names.insert(attribute.name.clone());
            }
            if attribute.writable {
                writable_attributes.insert(attribute.name.clone());
            }
        }

        let mut operations: HashMap<String, BTreeSet<OperationSignature>> = HashMap::new();
        for info in &descriptor.operations {
            let signature = OperationSignature::from_info(info).map_err(|e| {
                RemoxError::Metadata(format!(
                    "failed to build signature for [{}] on [{}]: {}",
                    info.name, object_id, e
                ))
            })?;
            operations.entry(info.name.clone()).or_default().insert(signature);
        }

        debug!(
            object = %object_id,
            attributes = attribute_names.len(),
            operations = operations.len(),
            "Built managed object handle"
        );

        Ok(Self {
            object_id,
            connection,
            class_name: descriptor.class_name.clone(),
            attribute_names,
            writable_attributes,
            operations,
        })
    }

    /// The object id this handle addresses
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// The implementing class name reported by the connection
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The connection this handle operates through
    pub fn connection(&self) -> &Arc<dyn ManagementConnection> {
        &self.connection
    }

    /// Sorted readable attribute names
    pub fn attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attribute_names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted operation names
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The signatures registered under an operation name
    pub fn signatures(&self, operation: &str) -> Option<&BTreeSet<OperationSignature>> {
        self.operations.get(operation)
    }

    /// True when the named attribute is readable
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute_names.contains(name)
    }

    /// Reads an attribute value
    pub async fn get(&self, name: &str) -> Result<Value> {
        if !self.attribute_names.contains(name) {
            return Err(RemoxError::NoSuchAttribute {
                object: self.object_id.to_string(),
                attribute: name.to_string(),
            });
        }
        self.connection.get_attribute(&self.object_id, name).await
    }

    /// Writes an attribute value
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        if !self.writable_attributes.contains(name) {
            return Err(RemoxError::NoSuchAttribute {
                object: self.object_id.to_string(),
                attribute: name.to_string(),
            });
        }
        self.connection.set_attribute(&self.object_id, name, value).await
    }

    /// Invokes an operation, resolving overloads against the arguments.
    ///
    /// When the name is not an operation (or no signature has a matching
    /// arity) the call is treated as a property miss: zero arguments fall
    /// back to an attribute read, a single argument to an attribute write.
    pub async fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Value> {
        if let Some(candidates) = self.operations.get(operation) {
            if let Some(signature) = resolve::resolve(operation, candidates, &args)? {
                let tokens = signature.param_tokens();
                return self
                    .connection
                    .invoke(&self.object_id, operation, &tokens, args)
                    .await;
            }
        }
        self.dispatch_miss(operation, args).await
    }

    async fn dispatch_miss(&self, name: &str, mut args: Vec<Value>) -> Result<Value> {
        if args.is_empty() && self.attribute_names.contains(name) {
            return self.get(name).await;
        }
        if args.len() == 1 && self.writable_attributes.contains(name) {
            self.set(name, args.remove(0)).await?;
            return Ok(Value::Null);
        }
        Err(RemoxError::NoSuchOperation {
            object: self.object_id.to_string(),
            operation: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        AttributeInfo, ListenerId, NotificationListener, OperationInfo, ParameterInfo,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Connection stub recording the signature tokens each invoke resolved to
    struct RecordingConnection {
        descriptor: ObjectDescriptor,
        invocations: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl ManagementConnection for RecordingConnection {
        fn connection_id(&self) -> &str {
            "test-connection"
        }

        async fn describe(&self, _object: &ObjectId) -> Result<ObjectDescriptor> {
            Ok(self.descriptor.clone())
        }

        async fn get_attribute(&self, _object: &ObjectId, name: &str) -> Result<Value> {
            Ok(Value::Str(format!("attr:{}", name)))
        }

        async fn set_attribute(&self, _object: &ObjectId, _name: &str, _value: Value) -> Result<()> {
            Ok(())
        }

        async fn invoke(
            &self,
            _object: &ObjectId,
            operation: &str,
            signature: &[String],
            _args: Vec<Value>,
        ) -> Result<Value> {
            self.invocations
                .lock()
                .unwrap()
                .push((operation.to_string(), signature.to_vec()));
            Ok(Value::Null)
        }

        async fn query(&self, _pattern: &str) -> Result<Vec<ObjectId>> {
            Ok(vec![])
        }

        async fn create(&self, _class: &str, _object: &ObjectId, _args: Vec<Value>) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _object: &ObjectId) -> Result<()> {
            Ok(())
        }

        async fn is_registered(&self, _object: &ObjectId) -> Result<bool> {
            Ok(true)
        }

        async fn add_listener(
            &self,
            _object: &ObjectId,
            _listener: Arc<dyn NotificationListener>,
        ) -> Result<ListenerId> {
            Ok(ListenerId(uuid::Uuid::new_v4()))
        }

        async fn remove_listener(&self, _object: &ObjectId, _listener: ListenerId) -> Result<()> {
            Ok(())
        }
    }

    fn descriptor() -> ObjectDescriptor {
        ObjectDescriptor {
            class_name: "remox.test.Service".into(),
            attributes: vec![
                AttributeInfo::readonly("Count", "i64"),
                AttributeInfo::mutable("Level", "i32"),
            ],
            operations: vec![
                OperationInfo::new("reset", vec![], "object"),
                OperationInfo::new(
                    "record",
                    vec![ParameterInfo::new("value", "i64")],
                    "object",
                ),
                OperationInfo::new(
                    "record",
                    vec![ParameterInfo::new("label", "string")],
                    "object",
                ),
            ],
        }
    }

    async fn handle_with_connection() -> (ObjectHandle, Arc<RecordingConnection>) {
        let connection = Arc::new(RecordingConnection {
            descriptor: descriptor(),
            invocations: Mutex::new(vec![]),
        });
        let handle = ObjectHandle::lookup(
            connection.clone(),
            ObjectId::new("remox.test:type=Service").unwrap(),
        )
        .await
        .unwrap();
        (handle, connection)
    }

    #[tokio::test]
    async fn test_handle_shape() {
        let (handle, _) = handle_with_connection().await;
        assert_eq!(handle.attributes(), vec!["Count", "Level"]);
        assert_eq!(handle.operations(), vec!["record", "reset"]);
        assert_eq!(handle.signatures("record").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invoke_resolves_overloads() {
        let (handle, connection) = handle_with_connection().await;
        handle.invoke("record", vec![Value::I64(1)]).await.unwrap();
        handle.invoke("record", vec![Value::Str("x".into())]).await.unwrap();

        let invocations = connection.invocations.lock().unwrap();
        assert_eq!(invocations[0].1, vec!["i64"]);
        assert_eq!(invocations[1].1, vec!["string"]);
    }

    #[tokio::test]
    async fn test_property_fallback_on_method_miss() {
        let (handle, _) = handle_with_connection().await;
        // "Count" is not an operation; zero-arg dispatch falls back to a read.
        let value = handle.invoke("Count", vec![]).await.unwrap();
        assert_eq!(value, Value::Str("attr:Count".into()));

        // One argument on a writable attribute falls back to a write.
        let value = handle.invoke("Level", vec![Value::I32(3)]).await.unwrap();
        assert_eq!(value, Value::Null);

        let err = handle.invoke("missing", vec![]).await.unwrap_err();
        assert!(matches!(err, RemoxError::NoSuchOperation { .. }));
    }

    #[tokio::test]
    async fn test_arity_miss_falls_back_before_failing() {
        let (handle, _) = handle_with_connection().await;
        // "record" exists but has no 2-arg signature and no such attribute.
        let err = handle
            .invoke("record", vec![Value::I64(1), Value::I64(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoxError::NoSuchOperation { .. }));
    }

    #[tokio::test]
    async fn test_malformed_metadata_is_fatal() {
        let connection = Arc::new(RecordingConnection {
            descriptor: ObjectDescriptor {
                class_name: "remox.test.Broken".into(),
                attributes: vec![],
                operations: vec![OperationInfo::new(
                    "op",
                    vec![ParameterInfo::new("p", "")],
                    "object",
                )],
            },
            invocations: Mutex::new(vec![]),
        });
        let result = ObjectHandle::lookup(
            connection,
            ObjectId::new("remox.test:type=Broken").unwrap(),
        )
        .await;
        assert!(matches!(result, Err(RemoxError::Metadata(_))));
    }

    #[tokio::test]
    async fn test_unreadable_attribute_rejected() {
        let (handle, _) = handle_with_connection().await;
        let err = handle.get("Nope").await.unwrap_err();
        assert!(matches!(err, RemoxError::NoSuchAttribute { .. }));
        let err = handle.set("Count", Value::I64(0)).await.unwrap_err();
        assert!(matches!(err, RemoxError::NoSuchAttribute { .. }));
    }
}
