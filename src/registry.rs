//! Method registries: the set of callables one side exposes to the other.
//!
//! Methods are registered explicitly, either one closure at a time through
//! [`RegistryBuilder`] or wholesale from a [`MethodProvider`]. Names that
//! start with `_` are private and never exposed.

use crate::marshal::RemoteError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Marker prefix for private method names.
pub const PRIVATE_PREFIX: char = '_';

const RESERVED_NAMES: &[&str] = &["constructor"];

pub type MethodResult = std::result::Result<Value, RemoteError>;
pub type MethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send>>;
pub type Method = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// Whether `name` may be exposed to the peer.
pub fn is_exposable(name: &str) -> bool {
    !name.is_empty() && !name.starts_with(PRIVATE_PREFIX) && !RESERVED_NAMES.contains(&name)
}

/// A type that serves a fixed set of named methods.
///
/// ```rust,no_run
/// use wtfork::{MethodProvider, MethodRegistry, MethodResult, RemoteError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct Greeter;
///
/// #[async_trait]
/// impl MethodProvider for Greeter {
///     fn method_names(&self) -> Vec<String> {
///         vec!["hello".to_string(), "_internal".to_string()]
///     }
///
///     async fn call_method(&self, name: &str, _args: Vec<Value>) -> MethodResult {
///         match name {
///             "hello" => Ok(json!({"some": "data"})),
///             _ => Err(RemoteError::msg(format!("no method {}", name))),
///         }
///     }
/// }
///
/// let registry = MethodRegistry::from_provider(Greeter);
/// assert_eq!(registry.names(), ["hello"]);
/// ```
#[async_trait]
pub trait MethodProvider: Send + Sync + 'static {
    fn method_names(&self) -> Vec<String>;

    async fn call_method(&self, name: &str, args: Vec<Value>) -> MethodResult;
}

/// Immutable name to callable mapping, in registration order.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    order: Vec<String>,
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_provider<P: MethodProvider>(provider: P) -> Self {
        let provider = Arc::new(provider);
        let mut builder = RegistryBuilder::default();
        for name in provider.method_names() {
            let provider = Arc::clone(&provider);
            let key = name.clone();
            let method: Method = Arc::new(move |args| -> MethodFuture {
                let provider = Arc::clone(&provider);
                let name = key.clone();
                Box::pin(async move { provider.call_method(&name, args).await })
            });
            builder = builder.insert(name, method);
        }
        builder.build()
    }

    /// Exposed method names, in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Start invoking `name`. `None` if no such method is exposed.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Option<MethodFuture> {
        self.methods.get(name).map(|method| method(args))
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("names", &self.order)
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    order: Vec<String>,
    methods: HashMap<String, Method>,
}

impl RegistryBuilder {
    /// Register an async method.
    pub fn method<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let method: Method = Arc::new(move |args| -> MethodFuture { Box::pin(f(args)) });
        self.insert(name.to_string(), method)
    }

    /// Register a method that completes without awaiting.
    pub fn sync_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        let method: Method = Arc::new(move |args| -> MethodFuture {
            let result = f(args);
            Box::pin(async move { result })
        });
        self.insert(name.to_string(), method)
    }

    fn insert(mut self, name: String, method: Method) -> Self {
        if !is_exposable(&name) {
            return self;
        }
        // Re-registration replaces the callable and keeps the first position
        if self.methods.insert(name.clone(), method).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            order: self.order,
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_private_names_are_filtered() {
        let registry = MethodRegistry::builder()
            .sync_method("hello", |_| Ok(json!(1)))
            .sync_method("_somePrivateMethod", |_| Ok(json!(2)))
            .sync_method("goodbye", |_| Ok(json!(3)))
            .sync_method("_", |_| Ok(json!(4)))
            .sync_method("constructor", |_| Ok(json!(5)))
            .sync_method("", |_| Ok(json!(6)))
            .build();

        assert_eq!(registry.names(), ["hello", "goodbye"]);
        assert!(!registry.contains("_somePrivateMethod"));
        assert!(registry.invoke("_somePrivateMethod", vec![]).is_none());
    }

    #[test]
    fn test_names_keep_registration_order() {
        let names = ["zeta", "_hidden", "alpha", "mid", "_x", "beta"];
        let mut builder = MethodRegistry::builder();
        for name in names {
            builder = builder.sync_method(name, |_| Ok(Value::Null));
        }
        let registry = builder.build();

        let expected: Vec<&str> = names.into_iter().filter(|n| !n.starts_with('_')).collect();
        assert_eq!(registry.names(), expected.as_slice());
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_callable() {
        let registry = MethodRegistry::builder()
            .sync_method("a", |_| Ok(json!("first")))
            .sync_method("b", |_| Ok(json!("b")))
            .sync_method("a", |_| Ok(json!("second")))
            .build();

        assert_eq!(registry.names(), ["a", "b"]);
        let result = registry.invoke("a", vec![]).unwrap().await.unwrap();
        assert_eq!(result, json!("second"));
    }

    #[tokio::test]
    async fn test_invoke_async_method() {
        let registry = MethodRegistry::builder()
            .method("echo", |args| async move {
                tokio::task::yield_now().await;
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            })
            .build();

        let result = registry.invoke("echo", vec![json!("x")]).unwrap().await;
        assert_eq!(result.unwrap(), json!("x"));
        assert!(registry.invoke("missing", vec![]).is_none());
    }

    struct Provider;

    #[async_trait]
    impl MethodProvider for Provider {
        fn method_names(&self) -> Vec<String> {
            vec!["simples".into(), "_private".into(), "fail".into()]
        }

        async fn call_method(&self, name: &str, args: Vec<Value>) -> MethodResult {
            match name {
                "simples" => Ok(args.first().cloned().unwrap_or(Value::Null)),
                "fail" => Err(RemoteError::new(ErrorKind::Range, "nope")),
                _ => Err(RemoteError::msg("unreachable")),
            }
        }
    }

    #[tokio::test]
    async fn test_from_provider() {
        let registry = MethodRegistry::from_provider(Provider);
        assert_eq!(registry.names(), ["simples", "fail"]);

        let ok = registry.invoke("simples", vec![json!("meerkat")]).unwrap().await;
        assert_eq!(ok.unwrap(), json!("meerkat"));

        let err = registry.invoke("fail", vec![]).unwrap().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn test_empty_registry() {
        let registry = MethodRegistry::empty();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
