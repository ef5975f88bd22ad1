//! Service lookup for provided properties

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased shared service
pub type Service = Arc<dyn Any + Send + Sync>;

/// Resolves provided properties by the full type of the requested service
pub trait InjectionManager: Send + Sync {
    fn lookup(&self, service_type: TypeId) -> Option<Service>;
}

/// Map-backed [`InjectionManager`]
///
/// Services are keyed by their concrete type, so `Arc<Vec<String>>` and
/// `Arc<Vec<i64>>` are distinct registrations.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Any + Send + Sync>(&mut self, service: Arc<S>) -> &mut Self {
        self.services.insert(TypeId::of::<S>(), service);
        self
    }

    pub fn with<S: Any + Send + Sync>(mut self, service: Arc<S>) -> Self {
        self.register(service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl InjectionManager for ServiceRegistry {
    fn lookup(&self, service_type: TypeId) -> Option<Service> {
        self.services.get(&service_type).cloned()
    }
}
