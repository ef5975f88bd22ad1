//! Component descriptors
//!
//! A [`ComponentDescriptor`] is the metadata of one component type: its
//! configured and provided properties, lifecycle methods, result kind and a
//! factory for new instances. Descriptors are built once with
//! [`ComponentDescriptor::builder`] and shared through a
//! [`DescriptorRegistry`].
//!
//! ```rust
//! use tally_engine::component::{Component, Filter};
//! use tally_engine::descriptor::{ComponentDescriptor, ComponentKind, Property};
//! use tally_engine::value::InputRow;
//!
//! #[derive(Default)]
//! struct Positive {
//!     column: String,
//! }
//!
//! impl Component for Positive {
//!     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
//!         self
//!     }
//!     fn as_filter(&mut self) -> Option<&mut dyn Filter> {
//!         Some(self)
//!     }
//! }
//!
//! impl Filter for Positive {
//!     fn categories(&self) -> Vec<String> {
//!         vec!["YES".into(), "NO".into()]
//!     }
//!     fn categorize(&mut self, row: &InputRow) -> anyhow::Result<String> {
//!         let positive = row.get(&self.column).and_then(|v| v.as_f64()).is_some_and(|v| v > 0.0);
//!         Ok(if positive { "YES" } else { "NO" }.to_string())
//!     }
//! }
//!
//! let descriptor = ComponentDescriptor::builder::<Positive>("positive", ComponentKind::Filter)
//!     .configured(Property::input_column("column").required(), |c: &mut Positive, value| {
//!         c.column = value.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
//!         Ok(())
//!     })
//!     .build();
//!
//! assert!(descriptor.is_distributable());
//! ```

use crate::component::Component;
use crate::error::EngineError;
use crate::injection::Service;
use crate::job::PropertyValue;
use crate::result::ResultKind;
use crate::value::Value;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Transformer,
    Filter,
    Analyzer,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Transformer => f.write_str("transformer"),
            ComponentKind::Filter => f.write_str("filter"),
            ComponentKind::Analyzer => f.write_str("analyzer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    /// Name of a column available to the component
    InputColumn,
}

impl PropertyType {
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (PropertyType::String | PropertyType::InputColumn, Value::String(_))
                | (PropertyType::Integer, Value::Integer(_))
                | (PropertyType::Float, Value::Float(_) | Value::Integer(_))
                | (PropertyType::Boolean, Value::Boolean(_))
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::InputColumn => "input column",
        };
        f.write_str(name)
    }
}

/// Declaration of a configured property, passed to
/// [`DescriptorBuilder::configured`]
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    property_type: PropertyType,
    required: bool,
    array: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: false,
            array: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub fn input_column(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::InputColumn)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }
}

pub type PropertySetter =
    Arc<dyn Fn(&mut dyn Component, Option<PropertyValue>) -> anyhow::Result<()> + Send + Sync>;

pub struct ConfiguredPropertyDescriptor {
    name: String,
    property_type: PropertyType,
    required: bool,
    array: bool,
    setter: PropertySetter,
}

impl ConfiguredPropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    pub fn is_input_column(&self) -> bool {
        self.property_type == PropertyType::InputColumn
    }

    /// Hand a normalized value to the instance's setter
    pub fn assign(
        &self,
        instance: &mut dyn Component,
        value: Option<PropertyValue>,
    ) -> anyhow::Result<()> {
        (self.setter)(instance, value)
    }
}

impl fmt::Debug for ConfiguredPropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredPropertyDescriptor")
            .field("name", &self.name)
            .field("property_type", &self.property_type)
            .field("required", &self.required)
            .field("array", &self.array)
            .finish()
    }
}

pub type ServiceInjector =
    Arc<dyn Fn(&mut dyn Component, Option<Service>) -> anyhow::Result<()> + Send + Sync>;

/// A property satisfied by a shared service instead of job configuration
pub struct ProvidedPropertyDescriptor {
    name: String,
    service_type: TypeId,
    service_type_name: &'static str,
    injector: ServiceInjector,
}

impl ProvidedPropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> TypeId {
        self.service_type
    }

    pub fn service_type_name(&self) -> &'static str {
        self.service_type_name
    }

    pub fn inject(&self, instance: &mut dyn Component, service: Option<Service>) -> anyhow::Result<()> {
        (self.injector)(instance, service)
    }
}

impl fmt::Debug for ProvidedPropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidedPropertyDescriptor")
            .field("name", &self.name)
            .field("service_type", &self.service_type_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Validate,
    Initialize,
    Close,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Validate => f.write_str("Validation"),
            LifecyclePhase::Initialize => f.write_str("Initialization"),
            LifecyclePhase::Close => f.write_str("Close"),
        }
    }
}

/// Flags of a close method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOptions {
    /// Run on workers too, not only where non-distributed tasks are included
    pub distributed: bool,
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            distributed: true,
            on_success: true,
            on_failure: true,
        }
    }
}

pub type LifecycleMethod = Arc<dyn Fn(&mut dyn Component) -> anyhow::Result<()> + Send + Sync>;

pub struct LifecycleMethodDescriptor {
    name: String,
    phase: LifecyclePhase,
    distributed: bool,
    enabled_on_success: bool,
    enabled_on_failure: bool,
    method: LifecycleMethod,
}

impl LifecycleMethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    /// Close gating by outcome; always true for other phases
    pub fn is_enabled_for(&self, success: bool) -> bool {
        (success && self.enabled_on_success) || (!success && self.enabled_on_failure)
    }

    pub fn invoke(&self, instance: &mut dyn Component) -> anyhow::Result<()> {
        (self.method)(instance)
    }
}

impl fmt::Debug for LifecycleMethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleMethodDescriptor")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("distributed", &self.distributed)
            .field("enabled_on_success", &self.enabled_on_success)
            .field("enabled_on_failure", &self.enabled_on_failure)
            .finish()
    }
}

pub type ComponentFactory = Arc<dyn Fn() -> Box<dyn Component> + Send + Sync>;

/// Metadata of one component type
pub struct ComponentDescriptor {
    name: String,
    kind: ComponentKind,
    description: Option<String>,
    configured: Vec<ConfiguredPropertyDescriptor>,
    provided: Vec<ProvidedPropertyDescriptor>,
    lifecycle: Vec<LifecycleMethodDescriptor>,
    result_kind: Option<ResultKind>,
    distributable: bool,
    factory: ComponentFactory,
}

impl ComponentDescriptor {
    pub fn builder<T: Component + Default>(
        name: impl Into<String>,
        kind: ComponentKind,
    ) -> DescriptorBuilder<T> {
        DescriptorBuilder {
            name: name.into(),
            kind,
            description: None,
            configured: Vec::new(),
            provided: Vec::new(),
            lifecycle: Vec::new(),
            result_kind: None,
            distributable: true,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn configured_properties(&self) -> &[ConfiguredPropertyDescriptor] {
        &self.configured
    }

    pub fn configured_property(&self, name: &str) -> Option<&ConfiguredPropertyDescriptor> {
        self.configured.iter().find(|p| p.name == name)
    }

    pub fn provided_properties(&self) -> &[ProvidedPropertyDescriptor] {
        &self.provided
    }

    /// Lifecycle methods of one phase, in declaration order
    pub fn lifecycle_methods(
        &self,
        phase: LifecyclePhase,
    ) -> impl Iterator<Item = &LifecycleMethodDescriptor> {
        self.lifecycle.iter().filter(move |m| m.phase == phase)
    }

    pub fn result_kind(&self) -> Option<ResultKind> {
        self.result_kind
    }

    /// Whether instances can run on workers with their results reduced
    ///
    /// Analyzers additionally need a result kind with a reducer.
    pub fn is_distributable(&self) -> bool {
        if !self.distributable {
            return false;
        }
        match self.kind {
            ComponentKind::Analyzer => self.result_kind.is_some_and(ResultKind::has_reducer),
            ComponentKind::Transformer | ComponentKind::Filter => true,
        }
    }

    pub fn create(&self) -> Box<dyn Component> {
        (self.factory)()
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("configured", &self.configured)
            .field("provided", &self.provided)
            .field("lifecycle", &self.lifecycle)
            .field("result_kind", &self.result_kind)
            .field("distributable", &self.distributable)
            .finish()
    }
}

fn downcast<'a, T: Component>(
    instance: &'a mut dyn Component,
    descriptor: &str,
) -> anyhow::Result<&'a mut T> {
    instance
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| anyhow!("instance is not a '{}' component", descriptor))
}

/// Typed builder for [`ComponentDescriptor`]
pub struct DescriptorBuilder<T> {
    name: String,
    kind: ComponentKind,
    description: Option<String>,
    configured: Vec<ConfiguredPropertyDescriptor>,
    provided: Vec<ProvidedPropertyDescriptor>,
    lifecycle: Vec<LifecycleMethodDescriptor>,
    result_kind: Option<ResultKind>,
    distributable: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component + Default> DescriptorBuilder<T> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn configured<F>(mut self, property: Property, setter: F) -> Self
    where
        F: Fn(&mut T, Option<PropertyValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let descriptor = self.name.clone();
        self.configured.push(ConfiguredPropertyDescriptor {
            name: property.name,
            property_type: property.property_type,
            required: property.required,
            array: property.array,
            setter: Arc::new(
                move |instance: &mut dyn Component, value: Option<PropertyValue>| {
                    setter(downcast::<T>(instance, &descriptor)?, value)
                },
            ),
        });
        self
    }

    /// Declare a property injected from the service of type `S`
    pub fn provided<S, F>(mut self, name: impl Into<String>, injector: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&mut T, Option<Arc<S>>) + Send + Sync + 'static,
    {
        let descriptor = self.name.clone();
        self.provided.push(ProvidedPropertyDescriptor {
            name: name.into(),
            service_type: TypeId::of::<S>(),
            service_type_name: type_name::<S>(),
            injector: Arc::new(move |instance: &mut dyn Component, service: Option<Service>| {
                let typed = match service {
                    Some(service) => Some(service.downcast::<S>().map_err(|_| {
                        anyhow!("registered service is not a {}", type_name::<S>())
                    })?),
                    None => None,
                };
                injector(downcast::<T>(instance, &descriptor)?, typed);
                Ok(())
            }),
        });
        self
    }

    pub fn validate<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle_method(name.into(), LifecyclePhase::Validate, CloseOptions::default(), method)
    }

    pub fn initialize<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle_method(name.into(), LifecyclePhase::Initialize, CloseOptions::default(), method)
    }

    /// Initialize method that only runs where non-distributed tasks are
    /// included, i.e. on the coordinator or a single node
    pub fn initialize_non_distributed<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = CloseOptions {
            distributed: false,
            ..CloseOptions::default()
        };
        self.lifecycle_method(name.into(), LifecyclePhase::Initialize, options, method)
    }

    pub fn close<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.close_with(name, CloseOptions::default(), method)
    }

    pub fn close_with<F>(self, name: impl Into<String>, options: CloseOptions, method: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifecycle_method(name.into(), LifecyclePhase::Close, options, method)
    }

    fn lifecycle_method<F>(
        mut self,
        name: String,
        phase: LifecyclePhase,
        options: CloseOptions,
        method: F,
    ) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let descriptor = self.name.clone();
        self.lifecycle.push(LifecycleMethodDescriptor {
            name,
            phase,
            distributed: options.distributed,
            enabled_on_success: options.on_success,
            enabled_on_failure: options.on_failure,
            method: Arc::new(move |instance: &mut dyn Component| {
                method(downcast::<T>(instance, &descriptor)?)
            }),
        });
        self
    }

    pub fn result_kind(mut self, kind: ResultKind) -> Self {
        self.result_kind = Some(kind);
        self
    }

    /// Mark the component as unable to run split across workers
    pub fn not_distributable(mut self) -> Self {
        self.distributable = false;
        self
    }

    pub fn build(self) -> ComponentDescriptor {
        ComponentDescriptor {
            name: self.name,
            kind: self.kind,
            description: self.description,
            configured: self.configured,
            provided: self.provided,
            lifecycle: self.lifecycle,
            result_kind: self.result_kind,
            distributable: self.distributable,
            factory: Arc::new(|| Box::new(T::default()) as Box<dyn Component>),
        }
    }
}

/// Component types known to an environment, by descriptor name
#[derive(Debug, Default, Clone)]
pub struct DescriptorRegistry {
    descriptors: BTreeMap<String, Arc<ComponentDescriptor>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the [`builtin`](crate::builtin) components
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register a descriptor, replacing any previous one of the same name
    pub fn register(&mut self, descriptor: ComponentDescriptor) -> &mut Self {
        self.descriptors.insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<ComponentDescriptor>, EngineError> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDescriptor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComponentDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
