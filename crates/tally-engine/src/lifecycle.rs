//! Component lifecycle
//!
//! [`LifecycleHelper`] moves an instance through
//! configured → validated → initialized, and later closes it. The
//! `include_non_distributed_tasks` flag decides whether initialize and close
//! methods marked non-distributed run: true on the coordinator and for
//! single-node runs, false on workers.

use crate::component::Component;
use crate::descriptor::{ComponentDescriptor, ConfiguredPropertyDescriptor, LifecyclePhase};
use crate::error::{EngineError, Result};
use crate::injection::InjectionManager;
use crate::job::{ComponentConfiguration, PropertyValue};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LifecycleHelper {
    injection: Arc<dyn InjectionManager>,
    include_non_distributed_tasks: bool,
}

impl LifecycleHelper {
    pub fn new(injection: Arc<dyn InjectionManager>, include_non_distributed_tasks: bool) -> Self {
        Self {
            injection,
            include_non_distributed_tasks,
        }
    }

    pub fn include_non_distributed_tasks(&self) -> bool {
        self.include_non_distributed_tasks
    }

    /// Copy configured values into the instance
    ///
    /// A missing (or null) required property is left untouched, a missing
    /// optional one is cleared. Array properties take arrays and wrap single
    /// values; scalar properties unwrap one-element arrays, treat empty arrays
    /// as missing and reject longer ones.
    pub fn assign_configured_properties(
        &self,
        descriptor: &ComponentDescriptor,
        instance: &mut dyn Component,
        configuration: &ComponentConfiguration,
    ) -> Result<()> {
        for property in descriptor.configured_properties() {
            let value = match configuration.get(property.name()) {
                None | Some(PropertyValue::Single(Value::Null)) => None,
                Some(value) => normalize(descriptor, property, value)?,
            };

            if value.is_none() && property.is_required() {
                continue;
            }
            if let Some(value) = &value {
                check_types(descriptor, property, value)?;
            }

            property.assign(instance, value).map_err(|e| {
                EngineError::configuration(
                    descriptor.name(),
                    format!("cannot set property '{}': {:#}", property.name(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Inject services for provided properties; unknown services inject `None`
    pub fn assign_provided_properties(
        &self,
        descriptor: &ComponentDescriptor,
        instance: &mut dyn Component,
    ) -> Result<()> {
        for property in descriptor.provided_properties() {
            let service = self.injection.lookup(property.service_type());
            if service.is_none() {
                debug!(
                    component = descriptor.name(),
                    property = property.name(),
                    service = property.service_type_name(),
                    "No service registered for provided property"
                );
            }
            property.inject(instance, service).map_err(|e| {
                EngineError::configuration(
                    descriptor.name(),
                    format!("cannot provide property '{}': {:#}", property.name(), e),
                )
            })?;
        }
        Ok(())
    }

    pub fn validate(&self, descriptor: &ComponentDescriptor, instance: &mut dyn Component) -> Result<()> {
        for method in descriptor.lifecycle_methods(LifecyclePhase::Validate) {
            method
                .invoke(instance)
                .map_err(|e| lifecycle_error(descriptor, LifecyclePhase::Validate, method.name(), e))?;
        }
        Ok(())
    }

    pub fn initialize(
        &self,
        descriptor: &ComponentDescriptor,
        instance: &mut dyn Component,
    ) -> Result<()> {
        for method in descriptor.lifecycle_methods(LifecyclePhase::Initialize) {
            if !self.runs_here(method.is_distributed()) {
                debug!(
                    component = descriptor.name(),
                    method = method.name(),
                    "Skipping non-distributed initialize method"
                );
                continue;
            }
            method.invoke(instance).map_err(|e| {
                lifecycle_error(descriptor, LifecyclePhase::Initialize, method.name(), e)
            })?;
        }
        Ok(())
    }

    /// Run close methods enabled for the outcome
    ///
    /// Failures are logged and do not stop the remaining close methods.
    pub fn close(&self, descriptor: &ComponentDescriptor, instance: &mut dyn Component, success: bool) {
        for method in descriptor.lifecycle_methods(LifecyclePhase::Close) {
            if !self.runs_here(method.is_distributed()) {
                debug!(
                    component = descriptor.name(),
                    method = method.name(),
                    "Skipping non-distributed close method"
                );
                continue;
            }
            if !method.is_enabled_for(success) {
                debug!(
                    component = descriptor.name(),
                    method = method.name(),
                    success,
                    "Close method not enabled for this outcome"
                );
                continue;
            }
            if let Err(e) = method.invoke(instance) {
                warn!(
                    component = descriptor.name(),
                    method = method.name(),
                    error = %format!("{:#}", e),
                    "Close method failed"
                );
            }
        }
    }

    /// Configure, inject, validate and initialize a fresh instance
    pub fn initialize_component(
        &self,
        descriptor: &ComponentDescriptor,
        instance: &mut dyn Component,
        configuration: &ComponentConfiguration,
    ) -> Result<()> {
        self.assign_configured_properties(descriptor, instance, configuration)?;
        self.assign_provided_properties(descriptor, instance)?;
        self.validate(descriptor, instance)?;
        self.initialize(descriptor, instance)
    }

    fn runs_here(&self, distributed: bool) -> bool {
        distributed || self.include_non_distributed_tasks
    }
}

fn normalize(
    descriptor: &ComponentDescriptor,
    property: &ConfiguredPropertyDescriptor,
    value: &PropertyValue,
) -> Result<Option<PropertyValue>> {
    if property.is_array() {
        return Ok(Some(PropertyValue::Array(value.clone().into_values())));
    }
    match value {
        PropertyValue::Single(single) => Ok(Some(PropertyValue::Single(single.clone()))),
        PropertyValue::Array(values) => match values.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(PropertyValue::Single(single.clone()))),
            _ => Err(EngineError::configuration(
                descriptor.name(),
                format!(
                    "property '{}' takes a single value but {} were given",
                    property.name(),
                    values.len()
                ),
            )),
        },
    }
}

fn check_types(
    descriptor: &ComponentDescriptor,
    property: &ConfiguredPropertyDescriptor,
    value: &PropertyValue,
) -> Result<()> {
    match value.values().iter().find(|v| !property.property_type().accepts(v)) {
        Some(wrong) => Err(EngineError::configuration(
            descriptor.name(),
            format!(
                "property '{}' expects {} values, got {}",
                property.name(),
                property.property_type(),
                wrong.type_name()
            ),
        )),
        None => Ok(()),
    }
}

fn lifecycle_error(
    descriptor: &ComponentDescriptor,
    phase: LifecyclePhase,
    method: &str,
    error: anyhow::Error,
) -> EngineError {
    EngineError::Lifecycle {
        component: descriptor.name().to_string(),
        phase,
        message: format!("{}: {:#}", method, error),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::component::Transformer;
    use crate::descriptor::{CloseOptions, ComponentKind, Property};
    use crate::injection::ServiceRegistry;
    use crate::value::InputRow;
    use std::any::Any;

    #[derive(Debug, Default, PartialEq)]
    struct Greeting(String);

    #[derive(Default)]
    struct Probe {
        columns: Option<Vec<String>>,
        limit: Option<i64>,
        greeting: Option<Arc<Greeting>>,
        calls: Vec<&'static str>,
    }

    impl Component for Probe {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn as_transformer(&mut self) -> Option<&mut dyn Transformer> {
            Some(self)
        }
    }

    impl Transformer for Probe {
        fn output_columns(&self) -> Vec<String> {
            vec!["probe".into()]
        }

        fn transform(&mut self, _row: &InputRow) -> anyhow::Result<Vec<Value>> {
            Ok(vec![Value::Null])
        }
    }

    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::builder::<Probe>("probe", ComponentKind::Transformer)
            .configured(Property::input_column("columns").array().required(), |c: &mut Probe, v| {
                c.columns = v.map(PropertyValue::into_strings);
                Ok(())
            })
            .configured(Property::integer("limit"), |c: &mut Probe, v| {
                c.limit = v.and_then(|v| v.as_i64());
                Ok(())
            })
            .provided::<Greeting, _>("greeting", |c: &mut Probe, service| c.greeting = service)
            .validate("check_limit", |c: &mut Probe| {
                c.calls.push("validate");
                match c.limit {
                    Some(limit) if limit < 0 => anyhow::bail!("limit must not be negative"),
                    _ => Ok(()),
                }
            })
            .initialize("open", |c: &mut Probe| {
                c.calls.push("init");
                Ok(())
            })
            .initialize_non_distributed("open_shared", |c: &mut Probe| {
                c.calls.push("init_shared");
                Ok(())
            })
            .close("close", |c: &mut Probe| {
                c.calls.push("close");
                Ok(())
            })
            .close_with(
                "commit",
                CloseOptions {
                    on_failure: false,
                    ..CloseOptions::default()
                },
                |c: &mut Probe| {
                    c.calls.push("commit");
                    Ok(())
                },
            )
            .close_with(
                "release_shared",
                CloseOptions {
                    distributed: false,
                    ..CloseOptions::default()
                },
                |c: &mut Probe| {
                    c.calls.push("release_shared");
                    Ok(())
                },
            )
            .build()
    }

    fn helper(include_non_distributed: bool) -> LifecycleHelper {
        let services = ServiceRegistry::new().with(Arc::new(Greeting("hello".into())));
        LifecycleHelper::new(Arc::new(services), include_non_distributed)
    }

    fn probe(instance: &mut Box<dyn Component>) -> &mut Probe {
        instance.as_any_mut().downcast_mut::<Probe>().unwrap()
    }

    fn config(pairs: &[(&str, PropertyValue)]) -> ComponentConfiguration {
        let mut config = ComponentConfiguration::new();
        for (name, value) in pairs {
            config.set(*name, value.clone());
        }
        config
    }

    #[test]
    fn test_array_property_wraps_single_value() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        let configuration = config(&[("columns", PropertyValue::from("name"))]);
        helper(false)
            .assign_configured_properties(&descriptor, instance.as_mut(), &configuration)
            .unwrap();
        assert_eq!(probe(&mut instance).columns, Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_scalar_property_unwraps_single_element_array() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        let configuration = config(&[("limit", PropertyValue::Array(vec![Value::Integer(3)]))]);
        helper(false)
            .assign_configured_properties(&descriptor, instance.as_mut(), &configuration)
            .unwrap();
        assert_eq!(probe(&mut instance).limit, Some(3));
    }

    #[test]
    fn test_scalar_property_rejects_multiple_values() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        let configuration = config(&[(
            "limit",
            PropertyValue::Array(vec![Value::Integer(1), Value::Integer(2)]),
        )]);
        let err = helper(false)
            .assign_configured_properties(&descriptor, instance.as_mut(), &configuration)
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_type_mismatch_is_configuration_error() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        let configuration = config(&[("limit", PropertyValue::from("ten"))]);
        let err = helper(false)
            .assign_configured_properties(&descriptor, instance.as_mut(), &configuration)
            .unwrap_err();
        assert!(err.to_string().contains("expects integer"));
    }

    #[test]
    fn test_absent_required_untouched_and_absent_optional_cleared() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        probe(&mut instance).columns = Some(vec!["preset".into()]);
        probe(&mut instance).limit = Some(9);

        let configuration = config(&[("limit", PropertyValue::Array(vec![]))]);
        helper(false)
            .assign_configured_properties(&descriptor, instance.as_mut(), &configuration)
            .unwrap();

        assert_eq!(probe(&mut instance).columns, Some(vec!["preset".to_string()]));
        assert_eq!(probe(&mut instance).limit, None);
    }

    #[test]
    fn test_provided_property_injected() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        helper(false).assign_provided_properties(&descriptor, instance.as_mut()).unwrap();
        assert_eq!(probe(&mut instance).greeting.as_deref(), Some(&Greeting("hello".into())));

        let empty = LifecycleHelper::new(Arc::new(ServiceRegistry::new()), false);
        empty.assign_provided_properties(&descriptor, instance.as_mut()).unwrap();
        assert!(probe(&mut instance).greeting.is_none());
    }

    #[test]
    fn test_validation_failure_is_lifecycle_error() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        let configuration = config(&[
            ("columns", PropertyValue::from("a")),
            ("limit", PropertyValue::from(-1_i64)),
        ]);
        let err = helper(true)
            .initialize_component(&descriptor, instance.as_mut(), &configuration)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Lifecycle { phase: LifecyclePhase::Validate, .. }
        ));
        assert_eq!(probe(&mut instance).calls, vec!["validate"]);
    }

    #[test]
    fn test_initialize_respects_distributed_flag() {
        let descriptor = descriptor();

        let mut worker = descriptor.create();
        helper(false).initialize(&descriptor, worker.as_mut()).unwrap();
        assert_eq!(probe(&mut worker).calls, vec!["init"]);

        let mut coordinator = descriptor.create();
        helper(true).initialize(&descriptor, coordinator.as_mut()).unwrap();
        assert_eq!(probe(&mut coordinator).calls, vec!["init", "init_shared"]);
    }

    #[test]
    fn test_close_on_failure_skips_success_only_methods() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        helper(true).close(&descriptor, instance.as_mut(), false);
        assert_eq!(probe(&mut instance).calls, vec!["close", "release_shared"]);
    }

    #[test]
    fn test_close_on_worker_skips_non_distributed_methods() {
        let descriptor = descriptor();
        let mut instance = descriptor.create();
        helper(false).close(&descriptor, instance.as_mut(), true);
        assert_eq!(probe(&mut instance).calls, vec!["close", "commit"]);
    }

    #[test]
    fn test_close_failure_is_swallowed() {
        let descriptor = ComponentDescriptor::builder::<Probe>("probe", ComponentKind::Transformer)
            .close("explode", |_: &mut Probe| anyhow::bail!("disk full"))
            .close("after", |c: &mut Probe| {
                c.calls.push("after");
                Ok(())
            })
            .build();
        let mut instance = descriptor.create();
        helper(true).close(&descriptor, instance.as_mut(), true);
        assert_eq!(probe(&mut instance).calls, vec!["after"]);
    }
}
