// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Component factory registry and discovery.
//!
//! This module provides the factory pattern for creating components:
//! - [`ComponentRegistry`]: Central registry of every component name and the roles it supports
//! - [`ComponentDefinition`]: Serializable component metadata

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{PortKitError, Result};
use crate::processor::ComponentParts;
use crate::types::{Direction, Domain};

/// Creates the ports and processor of one component for a given role,
/// accepting optional JSON configuration.
pub type ComponentFactory =
    Arc<dyn Fn(&str, Option<&serde_json::Value>) -> Result<ComponentParts> + Send + Sync>;

/// Port layout entry exposed in a [`ComponentDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortSummary {
    pub index: u32,
    #[schemars(with = "String")]
    pub direction: Direction,
    #[schemars(with = "String")]
    pub domain: Domain,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComponentDefinition {
    pub name: String,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub param_schema: serde_json::Value,
    /// Port layout of the first role, obtained from a default instance.
    pub ports: Vec<PortSummary>,
}

#[derive(Clone)]
struct ComponentInfo {
    factory: ComponentFactory,
    roles: Vec<String>,
    param_schema: serde_json::Value,
    description: Option<String>,
}

/// The ComponentRegistry holds every component type the graph can construct.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    info: HashMap<String, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component under `name` supporting the given roles.
    pub fn register<F>(
        &mut self,
        name: &str,
        roles: &[&str],
        factory: F,
        param_schema: serde_json::Value,
        description: impl Into<String>,
    ) where
        F: Fn(&str, Option<&serde_json::Value>) -> Result<ComponentParts> + Send + Sync + 'static,
    {
        self.info.insert(
            name.to_string(),
            ComponentInfo {
                factory: Arc::new(factory),
                roles: roles.iter().map(ToString::to_string).collect(),
                param_schema,
                description: Some(description.into()),
            },
        );
    }

    /// Creates a component by name and role.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientResources` if `name` is not registered, `BadParameter`
    /// if the role is not supported, or whatever the factory returns.
    pub fn create(
        &self,
        name: &str,
        role: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<ComponentParts> {
        let info = self.info.get(name).ok_or_else(|| {
            PortKitError::InsufficientResources(format!("Component '{name}' not found in registry"))
        })?;
        if !info.roles.iter().any(|r| r == role) {
            return Err(PortKitError::BadParameter(format!(
                "Component '{name}' does not support role '{role}'"
            )));
        }
        (info.factory)(role, params)
    }

    /// Returns the definitions of every registered component.
    pub fn definitions(&self) -> Vec<ComponentDefinition> {
        let mut defs = Vec::new();
        for (name, info) in &self.info {
            let Some(role) = info.roles.first() else {
                continue;
            };
            let ports = match (info.factory)(role, None) {
                Ok(parts) => parts
                    .ports
                    .iter()
                    .map(|p| {
                        let def = p.definition();
                        PortSummary {
                            index: def.index,
                            direction: def.direction,
                            domain: def.domain(),
                        }
                    })
                    .collect(),
                Err(e) => {
                    tracing::error!(
                        component = %name,
                        error = %e,
                        "Failed to create temporary instance for component definition"
                    );
                    continue;
                },
            };
            defs.push(ComponentDefinition {
                name: name.clone(),
                roles: info.roles.clone(),
                description: info.description.clone(),
                param_schema: info.param_schema.clone(),
                ports,
            });
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Components supporting `role`, in name order.
    pub fn components_for_role(&self, role: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .info
            .iter()
            .filter(|(_, info)| info.roles.iter().any(|r| r == role))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.info.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.info.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::port::{AudioPort, Port};
    use crate::processor::Processor;
    use crate::types::AudioCoding;

    struct Idle;

    impl Processor for Idle {
        fn allocate_resources(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn deallocate_resources(&mut self) -> Result<()> {
            Ok(())
        }
        fn prepare_to_transfer(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn transfer_and_process(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn stop_and_return(&mut self, _k: &mut dyn Kernel) -> Result<()> {
            Ok(())
        }
        fn buffers_ready(&mut self, _k: &mut dyn Kernel) -> Result<()> {
            Ok(())
        }
        fn port_flush(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn port_disable(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
        fn port_enable(&mut self, _k: &mut dyn Kernel, _pid: u32) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(
            "test.sink",
            &["audio_renderer.pcm"],
            |role, _| {
                let ports: Vec<Box<dyn Port>> =
                    vec![Box::new(AudioPort::generic(0, Direction::Input, 1024, AudioCoding::Pcm))];
                Ok(ComponentParts::new(role, ports, Box::new(Idle)))
            },
            serde_json::json!({}),
            "Test sink",
        );
        registry
    }

    #[test]
    fn test_create_checks_role() {
        let registry = registry();
        let parts = registry.create("test.sink", "audio_renderer.pcm", None).unwrap();
        assert_eq!(parts.role, "audio_renderer.pcm");
        assert!(matches!(
            registry.create("test.sink", "audio_decoder.mp3", None),
            Err(PortKitError::BadParameter(_))
        ));
        assert!(matches!(
            registry.create("missing", "audio_renderer.pcm", None),
            Err(PortKitError::InsufficientResources(_))
        ));
    }

    #[test]
    fn test_definitions_describe_ports() {
        let registry = registry();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(
            defs[0].ports,
            vec![PortSummary { index: 0, direction: Direction::Input, domain: Domain::Audio }]
        );
        assert_eq!(
            registry.components_for_role("audio_renderer.pcm"),
            vec!["test.sink".to_string()]
        );
    }
}
