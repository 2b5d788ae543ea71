//! # Circuit Breaker Manager
//!
//! One breaker per named dependency, created lazily on first use. Component
//! names with an explicit configuration get it; everything else gets the
//! default.

use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, SystemCircuitBreakerMetrics,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for the circuit breakers protecting each dependency
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    component_configs: HashMap<String, CircuitBreakerConfig>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_component_configs(default_config, HashMap::new())
    }

    pub fn with_component_configs(
        default_config: CircuitBreakerConfig,
        component_configs: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        info!(
            components_configured = component_configs.len(),
            "Initializing circuit breaker manager"
        );
        Self {
            circuit_breakers: DashMap::new(),
            default_config,
            component_configs,
        }
    }

    /// Configuration a breaker for `component_name` is (or would be) built with
    pub fn config_for_component(&self, component_name: &str) -> &CircuitBreakerConfig {
        self.component_configs
            .get(component_name)
            .unwrap_or(&self.default_config)
    }

    /// Get or create circuit breaker for a component
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            return Arc::clone(breaker.value());
        }

        let config = self.config_for_component(component_name).clone();
        let breaker = self
            .circuit_breakers
            .entry(component_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(component_name, config)))
            .value()
            .clone();

        info!(
            component = component_name,
            total_circuit_breakers = self.circuit_breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Existing breaker only; does not create one
    pub fn existing(&self, component_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers
            .get(component_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Get all circuit breaker names
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .get(component_name)
            .map(|entry| entry.value().metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    pub fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        let removed = self.circuit_breakers.remove(component_name).is_some();
        if removed {
            info!(
                component = component_name,
                remaining_count = self.circuit_breakers.len(),
                "Removed circuit breaker"
            );
        }
        removed
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
