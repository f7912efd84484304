// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.

//! Pluggable operator registry.
//!
//! An operator pairs a forward function with an optional, independently
//! supplied gradient function. The registry never derives gradients from the
//! forward body, which is what lets operators such as the straight-through
//! sign quantizer declare a backward rule unrelated to their forward math.

use crate::PureResult;
use sp_tensor::{Tensor, TensorError};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// Signature describing an operator's inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperatorSignature {
    /// Operator name
    pub name: String,
    /// Number of input tensors
    pub num_inputs: usize,
    /// Number of output tensors
    pub num_outputs: usize,
    /// Whether operator supports gradient computation
    pub differentiable: bool,
}

/// Metadata for a registered operator.
#[derive(Debug, Clone)]
pub struct OperatorMetadata {
    /// Operator signature
    pub signature: OperatorSignature,
    /// Human-readable description
    pub description: String,
    /// Supported backends
    pub backends: Vec<String>,
    /// Custom attributes
    pub attributes: HashMap<String, String>,
}

/// Type alias for operator execution function.
pub type OperatorFn = Arc<dyn Fn(&[&Tensor]) -> PureResult<Vec<Tensor>> + Send + Sync>;

/// Type alias for gradient computation function: `(inputs, outputs, grad_outputs)`.
pub type GradientFn =
    Arc<dyn Fn(&[&Tensor], &[&Tensor], &[&Tensor]) -> PureResult<Vec<Tensor>> + Send + Sync>;

/// A registered operator with its implementation.
pub struct RegisteredOperator {
    metadata: OperatorMetadata,
    forward_fn: OperatorFn,
    backward_fn: Option<GradientFn>,
}

impl core::fmt::Debug for RegisteredOperator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "RegisteredOperator(name={},inputs={},outputs={},differentiable={})",
            self.metadata.signature.name,
            self.metadata.signature.num_inputs,
            self.metadata.signature.num_outputs,
            self.backward_fn.is_some()
        )
    }
}

impl RegisteredOperator {
    /// Create a new registered operator.
    pub fn new(
        metadata: OperatorMetadata,
        forward_fn: OperatorFn,
        backward_fn: Option<GradientFn>,
    ) -> Self {
        Self {
            metadata,
            forward_fn,
            backward_fn,
        }
    }

    /// Execute the operator.
    pub fn execute(&self, inputs: &[&Tensor]) -> PureResult<Vec<Tensor>> {
        let signature = &self.metadata.signature;
        if inputs.len() != signature.num_inputs {
            return Err(TensorError::Generic(format!(
                "operator '{}' expects {} inputs, got {}",
                signature.name,
                signature.num_inputs,
                inputs.len()
            )));
        }
        let outputs = (self.forward_fn)(inputs)?;
        if outputs.len() != signature.num_outputs {
            return Err(TensorError::Generic(format!(
                "operator '{}' declared {} outputs but produced {}",
                signature.name,
                signature.num_outputs,
                outputs.len()
            )));
        }
        Ok(outputs)
    }

    /// Compute gradients with respect to every input.
    pub fn backward(
        &self,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        grad_outputs: &[&Tensor],
    ) -> PureResult<Vec<Tensor>> {
        let signature = &self.metadata.signature;
        if grad_outputs.len() != signature.num_outputs {
            return Err(TensorError::Generic(format!(
                "operator '{}' expects {} output gradients, got {}",
                signature.name,
                signature.num_outputs,
                grad_outputs.len()
            )));
        }
        match &self.backward_fn {
            Some(backward_fn) => backward_fn(inputs, outputs, grad_outputs),
            None => Err(TensorError::Generic(format!(
                "operator '{}' does not support gradient computation",
                signature.name
            ))),
        }
    }

    /// Get operator metadata.
    pub fn metadata(&self) -> &OperatorMetadata {
        &self.metadata
    }

    /// Operator name as registered.
    pub fn name(&self) -> &str {
        &self.metadata.signature.name
    }
}

/// Registry for custom operators.
pub struct OperatorRegistry {
    operators: RwLock<HashMap<String, Arc<RegisteredOperator>>>,
}

impl OperatorRegistry {
    /// Create a new operator registry.
    pub fn new() -> Self {
        Self {
            operators: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new operator. Names are unique.
    pub fn register(&self, operator: RegisteredOperator) -> PureResult<Arc<RegisteredOperator>> {
        let name = operator.metadata.signature.name.clone();
        let mut operators = self
            .operators
            .write()
            .map_err(|_| TensorError::Generic("operator registry lock poisoned".to_string()))?;

        if operators.contains_key(&name) {
            return Err(TensorError::Generic(format!(
                "operator '{name}' is already registered"
            )));
        }

        let operator = Arc::new(operator);
        operators.insert(name.clone(), Arc::clone(&operator));
        debug!(operator = %name, "registered operator");
        Ok(operator)
    }

    /// Get a registered operator by name.
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredOperator>> {
        self.operators.read().ok()?.get(name).cloned()
    }

    /// List all registered operators.
    pub fn list_operators(&self) -> Vec<String> {
        self.operators
            .read()
            .map(|operators| operators.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Execute an operator by name.
    pub fn execute(&self, name: &str, inputs: &[&Tensor]) -> PureResult<Vec<Tensor>> {
        self.lookup(name)?.execute(inputs)
    }

    /// Run the gradient rule of an operator by name.
    pub fn backward(
        &self,
        name: &str,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        grad_outputs: &[&Tensor],
    ) -> PureResult<Vec<Tensor>> {
        self.lookup(name)?.backward(inputs, outputs, grad_outputs)
    }

    fn lookup(&self, name: &str) -> PureResult<Arc<RegisteredOperator>> {
        self.get(name)
            .ok_or_else(|| TensorError::Generic(format!("operator '{name}' not found")))
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating registered operators.
pub struct OperatorBuilder {
    signature: OperatorSignature,
    description: String,
    backends: Vec<String>,
    attributes: HashMap<String, String>,
    forward_fn: Option<OperatorFn>,
    backward_fn: Option<GradientFn>,
}

impl OperatorBuilder {
    /// Create a new operator builder.
    pub fn new(name: impl Into<String>, num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            signature: OperatorSignature {
                name: name.into(),
                num_inputs,
                num_outputs,
                differentiable: false,
            },
            description: String::new(),
            backends: Vec::new(),
            attributes: HashMap::new(),
            forward_fn: None,
            backward_fn: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Add a supported backend.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backends.push(backend.into());
        self
    }

    /// Add a custom attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the forward function.
    pub fn with_forward(mut self, forward_fn: OperatorFn) -> Self {
        self.forward_fn = Some(forward_fn);
        self
    }

    /// Set the backward function.
    pub fn with_backward(mut self, backward_fn: GradientFn) -> Self {
        self.backward_fn = Some(backward_fn);
        self.signature.differentiable = true;
        self
    }

    /// Build the registered operator.
    pub fn build(self) -> PureResult<RegisteredOperator> {
        let forward_fn = self
            .forward_fn
            .ok_or_else(|| TensorError::Generic("forward function is required".to_string()))?;

        let metadata = OperatorMetadata {
            signature: self.signature,
            description: self.description,
            backends: self.backends,
            attributes: self.attributes,
        };

        Ok(RegisteredOperator::new(metadata, forward_fn, self.backward_fn))
    }
}

static GLOBAL_OPERATOR_REGISTRY: OnceLock<OperatorRegistry> = OnceLock::new();

/// Get the global operator registry.
pub fn global_operator_registry() -> &'static OperatorRegistry {
    GLOBAL_OPERATOR_REGISTRY.get_or_init(OperatorRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> OperatorFn {
        Arc::new(|inputs| Ok(vec![inputs[0].clone()]))
    }

    #[test]
    fn registration_rejects_duplicates() {
        let registry = OperatorRegistry::new();
        let op = OperatorBuilder::new("identity", 1, 1)
            .with_description("copies its input")
            .with_backend("CPU")
            .with_forward(identity())
            .build()
            .unwrap();
        registry.register(op).unwrap();
        assert!(registry.get("identity").is_some());
        assert_eq!(registry.list_operators(), vec!["identity".to_string()]);

        let dup = OperatorBuilder::new("identity", 1, 1)
            .with_forward(identity())
            .build()
            .unwrap();
        assert!(registry.register(dup).is_err());
    }

    #[test]
    fn execute_validates_arity() {
        let registry = OperatorRegistry::new();
        let op = OperatorBuilder::new("identity", 1, 1)
            .with_forward(identity())
            .build()
            .unwrap();
        registry.register(op).unwrap();
        let a = Tensor::zeros(1, 2).unwrap();
        assert!(registry.execute("identity", &[&a, &a]).is_err());
        assert!(registry.execute("missing", &[&a]).is_err());
        assert_eq!(registry.execute("identity", &[&a]).unwrap()[0], a);
    }

    #[test]
    fn backward_requires_gradient_rule() {
        let registry = OperatorRegistry::new();
        let op = OperatorBuilder::new("no_grad", 1, 1)
            .with_forward(identity())
            .build()
            .unwrap();
        assert!(!op.metadata().signature.differentiable);
        registry.register(op).unwrap();
        let a = Tensor::zeros(1, 2).unwrap();
        assert!(registry.backward("no_grad", &[&a], &[&a], &[&a]).is_err());
    }

    #[test]
    fn custom_gradient_rule_is_decoupled_from_forward() {
        let registry = OperatorRegistry::new();
        let op = OperatorBuilder::new("square_with_unit_grad", 1, 1)
            .with_forward(Arc::new(|inputs| Ok(vec![inputs[0].hadamard(inputs[0])?])))
            .with_backward(Arc::new(|_inputs, _outputs, grads| Ok(vec![grads[0].clone()])))
            .build()
            .unwrap();
        assert!(op.metadata().signature.differentiable);
        registry.register(op).unwrap();
        let x = Tensor::from_vec(1, 2, vec![3.0, -2.0]).unwrap();
        let y = registry.execute("square_with_unit_grad", &[&x]).unwrap();
        assert_eq!(y[0].data(), &[9.0, 4.0]);
        let g = Tensor::from_vec(1, 2, vec![0.5, 0.25]).unwrap();
        let dx = registry
            .backward("square_with_unit_grad", &[&x], &[&y[0]], &[&g])
            .unwrap();
        assert_eq!(dx[0], g);
    }
}
