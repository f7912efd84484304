// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor};

/// Sequential container that mirrors `nn.Sequential`.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl core::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sequential(num_layers={})", self.layers.len())
    }
}

impl Sequential {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a layer.
    pub fn push<M>(&mut self, layer: M)
    where
        M: Module + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    /// Builder-style variant of [`Sequential::push`].
    pub fn with<M>(mut self, layer: M) -> Self
    where
        M: Module + 'static,
    {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs every layer and returns the input of each one followed by the
    /// final output, so `trace.len() == self.len() + 1`.
    pub fn forward_trace(&self, input: &Tensor) -> PureResult<Vec<Tensor>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(input.clone());
        for layer in &self.layers {
            let next = match trace.last() {
                Some(current) => layer.forward(current)?,
                None => layer.forward(input)?,
            };
            trace.push(next);
        }
        Ok(trace)
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.forward(&activ)?;
        }
        Ok(activ)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.forward_trace(input)?;
        let mut grad = grad_output.clone();
        for (layer, layer_input) in self.layers.iter_mut().zip(trace.iter()).rev() {
            grad = layer.backward(layer_input, &grad)?;
        }
        Ok(grad)
    }
}

impl Parameterized for Sequential {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Conv2d, Relu};

    #[test]
    fn backward_reaches_every_layer() {
        let mut seq = Sequential::new()
            .with(Conv2d::same3x3("a", 1, 2, (3, 3)).unwrap())
            .with(Relu::new())
            .with(Conv2d::pointwise("b", 2, 1, (3, 3)).unwrap());
        assert_eq!(seq.len(), 3);

        let input = Tensor::random_normal(1, 9, 0.0, 1.0, Some(1)).unwrap();
        let trace = seq.forward_trace(&input).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[3], seq.forward(&input).unwrap());

        let grad = Tensor::from_vec(1, 9, vec![1.0; 9]).unwrap();
        let grad_input = seq.backward(&input, &grad).unwrap();
        assert_eq!(grad_input.shape(), input.shape());
        let mut with_grad = 0;
        seq.visit_parameters(&mut |param| {
            if param.gradient().is_some() {
                with_grad += 1;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(with_grad, 4);
    }
}
