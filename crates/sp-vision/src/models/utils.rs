// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sp_tensor::{PureResult, Tensor};
use tracing::warn;

/// Side length of the square pixel cell summarised by one output location.
pub const CELL_SIZE: usize = 8;

/// Cell grid produced for an input resolution, flooring partial cells.
pub fn cell_grid(input_hw: (usize, usize)) -> (usize, usize) {
    (input_hw.0 / CELL_SIZE, input_hw.1 / CELL_SIZE)
}

pub(crate) fn warn_if_unaligned(input_hw: (usize, usize)) {
    if input_hw.0 % CELL_SIZE != 0 || input_hw.1 % CELL_SIZE != 0 {
        warn!(
            height = input_hw.0,
            width = input_hw.1,
            cell = CELL_SIZE,
            "input resolution is not a multiple of the cell size; trailing rows and columns are dropped"
        );
    }
}

/// Zero tensor used in place of an output gradient the caller did not supply.
pub(crate) fn grad_or_zeros(grad: Option<&Tensor>, shape: (usize, usize)) -> PureResult<Tensor> {
    match grad {
        Some(grad) => Ok(grad.clone()),
        None => Tensor::zeros(shape.0, shape.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_grid_floors_partial_cells() {
        assert_eq!(cell_grid((240, 320)), (30, 40));
        assert_eq!(cell_grid((60, 81)), (7, 10));
    }

    #[test]
    fn missing_gradients_become_zeros() {
        let zeros = grad_or_zeros(None, (2, 3)).unwrap();
        assert_eq!(zeros.shape(), (2, 3));
        assert!(zeros.data().iter().all(|v| *v == 0.0));
    }
}
