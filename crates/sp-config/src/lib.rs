// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide configuration shared by the SpiralPoint crates.
//!
//! Two concerns live here: deterministic seeding of weight initialisers and
//! the optional reduction-order lock ([`determinism`]), and the global tracing
//! subscriber set-up ([`tracing`]).

pub mod determinism;
pub mod tracing;
