// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Warden — Core types, error definitions, and configuration shared across
// the security crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::SecurityConfig;
pub use error::WardenError;
pub use types::*;
