// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the wsvol CLI

pub mod config;
pub mod volumes;

pub use self::config::ConfigCommand;
pub use self::volumes::{CleanupArgs, PrepareArgs, ProvisionArgs};
