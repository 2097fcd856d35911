//! Utility functions for EVM interaction and analysis
//!
//! This module provides various utility functions for:
//! - Revert-reason parsing (`Error(string)` / `Panic(uint256)`)
//! - Minimal-proxy (EIP-1167) detection and target extraction
//! - Blueprint (ERC-5202) container parsing and CREATE2 address derivation

/// Revert payload parsing utilities
pub mod error_utils;

/// Minimal proxy (EIP-1167) analysis utilities
pub mod proxy_utils;

/// Blueprint (ERC-5202) container utilities
pub mod blueprint_utils;
