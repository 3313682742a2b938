// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// Options threaded through every compiler phase.
///
/// The value is immutable for the duration of a compilation; the resolver,
/// analyzer and emitter all read the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Treat the whole unit as strict mode code.
    pub strict: bool,
    /// Skip `ThrowIfTDZ` when initialization provably precedes an access.
    pub elide_tdz_checks: bool,
    /// Compile `super.name` reads to a single `GetSuperById`.
    pub fast_super_property_access: bool,
    /// Allow free identifiers to resolve to global lookups. When false,
    /// every reference must resolve to a declared binding.
    pub allow_global_references: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            strict: false,
            elide_tdz_checks: true,
            fast_super_property_access: true,
            allow_global_references: true,
        }
    }
}

impl CompilerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Enables or disables TDZ check elision.
    pub fn with_tdz_elision(mut self, enabled: bool) -> Self {
        self.elide_tdz_checks = enabled;
        self
    }

    /// Enables or disables the single-instruction `super.name` read.
    pub fn with_fast_super_property_access(mut self, enabled: bool) -> Self {
        self.fast_super_property_access = enabled;
        self
    }

    /// Allows or forbids free (global) identifier references.
    pub fn with_global_references(mut self, allowed: bool) -> Self {
        self.allow_global_references = allowed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_optimizations() {
        let config = CompilerConfig::default();
        assert!(!config.strict);
        assert!(config.elide_tdz_checks);
        assert!(config.fast_super_property_access);
        assert!(config.allow_global_references);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: CompilerConfig = serde_json::from_str(r#"{ "strict": true }"#).unwrap();
        assert!(config.strict);
        assert!(config.elide_tdz_checks);
    }
}
