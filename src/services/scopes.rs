//! Path → downstream-scope resolution.
//!
//! Responsibility:
//! - Map an inbound request path to the scope set requested in the OBO exchange.
//! - Deterministic and side-effect-free: the table is loaded once at startup.
//!
//! Two modes:
//! - `Prefix`: longest-prefix match over the configured table, falling back to
//!   the default scope set when nothing matches.
//! - `Default`: every path resolves to the default scope set. This reproduces
//!   the legacy gateway, whose resolver ignored its own path-keyed config.
//!   Kept behind an explicit mode so nobody enables it by accident.

use thiserror::Error;

use crate::config::{ScopeMapEntry, ScopeMode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("no scope mapping for path: {path}")]
    Unmapped { path: String },
}

#[derive(Debug)]
pub struct ScopeResolver {
    mode: ScopeMode,
    mappings: Vec<ScopeMapEntry>,
    default_scopes: Vec<String>,
}

impl ScopeResolver {
    /// Config validation (e.g. `Default` mode requires a default scope set)
    /// happens in `Config::from_env`; by the time we get here the inputs are
    /// known-consistent.
    pub fn new(mode: ScopeMode, mappings: Vec<ScopeMapEntry>, default_scopes: Vec<String>) -> Self {
        Self {
            mode,
            mappings,
            default_scopes,
        }
    }

    pub fn resolve(&self, path: &str) -> Result<Vec<String>, ScopeError> {
        match self.mode {
            ScopeMode::Default => {
                if self.default_scopes.is_empty() {
                    return Err(ScopeError::Unmapped {
                        path: path.to_string(),
                    });
                }
                Ok(self.default_scopes.clone())
            }
            ScopeMode::Prefix => {
                // Longest prefix wins so `/api/orders/admin` can override `/api/orders`.
                let best = self
                    .mappings
                    .iter()
                    .filter(|m| path_has_prefix(path, &m.path))
                    .max_by_key(|m| m.path.len());

                if let Some(entry) = best {
                    return Ok(entry.scopes.clone());
                }
                if !self.default_scopes.is_empty() {
                    return Ok(self.default_scopes.clone());
                }
                Err(ScopeError::Unmapped {
                    path: path.to_string(),
                })
            }
        }
    }
}

/// Segment-aware prefix match: `/api/orders` covers `/api/orders` and
/// `/api/orders/123`, but not `/api/ordersextra`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<ScopeMapEntry> {
        vec![
            ScopeMapEntry {
                path: "/api/orders".to_string(),
                scopes: vec!["api://orders/.default".to_string()],
            },
            ScopeMapEntry {
                path: "/api/orders/admin".to_string(),
                scopes: vec!["api://orders/admin".to_string()],
            },
            ScopeMapEntry {
                path: "/api/users".to_string(),
                scopes: vec![
                    "api://users/read".to_string(),
                    "api://users/write".to_string(),
                ],
            },
        ]
    }

    #[test]
    fn prefix_mode_matches_by_prefix() {
        let resolver = ScopeResolver::new(ScopeMode::Prefix, table(), vec![]);

        assert_eq!(
            resolver.resolve("/api/orders/123").unwrap(),
            vec!["api://orders/.default"]
        );
        assert_eq!(
            resolver.resolve("/api/users").unwrap(),
            vec!["api://users/read", "api://users/write"]
        );
    }

    #[test]
    fn prefix_mode_prefers_longest_prefix() {
        let resolver = ScopeResolver::new(ScopeMode::Prefix, table(), vec![]);

        assert_eq!(
            resolver.resolve("/api/orders/admin/reindex").unwrap(),
            vec!["api://orders/admin"]
        );
    }

    #[test]
    fn prefix_match_is_segment_aware() {
        let resolver = ScopeResolver::new(ScopeMode::Prefix, table(), vec![]);

        // `/api/ordersextra` must not match the `/api/orders` entry.
        assert_eq!(
            resolver.resolve("/api/ordersextra"),
            Err(ScopeError::Unmapped {
                path: "/api/ordersextra".to_string()
            })
        );
    }

    #[test]
    fn prefix_mode_falls_back_to_default_scopes() {
        let resolver = ScopeResolver::new(
            ScopeMode::Prefix,
            table(),
            vec!["api://fallback/.default".to_string()],
        );

        assert_eq!(
            resolver.resolve("/api/unknown").unwrap(),
            vec!["api://fallback/.default"]
        );
    }

    #[test]
    fn prefix_mode_unmapped_without_default() {
        let resolver = ScopeResolver::new(ScopeMode::Prefix, table(), vec![]);

        assert_eq!(
            resolver.resolve("/api/unknown"),
            Err(ScopeError::Unmapped {
                path: "/api/unknown".to_string()
            })
        );
    }

    #[test]
    fn default_mode_ignores_path() {
        let resolver = ScopeResolver::new(
            ScopeMode::Default,
            table(),
            vec!["api://legacy/.default".to_string()],
        );

        // Same answer for mapped and unmapped paths.
        assert_eq!(
            resolver.resolve("/api/orders").unwrap(),
            vec!["api://legacy/.default"]
        );
        assert_eq!(
            resolver.resolve("/anything/else").unwrap(),
            vec!["api://legacy/.default"]
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = ScopeResolver::new(ScopeMode::Prefix, table(), vec![]);

        let first = resolver.resolve("/api/users/42").unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve("/api/users/42").unwrap(), first);
        }
    }
}
