//! Deterministic naming of graph nodes, stores and internal topics.
//!
//! Every node in a topology has a name that is unique within its builder.
//! Callers may supply one explicitly; otherwise a name is generated from an
//! operation prefix and a builder-scoped counter, e.g. `KSTREAM-FILTER-0000000003`.

use crate::error::{Result, StreamsError};
use std::collections::HashSet;

/// Prefix for source nodes.
pub const SOURCE_NAME: &str = "KSTREAM-SOURCE-";
/// Prefix for sink nodes.
pub const SINK_NAME: &str = "KSTREAM-SINK-";
/// Prefix for filter nodes.
pub const FILTER_NAME: &str = "KSTREAM-FILTER-";
/// Prefix for map nodes.
pub const MAP_NAME: &str = "KSTREAM-MAP-";
/// Prefix for map-values nodes.
pub const MAPVALUES_NAME: &str = "KSTREAM-MAPVALUES-";
/// Prefix for flat-map nodes.
pub const FLATMAP_NAME: &str = "KSTREAM-FLATMAP-";
/// Prefix for flat-map-values nodes.
pub const FLATMAPVALUES_NAME: &str = "KSTREAM-FLATMAPVALUES-";
/// Prefix for select-key nodes.
pub const KEY_SELECT_NAME: &str = "KSTREAM-KEY-SELECT-";
/// Prefix for branch nodes.
pub const BRANCH_NAME: &str = "KSTREAM-BRANCH-";
/// Prefix for peek nodes.
pub const PEEK_NAME: &str = "KSTREAM-PEEK-";
/// Prefix for print nodes.
pub const PRINTER_NAME: &str = "KSTREAM-PRINTER-";
/// Prefix for foreach nodes.
pub const FOREACH_NAME: &str = "KSTREAM-FOREACH-";
/// Prefix for aggregation nodes.
pub const AGGREGATE_NAME: &str = "KSTREAM-AGGREGATE-";
/// Prefix for reduce nodes.
pub const REDUCE_NAME: &str = "KSTREAM-REDUCE-";
/// Prefix for table-to-stream nodes.
pub const TOSTREAM_NAME: &str = "KTABLE-TOSTREAM-";
/// Prefix for generated state store names.
pub const STORE_NAME: &str = "KSTREAM-STATE-STORE-";

/// Suffix template for branch children: `<branch>-predicate-<i>`.
pub fn branch_child_name(branch: &str, index: usize) -> String {
  format!("{}-predicate-{}", branch, index)
}

/// Builder-scoped registry of used names plus the generation counter.
#[derive(Debug, Default, Clone)]
pub struct NameRegistry {
  index: u64,
  used: HashSet<String>,
}

impl NameRegistry {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolves a node name.
  ///
  /// An explicit name is validated (non-empty, not yet used) and returned
  /// unchanged. Without one, `prefix` plus the next counter value is returned;
  /// generated names skip any value a caller has already claimed explicitly.
  pub fn resolve(&mut self, explicit: Option<&str>, prefix: &str) -> Result<String> {
    match explicit {
      Some(name) => {
        self.claim(name)?;
        Ok(name.to_string())
      }
      None => {
        let candidate = self.next_free(prefix);
        self.used.insert(candidate.clone());
        Ok(candidate)
      }
    }
  }

  /// Resolves a node name together with the names `derive` builds from it.
  ///
  /// Either every name is registered or, on any empty or taken name, none is.
  pub fn resolve_with<F>(
    &mut self,
    explicit: Option<&str>,
    prefix: &str,
    derive: F,
  ) -> Result<(String, Vec<String>)>
  where
    F: FnOnce(&str) -> Vec<String>,
  {
    let name = match explicit {
      Some(name) => name.to_string(),
      None => self.next_free(prefix),
    };
    let derived = derive(&name);
    let mut batch = HashSet::with_capacity(derived.len() + 1);
    for candidate in std::iter::once(&name).chain(&derived) {
      if candidate.is_empty() {
        return Err(StreamsError::invalid_argument(
          "named",
          "name must not be empty",
        ));
      }
      if self.used.contains(candidate) || !batch.insert(candidate.as_str()) {
        return Err(StreamsError::DuplicateName(candidate.clone()));
      }
    }
    self.used.insert(name.clone());
    self.used.extend(derived.iter().cloned());
    Ok((name, derived))
  }

  fn next_free(&mut self, prefix: &str) -> String {
    loop {
      let candidate = format!("{}{:010}", prefix, self.index);
      self.index += 1;
      if !self.used.contains(&candidate) {
        return candidate;
      }
    }
  }

  /// Registers an exact name, failing if it is empty or already taken.
  pub fn claim(&mut self, name: &str) -> Result<()> {
    if name.is_empty() {
      return Err(StreamsError::invalid_argument(
        "named",
        "name must not be empty",
      ));
    }
    if !self.used.insert(name.to_string()) {
      return Err(StreamsError::DuplicateName(name.to_string()));
    }
    Ok(())
  }

  /// Returns true if the name is registered.
  pub fn contains(&self, name: &str) -> bool {
    self.used.contains(name)
  }

  /// Number of registered names.
  pub fn len(&self) -> usize {
    self.used.len()
  }

  /// True when no name has been registered.
  pub fn is_empty(&self) -> bool {
    self.used.is_empty()
  }
}
