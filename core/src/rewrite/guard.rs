use crate::internal::*;

/// The predicate deciding whether a rewrite entry applies under a given
/// deployment configuration.
///
/// A guard is a closed conjunction of optional constraints; an empty guard
/// is the catch-all. Keeping the predicate a plain struct (rather than an
/// opaque closure) makes its specificity computable, which the registry uses
/// to rank competing entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guard {
    pub backend: Option<Backend>,
    pub min_opset: Option<i64>,
    /// Constrains whether the primary input's batch axis is dynamic.
    pub dynamic_batch: Option<bool>,
    /// Custom overrides that must be present with exactly these values.
    pub custom: Vec<(String, String)>,
}

impl Guard {
    /// The catch-all guard: applies to every configuration.
    pub fn any() -> Guard {
        Guard::default()
    }

    pub fn for_backend(backend: Backend) -> Guard {
        Guard { backend: Some(backend), ..Guard::default() }
    }

    pub fn with_min_opset(mut self, opset: i64) -> Guard {
        self.min_opset = Some(opset);
        self
    }

    pub fn with_dynamic_batch(mut self, dynamic: bool) -> Guard {
        self.dynamic_batch = Some(dynamic);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Guard {
        self.custom.push((key.into(), value.into()));
        self
    }

    /// Pure over the configuration: no other state is consulted.
    pub fn matches(&self, config: &DeployConfig) -> bool {
        if self.backend.is_some_and(|b| b != config.backend) {
            return false;
        }
        if self.min_opset.is_some_and(|v| config.opset_version < v) {
            return false;
        }
        if self
            .dynamic_batch
            .is_some_and(|d| config.is_dynamic_batch(config.primary_input()) != d)
        {
            return false;
        }
        self.custom.iter().all(|(k, v)| config.custom_value(k) == Some(v.as_str()))
    }

    /// How many constraints the guard carries. A narrower guard outranks a
    /// broader one when entries compete for the same qualified name.
    pub fn specificity(&self) -> usize {
        self.backend.is_some() as usize
            + self.min_opset.is_some() as usize
            + self.dynamic_batch.is_some() as usize
            + self.custom.len()
    }
}
