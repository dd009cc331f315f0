//! Identity computes deterministic UUIDs for modules and releases.
//!
//! The same inputs always yield the same UUID, across invocations and
//! processes, so a release resolves to one identity for its whole life.

use uuid::Uuid;

/// Module_uuid derives the UUID for a module FQN.
pub fn module_uuid(fqn: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, fqn.as_bytes())
}

/// Release_uuid derives the UUID for a release of the module named by `fqn`.
///
/// The namespace UUID is the module UUID, so two modules with different FQNs
/// can both carry a release ("web", "default") without colliding.
pub fn release_uuid(fqn: &str, release_name: &str, namespace: &str) -> Uuid {
    let ns = module_uuid(fqn);
    let name = format!("release:{release_name}:{namespace}");
    Uuid::new_v5(&ns, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let a = release_uuid("opmodel.dev/modules/app", "my-app", "default");
        let b = release_uuid("opmodel.dev/modules/app", "my-app", "default");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_per_namespace() {
        let a = release_uuid("opmodel.dev/modules/app", "my-app", "default");
        let b = release_uuid("opmodel.dev/modules/app", "my-app", "prod");
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_per_module() {
        let a = release_uuid("opmodel.dev/modules/app", "x", "default");
        let b = release_uuid("opmodel.dev/modules/db", "x", "default");
        assert_ne!(a, b);
    }
}
