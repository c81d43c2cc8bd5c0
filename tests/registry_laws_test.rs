/// Property-based tests for the cross-restart registry
///
/// Random sequences of register/unregister calls are checked against a
/// plain map model:
/// - `lookup` returns exactly what was last registered under an equal key
/// - `lookup_others` never returns the exact key's services
/// - unregistering twice is the same as unregistering once
use dev_services::registry::{AppIdentity, LaunchMode, Registry, ServiceConfig};
use dev_services::service::{DevService, RunningService};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const FEATURES: [&str; 2] = ["redis", "postgres"];
const IMAGES: [&str; 3] = ["a:1", "b:1", "c:1"];

#[derive(Debug, Clone)]
enum Operation {
    /// Register service `n` under key `k`.
    Register(usize, usize),
    /// Unregister service `n` from key `k`.
    Unregister(usize, usize),
}

/// Keys are rebuilt from scratch each time so equality is by value only.
fn key(index: usize) -> ServiceConfig {
    let feature = FEATURES[index % FEATURES.len()];
    let image = IMAGES[(index / FEATURES.len()) % IMAGES.len()];
    ServiceConfig::new(
        AppIdentity::new(feature, LaunchMode::Development),
        BTreeMap::from([("image".to_string(), image.to_string())]),
    )
}

fn key_count() -> usize {
    FEATURES.len() * IMAGES.len()
}

fn operation_strategy(services: usize) -> impl Strategy<Value = Operation> {
    prop_oneof![
        (0..key_count(), 0..services).prop_map(|(k, n)| Operation::Register(k, n)),
        (0..key_count(), 0..services).prop_map(|(k, n)| Operation::Unregister(k, n)),
    ]
}

fn services(count: usize) -> Vec<Arc<dyn DevService>> {
    (0..count)
        .map(|n| {
            Arc::new(RunningService::discovered(
                format!("service-{}", n),
                None,
                BTreeMap::new(),
            )) as Arc<dyn DevService>
        })
        .collect()
}

proptest! {
    #[test]
    fn lookup_matches_model(ops in prop::collection::vec(operation_strategy(4), 1..40)) {
        let registry = Registry::new();
        let services = services(4);
        // key index -> registered service index
        let mut model: HashMap<usize, Vec<usize>> = HashMap::new();

        for op in &ops {
            match *op {
                Operation::Register(k, n) => {
                    registry.register(key(k), Arc::clone(&services[n]));
                    model.insert(k, vec![n]);
                }
                Operation::Unregister(k, n) => {
                    let expected = model.get(&k).is_some_and(|list| list.contains(&n));
                    let removed = registry.unregister(&key(k), services[n].as_ref());
                    prop_assert_eq!(removed, expected);
                    if let Some(list) = model.get_mut(&k) {
                        list.retain(|s| *s != n);
                        if list.is_empty() {
                            model.remove(&k);
                        }
                    }
                }
            }

            for k in 0..key_count() {
                let found: Vec<_> = registry.lookup(&key(k)).iter().map(|s| s.id()).collect();
                let expected: Vec<_> = model
                    .get(&k)
                    .map(|list| list.iter().map(|n| services[*n].id()).collect())
                    .unwrap_or_default();
                prop_assert_eq!(found, expected);
            }
        }

        prop_assert_eq!(registry.is_empty(), model.is_empty());
    }

    #[test]
    fn lookup_others_excludes_exact_key(ops in prop::collection::vec(operation_strategy(4), 1..30)) {
        let registry = Registry::new();
        let services = services(4);
        for op in &ops {
            if let Operation::Register(k, n) = *op {
                registry.register(key(k), Arc::clone(&services[n]));
            }
        }

        let snapshot = registry.snapshot();
        for k in 0..key_count() {
            let requested = key(k);
            let others = registry.lookup_others_keyed(&requested);
            for (other_key, _) in &others {
                prop_assert_eq!(&other_key.identity, &requested.identity);
                prop_assert_ne!(&other_key.config, &requested.config);
            }
            let expected = snapshot
                .entries
                .iter()
                .filter(|e| e.identity == requested.identity && e.config != requested.config)
                .count();
            prop_assert_eq!(others.len(), expected);
        }
    }

    #[test]
    fn unregister_twice_equals_once(k in 0..6usize, n in 0..4usize) {
        let registry = Registry::new();
        let services = services(4);
        registry.register(key(k), Arc::clone(&services[n]));

        prop_assert!(registry.unregister(&key(k), services[n].as_ref()));
        let after_once = registry.snapshot().entries;
        prop_assert!(!registry.unregister(&key(k), services[n].as_ref()));
        prop_assert_eq!(registry.snapshot().entries, after_once);
        prop_assert!(registry.is_empty());
    }
}

#[test]
fn equal_keys_built_separately_find_the_service() {
    let registry = Registry::new();
    let service = services(1).remove(0);
    registry.register(key(0), Arc::clone(&service));

    let found = registry.lookup(&key(0));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), service.id());
}

#[test]
fn other_configs_of_the_same_identity_are_visible() {
    let registry = Registry::new();
    let services = services(2);
    // Same feature, different image.
    let k1 = key(0);
    let k2 = key(FEATURES.len());
    assert_eq!(k1.identity, k2.identity);

    registry.register(k1.clone(), Arc::clone(&services[0]));
    let others = registry.lookup_others(&k2);
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].id(), services[0].id());
    assert!(registry.lookup_others(&k1).is_empty());
}

#[test]
fn identities_do_not_leak_into_each_other() {
    let registry = Registry::new();
    let service = services(1).remove(0);
    let dev = key(0);
    let test = ServiceConfig::new(
        AppIdentity::new(FEATURES[0], LaunchMode::Test),
        dev.config.clone(),
    );

    registry.register(dev, service);
    assert!(registry.lookup(&test).is_empty());
    assert!(registry.lookup_others(&test).is_empty());

    let auxiliary = ServiceConfig::new(
        AppIdentity::new(FEATURES[0], LaunchMode::Development).auxiliary(true),
        key(0).config,
    );
    assert!(registry.lookup(&auxiliary).is_empty());
}
