/*!
 * Identity resolver.
 *
 * Vehicles, devices and actions are addressed by different identifiers on the
 * wire. The resolver keeps three derived maps, each keyed by any of the three
 * identifiers of every registered action route:
 *
 * - key to vehicle id
 * - key to device id
 * - key to the set of action keys
 *
 * The maps are built by scanning the route registry. A lookup miss triggers a
 * scan only when the registry changed since the last one, so an unknown
 * identifier stays absent until new routes are registered. Readers clone an
 * `Arc` snapshot; a scan builds a new snapshot and swaps it in.
 */
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::kernel::KernelLookup;
use crate::route::ActionRouteRegistry;

/// Reserved key that never resolves; querying it populates the cache
pub const SENTINEL_KEY: &str = "__telegate_identity_sentinel__";

#[derive(Debug, Default)]
struct IdentitySnapshot {
    vehicles: HashMap<String, String>,
    devices: HashMap<String, String>,
    action_keys: HashMap<String, BTreeSet<String>>,
    built_from: Option<u64>,
}

/// Cache translating between device, vehicle and action identifiers
#[derive(Debug)]
pub struct IdentityResolver {
    routes: Arc<ActionRouteRegistry>,
    kernel: RwLock<KernelLookup>,
    snapshot: RwLock<Arc<IdentitySnapshot>>,
    rebuild_lock: Mutex<()>,
    rebuilds: AtomicU64,
}

impl IdentityResolver {
    /// Create a resolver over a route registry
    pub fn new(routes: Arc<ActionRouteRegistry>) -> Self {
        Self {
            routes,
            kernel: RwLock::new(KernelLookup::default()),
            snapshot: RwLock::new(Arc::new(IdentitySnapshot::default())),
            rebuild_lock: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Include the kernel's vehicle names in the vehicle map
    pub fn attach_kernel(&self, kernel: KernelLookup) {
        *self.kernel.write() = kernel;
        self.reset();
    }

    /// Vehicle id for a device id, vehicle id or action key
    pub fn resolve_vehicle_id(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        self.lookup(key, |s| s.vehicles.get(key).cloned())
    }

    /// Device id for a device id, vehicle id or action key
    pub fn resolve_device_id(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        self.lookup(key, |s| s.devices.get(key).cloned())
    }

    /// Action keys reachable from a device id, vehicle id or action key
    pub fn resolve_action_keys(&self, key: &str) -> Result<Option<BTreeSet<String>>> {
        if key.trim().is_empty() {
            return Err(Error::validation("Device id must not be empty"));
        }
        Ok(self.lookup(key, |s| s.action_keys.get(key).cloned()))
    }

    /// Populate the cache without waiting for a real lookup to miss
    pub fn warm_up(&self) {
        let _ = self.resolve_vehicle_id(SENTINEL_KEY);
    }

    /// Rebuild the maps unconditionally
    pub fn force_rebuild(&self) {
        let _guard = self.rebuild_lock.lock();
        self.rebuild_locked();
    }

    /// Drop the cached maps; the next lookup rebuilds them
    pub fn reset(&self) {
        let _guard = self.rebuild_lock.lock();
        *self.snapshot.write() = Arc::new(IdentitySnapshot::default());
    }

    /// Number of scans performed so far
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<IdentitySnapshot> {
        self.snapshot.read().clone()
    }

    fn is_stale(&self, snapshot: &IdentitySnapshot) -> bool {
        snapshot.built_from != Some(self.routes.version())
    }

    fn lookup<T>(&self, key: &str, pick: impl Fn(&IdentitySnapshot) -> Option<T>) -> Option<T> {
        let snapshot = self.current();
        if let Some(found) = pick(&snapshot) {
            return Some(found);
        }
        if !self.is_stale(&snapshot) {
            return None;
        }

        debug!("Identity [{}] not cached, rebuilding", key);
        let snapshot = {
            let _guard = self.rebuild_lock.lock();
            let current = self.current();
            if self.is_stale(&current) {
                self.rebuild_locked()
            } else {
                current
            }
        };
        pick(&snapshot)
    }

    // Caller holds rebuild_lock.
    fn rebuild_locked(&self) -> Arc<IdentitySnapshot> {
        let version = self.routes.version();
        let mut next = IdentitySnapshot {
            built_from: Some(version),
            ..IdentitySnapshot::default()
        };

        for route in self.routes.routes() {
            let keys = [route.device_id(), route.vehicle_id(), route.action_key()];
            for key in keys {
                next.vehicles.insert(key.to_string(), route.vehicle_id().to_string());
                next.devices.insert(key.to_string(), route.device_id().to_string());
                next.action_keys
                    .entry(key.to_string())
                    .or_default()
                    .insert(route.action_key().to_string());
            }
        }

        for name in self.kernel.read().vehicle_names() {
            next.vehicles.entry(name.clone()).or_insert(name);
        }

        let next = Arc::new(next);
        *self.snapshot.write() = next.clone();
        let count = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Identity cache rebuilt from {} routes (version {}, rebuild #{})",
            self.routes.len(),
            version,
            count
        );
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{FleetKernel, StaticKernel};
    use crate::test_support::RecordingHandler;
    use std::sync::Barrier;

    fn registry() -> Arc<ActionRouteRegistry> {
        let routes = Arc::new(ActionRouteRegistry::new());
        routes.register("charge", "D1", "V1", RecordingHandler::new()).unwrap();
        routes.register("lift", "D1", "V1", RecordingHandler::new()).unwrap();
        routes.register("drop", "D2", "V2", RecordingHandler::new()).unwrap();
        routes
    }

    #[test]
    fn test_every_identifier_resolves_to_the_same_identity() {
        let routes = registry();
        let resolver = IdentityResolver::new(routes.clone());

        for route in routes.routes() {
            for key in [route.device_id(), route.vehicle_id(), route.action_key()] {
                assert_eq!(resolver.resolve_vehicle_id(key).as_deref(), Some(route.vehicle_id()));
                assert_eq!(resolver.resolve_device_id(key).as_deref(), Some(route.device_id()));
                let actions = resolver.resolve_action_keys(key).unwrap().unwrap();
                assert!(actions.contains(route.action_key()));
            }
        }
        assert_eq!(resolver.rebuild_count(), 1);

        let keys = resolver.resolve_action_keys("V1").unwrap().unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["charge", "lift"]);
    }

    #[test]
    fn test_unknown_identifier_stays_absent() {
        let resolver = IdentityResolver::new(registry());

        assert!(resolver.resolve_vehicle_id("V9").is_none());
        resolver.force_rebuild();
        assert!(resolver.resolve_vehicle_id("V9").is_none());
        assert!(resolver.resolve_device_id("V9").is_none());
        assert!(resolver.resolve_action_keys("V9").unwrap().is_none());

        // one lazy scan plus the forced one; later misses do not rescan
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn test_empty_key() {
        let resolver = IdentityResolver::new(registry());
        assert!(resolver.resolve_vehicle_id("").is_none());
        assert!(matches!(resolver.resolve_action_keys(" "), Err(Error::Validation(_))));
        assert_eq!(resolver.rebuild_count(), 0);
    }

    #[test]
    fn test_new_routes_become_visible_on_next_miss() {
        let routes = registry();
        let resolver = IdentityResolver::new(routes.clone());
        resolver.warm_up();
        assert!(resolver.resolve_vehicle_id("D3").is_none());

        routes.register("scan", "D3", "V3", RecordingHandler::new()).unwrap();
        assert_eq!(resolver.resolve_vehicle_id("D3").as_deref(), Some("V3"));
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn test_kernel_vehicle_names_map_to_themselves() {
        let resolver = IdentityResolver::new(registry());
        let kernel = Arc::new(StaticKernel::new());
        kernel.add_vehicle("V1").add_vehicle("V7");
        resolver.attach_kernel(KernelLookup::new(Some(kernel as Arc<dyn FleetKernel>)));

        assert_eq!(resolver.resolve_vehicle_id("V7").as_deref(), Some("V7"));
        assert_eq!(resolver.resolve_vehicle_id("D1").as_deref(), Some("V1"));
        assert!(resolver.resolve_device_id("V7").is_none());
    }

    #[test]
    fn test_concurrent_misses_rebuild_once() {
        const CALLERS: usize = 16;
        let resolver = Arc::new(IdentityResolver::new(registry()));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let threads: Vec<_> = (0..CALLERS)
            .map(|i| {
                let resolver = resolver.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let key = if i % 2 == 0 { "D2" } else { SENTINEL_KEY };
                    resolver.resolve_vehicle_id(key)
                })
            })
            .collect();

        for (i, thread) in threads.into_iter().enumerate() {
            let resolved = thread.join().unwrap();
            if i % 2 == 0 {
                assert_eq!(resolved.as_deref(), Some("V2"));
            } else {
                assert!(resolved.is_none());
            }
        }
        assert_eq!(resolver.rebuild_count(), 1);
    }

    #[test]
    fn test_reset_drops_cache() {
        let resolver = IdentityResolver::new(registry());
        resolver.warm_up();
        resolver.reset();
        assert_eq!(resolver.resolve_device_id("charge").as_deref(), Some("D1"));
        assert_eq!(resolver.rebuild_count(), 2);
    }
}
