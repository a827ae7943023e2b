//! NSEC Denial Index
//!
//! Services are published under names like `east.1-0-0.web.production`
//! below the zone apex. For every registered service we keep its name
//! suffixes in four sorted registries, one per depth:
//!
//! ```text
//!                production -> depth 1
//!            web.production -> depth 2
//!      1-0-0.web.production -> depth 3
//! east.1-0-0.web.production -> depth 4
//! ```
//!
//! Each depth is treated as its own little zone: the names around a denied
//! name at that depth become the owner and next name of the NSEC record.
//! Names are reference counted because many services share the shorter
//! suffixes.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::dns_types::{split_labels, DnsError};
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};

/// Deepest name suffix the index tracks
pub const MAX_DENIAL_DEPTH: usize = 4;

/// A name and the number of services currently using it
#[derive(Debug, Clone, PartialEq, Eq)]
struct DenialRef {
    name: String,
    references: usize,
}

type Registries = [Vec<DenialRef>; MAX_DENIAL_DEPTH];

/// Four sorted, reference-counted name registries
pub struct DenialIndex {
    registries: RwLock<Registries>,
}

fn slot(depth: usize) -> Result<usize, DnsError> {
    if (1..=MAX_DENIAL_DEPTH).contains(&depth) {
        Ok(depth - 1)
    } else {
        Err(DnsError::InvalidDenialDepth(depth))
    }
}

fn insert_into(registry: &mut Vec<DenialRef>, name: &str) -> usize {
    match registry.binary_search_by(|entry| entry.name.as_str().cmp(name)) {
        Ok(i) => {
            registry[i].references += 1;
            registry[i].references
        }
        Err(i) => {
            registry.insert(
                i,
                DenialRef {
                    name: name.to_string(),
                    references: 1,
                },
            );
            1
        }
    }
}

fn remove_from(registry: &mut Vec<DenialRef>, name: &str) -> usize {
    match registry.binary_search_by(|entry| entry.name.as_str().cmp(name)) {
        Ok(i) => {
            registry[i].references -= 1;
            let left = registry[i].references;
            if left == 0 {
                registry.remove(i);
            }
            left
        }
        Err(_) => 0,
    }
}

impl DenialIndex {
    pub fn new() -> Self {
        Self {
            registries: RwLock::new(Default::default()),
        }
    }

    /// Add a reference to `name` at `depth`; returns the new count
    pub fn insert(&self, name: &str, depth: usize) -> Result<usize, DnsError> {
        let slot = slot(depth)?;
        let mut registries = write_lock_or_recover(&self.registries, "denial index");
        Ok(insert_into(&mut registries[slot], &name.to_lowercase()))
    }

    /// Drop a reference to `name` at `depth`; the name disappears when no
    /// references are left. Returns the remaining count.
    pub fn remove(&self, name: &str, depth: usize) -> Result<usize, DnsError> {
        let slot = slot(depth)?;
        let mut registries = write_lock_or_recover(&self.registries, "denial index");
        Ok(remove_from(&mut registries[slot], &name.to_lowercase()))
    }

    /// Find the registered names immediately before and after `name` at
    /// `depth`, excluding `name` itself.
    ///
    /// An empty predecessor means the start of the zone, an empty successor
    /// means the chain wraps around to the apex.
    pub fn search(&self, name: &str, depth: usize) -> Result<(String, String), DnsError> {
        let slot = slot(depth)?;
        let name = name.to_lowercase();
        let registries = read_lock_or_recover(&self.registries, "denial index");
        let registry = &registries[slot];

        let (before, after) = match registry.binary_search_by(|entry| entry.name.as_str().cmp(&name)) {
            Ok(i) => (i, i + 1),
            Err(i) => (i, i),
        };

        let predecessor = if before > 0 {
            registry[before - 1].name.clone()
        } else {
            String::new()
        };
        let successor = registry
            .get(after)
            .map(|entry| entry.name.clone())
            .unwrap_or_default();

        Ok((predecessor, successor))
    }

    /// Current reference count of `name` at `depth` (0 when absent)
    pub fn reference_count(&self, name: &str, depth: usize) -> usize {
        let Ok(slot) = slot(depth) else {
            return 0;
        };
        let name = name.to_lowercase();
        let registries = read_lock_or_recover(&self.registries, "denial index");
        registries[slot]
            .binary_search_by(|entry| entry.name.as_str().cmp(&name))
            .map(|i| registries[slot][i].references)
            .unwrap_or(0)
    }

    pub fn contains(&self, name: &str, depth: usize) -> bool {
        self.reference_count(name, depth) > 0
    }

    /// Number of distinct names at `depth`
    pub fn len(&self, depth: usize) -> usize {
        match slot(depth) {
            Ok(slot) => read_lock_or_recover(&self.registries, "denial index")[slot].len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        read_lock_or_recover(&self.registries, "denial index")
            .iter()
            .all(|registry| registry.is_empty())
    }

    /// Register the four name suffixes of `service`
    pub fn register_service(&self, service: &ServiceRecord) {
        debug!("Adding NSEC names for service {}", service.denial_names()[3]);
        let mut registries = write_lock_or_recover(&self.registries, "denial index");
        for (slot, name) in service.denial_names().iter().enumerate() {
            insert_into(&mut registries[slot], name);
        }
    }

    /// Release the four name suffixes of `service`
    pub fn deregister_service(&self, service: &ServiceRecord) {
        debug!("Removing NSEC names for service {}", service.denial_names()[3]);
        let mut registries = write_lock_or_recover(&self.registries, "denial index");
        for (slot, name) in service.denial_names().iter().enumerate() {
            remove_from(&mut registries[slot], name);
        }
    }

    /// Apply a service lifecycle event
    pub fn apply(&self, event: &ServiceEvent) {
        match event {
            ServiceEvent::Registered(service) => self.register_service(service),
            ServiceEvent::Deregistered(service) => self.deregister_service(service),
        }
    }
}

impl Default for DenialIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Search key and depth for denying `qname` in a zone whose apex has
/// `apex_labels` labels.
///
/// At most the [`MAX_DENIAL_DEPTH`] labels directly below the apex are
/// used; deeper names share the proof of their 4-label suffix. A name at
/// the apex itself searches the empty name at depth 1.
pub fn denial_key(qname: &str, apex_labels: usize) -> (String, usize) {
    let labels = split_labels(qname);
    let below_apex = labels.len().saturating_sub(apex_labels);
    let start = below_apex.saturating_sub(MAX_DENIAL_DEPTH);
    let key = &labels[start..below_apex];

    (key.join(".").to_lowercase(), key.len().max(1))
}

/// A registered service, as reported by the service registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub region: String,
    pub version: String,
    pub name: String,
    pub environment: String,
}

impl ServiceRecord {
    pub fn new(
        region: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            version: version.into(),
            name: name.into(),
            environment: environment.into(),
        }
    }

    /// Name suffixes for depths 1 through 4.
    ///
    /// Each component becomes exactly one label, so dots inside a component
    /// (`1.0.0`) are turned into dashes (`1-0-0`).
    pub fn denial_names(&self) -> [String; MAX_DENIAL_DEPTH] {
        let label = |s: &str| s.replace('.', "-").to_lowercase();
        let environment = label(&self.environment);
        let name = format!("{}.{}", label(&self.name), environment);
        let version = format!("{}.{}", label(&self.version), name);
        let region = format!("{}.{}", label(&self.region), version);
        [environment, name, version, region]
    }
}

/// Service lifecycle events driving the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceEvent {
    Registered(ServiceRecord),
    Deregistered(ServiceRecord),
}

/// Apply events from `events` to `index` until the sender side is dropped
pub fn spawn_event_listener(
    index: Arc<DenialIndex>,
    mut events: mpsc::Receiver<ServiceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut applied = 0u64;
        while let Some(event) = events.recv().await {
            index.apply(&event);
            applied += 1;
        }
        info!("Service event stream closed after {} events", applied);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_twice_remove_twice() {
        let index = DenialIndex::new();
        assert_eq!(index.insert("web", 2).unwrap(), 1);
        assert_eq!(index.insert("web", 2).unwrap(), 2);
        assert_eq!(index.remove("web", 2).unwrap(), 1);
        assert!(index.contains("web", 2));
        assert_eq!(index.remove("web", 2).unwrap(), 0);
        assert!(!index.contains("web", 2));
        assert_eq!(index.len(2), 0);
    }

    #[test]
    fn test_remove_absent_name_is_noop() {
        let index = DenialIndex::new();
        index.insert("a", 1).unwrap();
        assert_eq!(index.remove("b", 1).unwrap(), 0);
        assert_eq!(index.reference_count("a", 1), 1);
    }

    #[test]
    fn test_registries_stay_sorted() {
        let index = DenialIndex::new();
        for name in ["delta", "alpha", "charlie", "bravo"] {
            index.insert(name, 1).unwrap();
        }
        assert_eq!(index.search("alpha", 1).unwrap(), ("".to_string(), "bravo".to_string()));
        assert_eq!(index.search("bravo", 1).unwrap(), ("alpha".to_string(), "charlie".to_string()));
        assert_eq!(index.search("delta", 1).unwrap(), ("charlie".to_string(), "".to_string()));
    }

    #[test]
    fn test_search_between_names() {
        let index = DenialIndex::new();
        index.insert("a", 1).unwrap();
        index.insert("c", 1).unwrap();
        assert_eq!(index.search("b", 1).unwrap(), ("a".to_string(), "c".to_string()));
    }

    #[test]
    fn test_search_below_first_and_past_last() {
        let index = DenialIndex::new();
        index.insert("m", 3).unwrap();
        index.insert("p", 3).unwrap();

        let (prev, next) = index.search("a", 3).unwrap();
        assert_eq!(prev, "");
        assert_eq!(next, "m");

        let (prev, next) = index.search("z", 3).unwrap();
        assert_eq!(prev, "p");
        assert_eq!(next, "");
    }

    #[test]
    fn test_search_empty_registry() {
        let index = DenialIndex::new();
        assert_eq!(index.search("anything", 4).unwrap(), (String::new(), String::new()));
    }

    #[test]
    fn test_invalid_depth() {
        let index = DenialIndex::new();
        assert!(matches!(index.insert("a", 0), Err(DnsError::InvalidDenialDepth(0))));
        assert!(index.remove("a", 5).is_err());
        assert!(index.search("a", 5).is_err());
        assert_eq!(index.reference_count("a", 9), 0);
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let index = DenialIndex::new();
        index.insert("Web", 1).unwrap();
        index.insert("web", 1).unwrap();
        assert_eq!(index.reference_count("WEB", 1), 2);
    }

    #[test]
    fn test_service_denial_names() {
        let service = ServiceRecord::new("east", "1.0.0", "web", "production");
        assert_eq!(
            service.denial_names(),
            [
                "production".to_string(),
                "web.production".to_string(),
                "1-0-0.web.production".to_string(),
                "east.1-0-0.web.production".to_string(),
            ]
        );
    }

    #[test]
    fn test_register_and_deregister_service() {
        let index = DenialIndex::new();
        let service = ServiceRecord::new("east", "1", "web", "prod");

        index.register_service(&service);
        index.register_service(&service);
        assert_eq!(index.reference_count("web.prod", 2), 2);
        assert_eq!(index.reference_count("east.1.web.prod", 4), 2);

        index.deregister_service(&service);
        assert_eq!(index.reference_count("web.prod", 2), 1);
        assert_eq!(index.reference_count("prod", 1), 1);

        index.deregister_service(&service);
        assert!(index.is_empty());
    }

    #[test]
    fn test_deregistration_never_increments() {
        let index = DenialIndex::new();
        let web = ServiceRecord::new("east", "1", "web", "prod");
        let db = ServiceRecord::new("west", "2", "db", "prod");
        index.register_service(&web);
        index.register_service(&db);

        let before: Vec<usize> = web
            .denial_names()
            .iter()
            .enumerate()
            .map(|(slot, name)| index.reference_count(name, slot + 1))
            .collect();

        index.deregister_service(&web);

        for (slot, name) in web.denial_names().iter().enumerate() {
            assert!(index.reference_count(name, slot + 1) < before[slot]);
        }
        // Shared environment survives through the other service
        assert_eq!(index.reference_count("prod", 1), 1);
    }

    #[test]
    fn test_denial_key() {
        // Apex skydns.local has two labels
        assert_eq!(denial_key("web.prod.skydns.local.", 2), ("web.prod".to_string(), 2));
        assert_eq!(denial_key("skydns.local.", 2), ("".to_string(), 1));
        assert_eq!(
            denial_key("a.b.c.d.e.skydns.local.", 2),
            ("b.c.d.e".to_string(), 4)
        );
        assert_eq!(denial_key("Prod.SkyDNS.local.", 2), ("prod".to_string(), 1));
    }

    #[tokio::test]
    async fn test_event_listener_applies_events() {
        let index = Arc::new(DenialIndex::new());
        let (tx, rx) = mpsc::channel(8);
        let listener = spawn_event_listener(Arc::clone(&index), rx);

        let service = ServiceRecord::new("east", "1", "web", "prod");
        tx.send(ServiceEvent::Registered(service.clone())).await.unwrap();
        tx.send(ServiceEvent::Registered(service.clone())).await.unwrap();
        tx.send(ServiceEvent::Deregistered(service)).await.unwrap();
        drop(tx);

        listener.await.unwrap();
        assert_eq!(index.reference_count("web.prod", 2), 1);
    }
}
