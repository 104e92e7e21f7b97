//! Rewrites a validated composition document into its multi-tenant form
//!
//! Container identities are namespaced with the project prefix, every service
//! gets resource limits, a restart policy, a timezone and membership of the
//! shared network, published ports are reassigned from the project's base
//! port, and host-relative mounts and build contexts are relocated under the
//! project's `data/` or `html/` directories.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::compose::classifier::ServiceClassifier;
use crate::compose::document::{
    ComposeDocument, Environment, GeneratedMarker, Labels, MountSource, PortSpec, Protocol,
    ResourceSpec, Scalar, Service, ServiceNetworks, GENERATED_MARKER_KEY, GENERATOR_NAME,
};
use crate::compose::validator::normalize_relative;
use crate::errors::ShipyardError;

pub const DEFAULT_CPUS: f64 = 1.0;
pub const MAX_CPUS: f64 = 2.0;
pub const DEFAULT_MEMORY_BYTES: u64 = 512 * MIB;
pub const MAX_MEMORY_BYTES: u64 = 2 * GIB;
pub const DEFAULT_RESTART_POLICY: &str = "unless-stopped";

/// Label carrying the owning project's namespace prefix
pub const PROJECT_LABEL: &str = "shipyard.project";
/// Label carrying the original service key
pub const SERVICE_LABEL: &str = "shipyard.service";

const DATA_ROOT: &str = "data";
const HTML_ROOT: &str = "html";

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// An externally published port assigned to a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub service: String,
    pub internal: u16,
    pub external: u16,
    pub protocol: Protocol,
}

/// Inputs of a single transformation run
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Namespace prefix, usually `owner-project`
    pub prefix: String,

    /// First external port to try
    pub base_port: u16,

    /// Ports already published by other projects
    pub used_ports: BTreeSet<u16>,

    /// Directory (relative to the checkout) where the document was found
    pub subdir: Option<String>,

    /// Platform network every service joins
    pub shared_network: String,

    /// Value of the injected `TZ` variable
    pub timezone: String,

    /// Timestamp written into the generation marker
    pub generated_at: DateTime<Utc>,
}

/// Result of a transformation run
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub document: ComposeDocument,
    pub mappings: Vec<PortMapping>,
}

/// Compose document transformer
pub struct ComposeTransformer {
    classifier: Arc<dyn ServiceClassifier>,
}

impl ComposeTransformer {
    pub fn new(classifier: Arc<dyn ServiceClassifier>) -> Self {
        Self { classifier }
    }

    /// Transform a validated document
    pub fn transform(
        &self,
        source: &ComposeDocument,
        ctx: &TransformContext,
    ) -> Result<TransformOutput, ShipyardError> {
        let mut document = source.clone();
        let mut allocator = PortAllocator::new(ctx.base_port, &ctx.used_ports);
        let mut mappings = Vec::new();

        for (name, service) in document.services.iter_mut() {
            let name = name.as_str();
            let stateful = self.classifier.is_stateful(service);

            namespace(name, service, &ctx.prefix);
            apply_defaults(service, &ctx.timezone);
            mappings.extend(remap_ports(name, service, &mut allocator)?);
            join_shared_network(service, &ctx.shared_network);
            relocate_mounts(service, stateful, ctx.subdir.as_deref());
            relocate_build_context(service, ctx.subdir.as_deref());

            debug!(service = %name, stateful, "transformed service");
        }

        finalize(&mut document, ctx)?;

        Ok(TransformOutput { document, mappings })
    }
}

fn namespace(name: &str, service: &mut Service, prefix: &str) {
    // Keyed off the service key, so a re-import never double-prefixes
    service.container_name = Some(format!("{}-{}", prefix, name));
    let labels = service
        .labels
        .get_or_insert_with(|| Labels::Map(Mapping::new()));
    labels.set(PROJECT_LABEL, prefix);
    labels.set(SERVICE_LABEL, name);
}

fn apply_defaults(service: &mut Service, timezone: &str) {
    if service.restart.is_none() {
        service.restart = Some(DEFAULT_RESTART_POLICY.to_string());
    }

    let resources = service
        .deploy
        .get_or_insert_with(Default::default)
        .resources
        .get_or_insert_with(Default::default);
    let limits = resources.limits.get_or_insert_with(Default::default);

    let cpus = limits
        .cpus
        .as_ref()
        .and_then(Scalar::as_cpus)
        .unwrap_or(DEFAULT_CPUS)
        .min(MAX_CPUS);
    let memory = limits
        .memory
        .as_ref()
        .and_then(Scalar::as_memory_bytes)
        .unwrap_or(DEFAULT_MEMORY_BYTES)
        .min(MAX_MEMORY_BYTES);
    limits.cpus = Some(Scalar::Text(format_cpus(cpus)));
    limits.memory = Some(Scalar::Text(format_memory(memory)));

    // Reservations above the limit would make the service unschedulable
    if let Some(reservations) = resources.reservations.as_mut() {
        clamp_reservations(reservations, cpus, memory);
    }

    service
        .environment
        .get_or_insert_with(|| Environment::Map(Mapping::new()))
        .insert_if_absent("TZ", timezone);
}

fn clamp_reservations(reservations: &mut ResourceSpec, cpus: f64, memory: u64) {
    if let Some(reserved) = reservations.cpus.as_ref().and_then(Scalar::as_cpus) {
        if reserved > cpus {
            reservations.cpus = Some(Scalar::Text(format_cpus(cpus)));
        }
    }
    if let Some(reserved) = reservations.memory.as_ref().and_then(Scalar::as_memory_bytes) {
        if reserved > memory {
            reservations.memory = Some(Scalar::Text(format_memory(memory)));
        }
    }
}

fn remap_ports(
    name: &str,
    service: &mut Service,
    allocator: &mut PortAllocator<'_>,
) -> Result<Vec<PortMapping>, ShipyardError> {
    let mut mappings = Vec::with_capacity(service.ports.len());
    for port in service.ports.iter_mut() {
        let target = port
            .target()
            .map_err(|e| ShipyardError::ValidationError(vec![format!("service `{}`: {}", name, e)]))?;
        let external = allocator.allocate()?;

        let mut binding = match port.host_ip() {
            Some(ip) => format!("{}:{}:{}", ip, external, target.internal),
            None => format!("{}:{}", external, target.internal),
        };
        if target.protocol == Protocol::Udp {
            binding.push_str("/udp");
        }
        *port = PortSpec::Short(binding);
        mappings.push(PortMapping {
            service: name.to_string(),
            internal: target.internal,
            external,
            protocol: target.protocol,
        });
    }
    Ok(mappings)
}

fn join_shared_network(service: &mut Service, shared_network: &str) {
    // Compose rejects `networks` alongside `network_mode`
    if service.network_mode.is_some() {
        return;
    }
    match service.networks.as_mut() {
        Some(networks) => networks.add(shared_network),
        None => {
            service.networks = Some(ServiceNetworks::List(vec![
                "default".to_string(),
                shared_network.to_string(),
            ]));
        }
    }
}

fn relocate_mounts(service: &mut Service, stateful: bool, subdir: Option<&str>) {
    for volume in service.volumes.iter_mut() {
        let MountSource::Relative(source) = volume.classify() else {
            continue;
        };
        let relocated = match already_relocated(source) {
            Some(kept) => kept,
            None if stateful => relocate(DATA_ROOT, None, source),
            None => relocate(HTML_ROOT, subdir, source),
        };
        volume.set_source(relocated);
    }
}

fn relocate_build_context(service: &mut Service, subdir: Option<&str>) {
    let Some(build) = service.build.as_mut() else {
        return;
    };
    if build.is_remote() || build.context().starts_with('/') {
        return;
    }
    let context = build.context();
    let relocated =
        already_relocated(context).unwrap_or_else(|| relocate(HTML_ROOT, subdir, context));
    build.set_context(relocated);
}

fn finalize(document: &mut ComposeDocument, ctx: &TransformContext) -> Result<(), ShipyardError> {
    // Rebuilt rather than removed in place to keep key order
    let mut extra = Mapping::new();
    for (key, value) in std::mem::take(&mut document.extra) {
        if key.as_str() == Some("version") || key.as_str() == Some(GENERATED_MARKER_KEY) {
            continue;
        }
        extra.insert(key, value);
    }

    let mut shared = Mapping::new();
    shared.insert(Value::from("external"), Value::Bool(true));
    document
        .networks
        .insert(Value::from(ctx.shared_network.as_str()), Value::Mapping(shared));

    let marker = GeneratedMarker {
        generator: GENERATOR_NAME.to_string(),
        project: ctx.prefix.clone(),
        generated_at: ctx.generated_at,
    };
    extra.insert(Value::from(GENERATED_MARKER_KEY), serde_yaml::to_value(&marker)?);
    document.extra = extra;
    Ok(())
}

/// Normalized form of a relative path that already resolves into a
/// relocated directory; `..` is resolved before looking at the root
fn already_relocated(path: &str) -> Option<String> {
    let normalized = normalize_relative(path)?;
    let inside = [DATA_ROOT, HTML_ROOT].iter().any(|root| {
        normalized == *root
            || normalized
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    });
    inside.then(|| format!("./{}", normalized))
}

/// Move a relative path under `./<root>[/<subdir>]`, dropping `.` and `..`
fn relocate(root: &str, subdir: Option<&str>, path: &str) -> String {
    let mut relocated = format!("./{}", root);
    let parts = subdir
        .into_iter()
        .flat_map(|s| s.split('/'))
        .chain(path.split('/'))
        .filter(|c| !c.is_empty() && *c != "." && *c != "..");
    for part in parts {
        relocated.push('/');
        relocated.push_str(part);
    }
    relocated
}

fn format_cpus(cpus: f64) -> String {
    format!("{}", cpus)
}

fn format_memory(bytes: u64) -> String {
    if bytes % GIB == 0 {
        format!("{}G", bytes / GIB)
    } else if bytes % MIB == 0 {
        format!("{}M", bytes / MIB)
    } else if bytes % KIB == 0 {
        format!("{}k", bytes / KIB)
    } else {
        format!("{}b", bytes)
    }
}

/// Hands out external ports from a base upward, skipping occupied ones
struct PortAllocator<'a> {
    next: u32,
    used: &'a BTreeSet<u16>,
    assigned: BTreeSet<u16>,
}

impl<'a> PortAllocator<'a> {
    fn new(base: u16, used: &'a BTreeSet<u16>) -> Self {
        Self {
            next: u32::from(base),
            used,
            assigned: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Result<u16, ShipyardError> {
        while self.next <= u32::from(u16::MAX) {
            let candidate = self.next as u16;
            self.next += 1;
            if !self.used.contains(&candidate) && self.assigned.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(ShipyardError::PortExhausted(1))
    }
}
