//! Security validation of untrusted composition documents
//!
//! Every rule is evaluated for every service so a user sees all violations in
//! a single round-trip.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::compose::document::{BuildSpec, ComposeDocument, MountSource, Service};
use crate::errors::ShipyardError;

/// Service options rejected whenever present
pub const BLOCKED_SERVICE_OPTIONS: &[&str] = &[
    "privileged",
    "cap_add",
    "cap_drop",
    "cgroup_parent",
    "devices",
    "dns",
    "dns_search",
    "dns_opt",
    "external_links",
    "extra_hosts",
    "ipc",
    "pid",
    "security_opt",
    "shm_size",
    "sysctls",
    "userns_mode",
    "uts",
];

/// Values of `network_mode` that are rejected; any other value is allowed
pub const BLOCKED_NETWORK_MODES: &[&str] = &["host", "none"];

/// Host directories that may not be mounted, nor anything below them
pub const BLOCKED_MOUNT_ROOTS: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/boot",
    "/lib",
    "/lib64",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/root",
    "/home",
    "/run",
    "/var/run",
    "/var/lib/docker",
];

/// Network drivers that bridge into the host network
pub const BLOCKED_NETWORK_DRIVERS: &[&str] = &["host", "macvlan", "ipvlan"];

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), ShipyardError> {
        if self.valid {
            Ok(())
        } else {
            Err(ShipyardError::ValidationError(self.errors))
        }
    }
}

/// Validate a document against the fixed rule set
pub fn validate(doc: &ComposeDocument, shared_network: &str) -> ValidationReport {
    let mut errors = Vec::new();

    for (name, service) in &doc.services {
        check_service(name, service, doc, shared_network, &mut errors);
    }
    check_declared_networks(&doc.networks, shared_network, &mut errors);
    check_declared_volumes(&doc.extra, &mut errors);

    ValidationReport::from_errors(errors)
}

fn check_service(
    name: &str,
    service: &Service,
    doc: &ComposeDocument,
    shared_network: &str,
    errors: &mut Vec<String>,
) {
    for option in BLOCKED_SERVICE_OPTIONS {
        if service.extra.contains_key(*option) {
            errors.push(format!("service `{}`: option `{}` is not allowed", name, option));
        }
    }

    if let Some(mode) = service.network_mode.as_deref() {
        if BLOCKED_NETWORK_MODES.contains(&mode) {
            errors.push(format!(
                "service `{}`: network_mode `{}` is not allowed",
                name, mode
            ));
        }
    }

    if service.image.is_none() && service.build.is_none() {
        errors.push(format!(
            "service `{}`: an image or a build context is required",
            name
        ));
    }

    for port in &service.ports {
        if let Err(e) = port.target() {
            errors.push(format!("service `{}`: {}", name, e));
        }
    }

    for volume in &service.volumes {
        match volume.classify() {
            MountSource::Absolute(source) if is_sensitive_path(source) => {
                errors.push(format!(
                    "service `{}`: mount source `{}` is not allowed",
                    name, source
                ));
            }
            MountSource::Relative(source) if normalize_relative(source).is_none() => {
                errors.push(format!(
                    "service `{}`: mount source `{}` escapes the project directory",
                    name, source
                ));
            }
            MountSource::Home(source) => {
                errors.push(format!(
                    "service `{}`: home directory mount `{}` is not allowed",
                    name, source
                ));
            }
            _ => {}
        }
    }

    if let Some(build) = &service.build {
        check_build_context(name, build, errors);
    }

    check_limits(name, service, errors);

    if let Some(networks) = &service.networks {
        for network in networks.names() {
            let declared = network == shared_network
                || network == "default"
                || doc.networks.contains_key(network.as_str());
            if !declared {
                errors.push(format!(
                    "service `{}`: network `{}` is not declared",
                    name, network
                ));
            }
        }
    }
}

fn check_build_context(name: &str, build: &BuildSpec, errors: &mut Vec<String>) {
    if build.is_remote() {
        return;
    }
    let context = build.context();
    if context.starts_with('/') || context.starts_with('~') {
        errors.push(format!(
            "service `{}`: build context `{}` must be relative",
            name, context
        ));
    } else if context.split(['/', '\\']).any(|c| c == "..") {
        errors.push(format!(
            "service `{}`: build context `{}` escapes the project directory",
            name, context
        ));
    }
}

fn check_limits(name: &str, service: &Service, errors: &mut Vec<String>) {
    let Some(limits) = service
        .deploy
        .as_ref()
        .and_then(|d| d.resources.as_ref())
        .and_then(|r| r.limits.as_ref())
    else {
        return;
    };
    if let Some(cpus) = &limits.cpus {
        if cpus.as_cpus().is_none() {
            errors.push(format!("service `{}`: invalid cpu limit", name));
        }
    }
    if let Some(memory) = &limits.memory {
        if memory.as_memory_bytes().is_none() {
            errors.push(format!("service `{}`: invalid memory limit", name));
        }
    }
}

fn check_declared_networks(networks: &Mapping, shared_network: &str, errors: &mut Vec<String>) {
    for (key, decl) in networks {
        let key = key.as_str().unwrap_or_default();
        let Value::Mapping(decl) = decl else {
            continue;
        };

        let external = match decl.get("external") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Mapping(_)) => true,
            _ => false,
        };
        if external {
            let effective = decl
                .get("name")
                .and_then(Value::as_str)
                .or_else(|| {
                    decl.get("external")
                        .and_then(|e| e.get("name"))
                        .and_then(Value::as_str)
                })
                .unwrap_or(key);
            if effective != shared_network {
                errors.push(format!(
                    "network `{}`: external network `{}` is not allowed",
                    key, effective
                ));
            }
        }

        if let Some(driver) = decl.get("driver").and_then(Value::as_str) {
            if BLOCKED_NETWORK_DRIVERS.contains(&driver) {
                errors.push(format!("network `{}`: driver `{}` is not allowed", key, driver));
            }
        }
    }
}

/// Named volumes backed by a host directory through the local driver
fn check_declared_volumes(extra: &Mapping, errors: &mut Vec<String>) {
    let Some(Value::Mapping(volumes)) = extra.get("volumes") else {
        return;
    };
    for (key, decl) in volumes {
        let key = key.as_str().unwrap_or_default();
        let Some(opts) = decl.get("driver_opts") else {
            continue;
        };
        let Some(device) = opts.get("device").and_then(Value::as_str) else {
            continue;
        };

        if device.starts_with('/') {
            if is_sensitive_path(device) {
                errors.push(format!("volume `{}`: device `{}` is not allowed", key, device));
            }
            continue;
        }
        let bind = opts.get("type").and_then(Value::as_str) == Some("none")
            || opts
                .get("o")
                .and_then(Value::as_str)
                .is_some_and(|o| o.split(',').any(|opt| opt.trim().ends_with("bind")));
        // Relative devices resolve against the daemon, not the document
        if bind {
            errors.push(format!(
                "volume `{}`: bind device `{}` must be an absolute path",
                key, device
            ));
        }
    }
}

/// Lexically normalize a relative path, or `None` when it climbs above its
/// starting directory
pub fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            c => parts.push(c),
        }
    }
    Some(parts.join("/"))
}

/// Lexically normalize an absolute path (`.`, `..`, repeated slashes)
pub fn normalize_absolute(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Whether an absolute host path is, or is nested under, a blocked directory
pub fn is_sensitive_path(path: &str) -> bool {
    let normalized = normalize_absolute(path);
    if normalized == "/" {
        return true;
    }
    BLOCKED_MOUNT_ROOTS.iter().any(|root| {
        normalized == *root
            || normalized
                .strip_prefix(root)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}
