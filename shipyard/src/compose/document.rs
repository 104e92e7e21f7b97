//! Composition document model and parser
//!
//! The document is kept close to the Compose file format: typed fields for
//! everything the validator and transformer touch, and a flattened map for
//! every other key so nothing the user wrote is silently dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::errors::ShipyardError;

/// Top-level key stamped on generated documents
pub const GENERATED_MARKER_KEY: &str = "x-shipyard";

/// Name written into the generated marker
pub const GENERATOR_NAME: &str = "shipyard";

/// A parsed composition document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeDocument {
    /// Services in document order
    pub services: Vec<(String, Service)>,

    /// Top-level `networks` section (empty when absent)
    pub networks: Mapping,

    /// Every other top-level key, in document order
    pub extra: Mapping,
}

impl ComposeDocument {
    /// Parse a YAML composition document
    pub fn parse(source: &str) -> Result<Self, ShipyardError> {
        let root: Value = serde_yaml::from_str(source)
            .map_err(|e| ShipyardError::ParseError(e.to_string()))?;

        let Value::Mapping(root) = root else {
            return Err(ShipyardError::ParseError(
                "document root must be a mapping".to_string(),
            ));
        };

        let mut services = None;
        let mut networks = Mapping::new();
        let mut extra = Mapping::new();

        for (key, value) in root {
            match key.as_str() {
                Some("services") => match value {
                    Value::Mapping(m) => services = Some(m),
                    Value::Null => {}
                    _ => {
                        return Err(ShipyardError::ParseError(
                            "`services` must be a mapping".to_string(),
                        ))
                    }
                },
                Some("networks") => match value {
                    Value::Mapping(m) => networks = m,
                    Value::Null => {}
                    _ => {
                        return Err(ShipyardError::ParseError(
                            "`networks` must be a mapping".to_string(),
                        ))
                    }
                },
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        let services = match services {
            Some(m) if !m.is_empty() => m,
            _ => {
                return Err(ShipyardError::ParseError(
                    "missing required `services` section".to_string(),
                ))
            }
        };

        let mut parsed = Vec::with_capacity(services.len());
        for (key, value) in services {
            let Value::String(name) = key else {
                return Err(ShipyardError::ParseError(
                    "service names must be strings".to_string(),
                ));
            };
            let service = match value {
                Value::Null => Service::default(),
                Value::Mapping(_) => serde_yaml::from_value(value).map_err(|e| {
                    ShipyardError::ParseError(format!("service `{}`: {}", name, e))
                })?,
                _ => {
                    return Err(ShipyardError::ParseError(format!(
                        "service `{}` must be a mapping",
                        name
                    )))
                }
            };
            parsed.push((name, service));
        }

        Ok(Self {
            services: parsed,
            networks,
            extra,
        })
    }

    /// Render the document back into a YAML value
    pub fn to_value(&self) -> Result<Value, ShipyardError> {
        let mut services = Mapping::new();
        for (name, service) in &self.services {
            services.insert(Value::from(name.as_str()), serde_yaml::to_value(service)?);
        }

        let mut root = Mapping::new();
        for (key, value) in &self.extra {
            root.insert(key.clone(), value.clone());
        }
        root.insert(Value::from("services"), Value::Mapping(services));
        if !self.networks.is_empty() {
            root.insert(Value::from("networks"), Value::Mapping(self.networks.clone()));
        }
        Ok(Value::Mapping(root))
    }

    /// Render the document as YAML text
    pub fn to_yaml(&self) -> Result<String, ShipyardError> {
        Ok(serde_yaml::to_string(&self.to_value()?)?)
    }

    /// Look up a service by its key
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, service)| service)
    }

    /// The generation marker, if this document was produced by the transformer
    pub fn generated_marker(&self) -> Option<GeneratedMarker> {
        self.extra
            .get(GENERATED_MARKER_KEY)
            .cloned()
            .and_then(|v| serde_yaml::from_value(v).ok())
    }

    /// Whether this document carries a generation marker
    pub fn is_generated(&self) -> bool {
        self.generated_marker()
            .map(|m| m.generator == GENERATOR_NAME)
            .unwrap_or(false)
    }

    /// Total number of port bindings across all services
    pub fn port_binding_count(&self) -> usize {
        self.services.iter().map(|(_, s)| s.ports.len()).sum()
    }
}

/// Marker stamped on generated documents so a re-import can recognize them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMarker {
    pub generator: String,
    pub project: String,
    pub generated_at: DateTime<Utc>,
}

/// A single service definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<ServiceNetworks>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    /// Every key without a typed field above
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `build:` as a bare context string or a detailed mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Context(String),
    Detailed(BuildDetails),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BuildSpec {
    /// The build context, defaulting to the document directory
    pub fn context(&self) -> &str {
        match self {
            BuildSpec::Context(context) => context,
            BuildSpec::Detailed(details) => details.context.as_deref().unwrap_or("."),
        }
    }

    /// Replace the build context, keeping every other build option
    pub fn set_context(&mut self, context: String) {
        match self {
            BuildSpec::Context(c) => *c = context,
            BuildSpec::Detailed(details) => details.context = Some(context),
        }
    }

    /// Remote contexts (Git URLs) are fetched by the builder, not read from disk
    pub fn is_remote(&self) -> bool {
        let context = self.context();
        context.contains("://") || context.starts_with("git@")
    }
}

/// `environment:` in list (`KEY=value`) or map form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    List(Vec<String>),
    Map(Mapping),
}

impl Environment {
    /// Whether a variable is already defined
    pub fn contains(&self, key: &str) -> bool {
        match self {
            Environment::List(entries) => entries
                .iter()
                .any(|entry| entry.split('=').next() == Some(key)),
            Environment::Map(map) => map.contains_key(key),
        }
    }

    /// Define a variable without touching existing entries
    pub fn insert_if_absent(&mut self, key: &str, value: &str) {
        if self.contains(key) {
            return;
        }
        match self {
            Environment::List(entries) => entries.push(format!("{}={}", key, value)),
            Environment::Map(map) => {
                map.insert(Value::from(key), Value::from(value));
            }
        }
    }
}

/// `labels:` in list or map form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Labels {
    List(Vec<String>),
    Map(Mapping),
}

impl Labels {
    /// Set a label, replacing any previous value for the same key
    pub fn set(&mut self, key: &str, value: &str) {
        match self {
            Labels::List(entries) => {
                let entry = format!("{}={}", key, value);
                match entries
                    .iter_mut()
                    .find(|e| e.split('=').next() == Some(key))
                {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
            Labels::Map(map) => {
                map.insert(Value::from(key), Value::from(value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            Labels::List(entries) => entries.iter().find_map(|e| {
                e.split_once('=')
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            }),
            Labels::Map(map) => map.get(key).and_then(|v| v.as_str()).map(str::to_string),
        }
    }
}

/// Service-level `networks:` in list or map form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceNetworks {
    List(Vec<String>),
    Map(Mapping),
}

impl ServiceNetworks {
    pub fn names(&self) -> Vec<String> {
        match self {
            ServiceNetworks::List(names) => names.clone(),
            ServiceNetworks::Map(map) => map
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            ServiceNetworks::List(names) => names.iter().any(|n| n == name),
            ServiceNetworks::Map(map) => map.contains_key(name),
        }
    }

    /// Add a membership without removing existing ones
    pub fn add(&mut self, name: &str) {
        if self.contains(name) {
            return;
        }
        match self {
            ServiceNetworks::List(names) => names.push(name.to_string()),
            ServiceNetworks::Map(map) => {
                map.insert(Value::from(name), Value::Null);
            }
        }
    }
}

/// Network transport protocol of a port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("unsupported protocol: {}", s)),
        }
    }
}

/// A port binding in any of the accepted input forms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u32),
    Short(String),
    Long(LongPort),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongPort {
    pub target: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The container side of a port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTarget {
    pub internal: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    /// Resolve the internal port and protocol; the published side is ignored
    /// because external ports are always reassigned
    pub fn target(&self) -> Result<PortTarget, String> {
        match self {
            PortSpec::Number(port) => Ok(PortTarget {
                internal: checked_port(*port)?,
                protocol: Protocol::Tcp,
            }),
            PortSpec::Short(spec) => {
                let (binding, protocol) = match spec.rsplit_once('/') {
                    Some((binding, proto)) => (binding, proto.parse::<Protocol>()?),
                    None => (spec.as_str(), Protocol::Tcp),
                };
                let internal = binding.rsplit(':').next().unwrap_or(binding).trim();
                if internal.contains('-') {
                    return Err(format!("port ranges are not supported: {}", spec));
                }
                let port = internal
                    .parse::<u32>()
                    .map_err(|_| format!("invalid port binding: {}", spec))?;
                Ok(PortTarget {
                    internal: checked_port(port)?,
                    protocol,
                })
            }
            PortSpec::Long(long) => Ok(PortTarget {
                internal: checked_port(long.target)?,
                protocol: match &long.protocol {
                    Some(p) => p.parse()?,
                    None => Protocol::Tcp,
                },
            }),
        }
    }

    /// Host interface the binding is restricted to, in the form Compose
    /// expects inside a short binding (IPv6 in brackets)
    pub fn host_ip(&self) -> Option<String> {
        let ip = match self {
            PortSpec::Number(_) => return None,
            PortSpec::Short(spec) => {
                let binding = spec.rsplit_once('/').map_or(spec.as_str(), |(b, _)| b);
                // `[ip:]published:internal`
                binding.rsplitn(3, ':').nth(2)?.trim().to_string()
            }
            PortSpec::Long(long) => long.extra.get("host_ip")?.as_str()?.trim().to_string(),
        };
        if ip.is_empty() {
            None
        } else if ip.contains(':') && !ip.starts_with('[') {
            Some(format!("[{}]", ip))
        } else {
            Some(ip)
        }
    }
}

fn checked_port(port: u32) -> Result<u16, String> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(format!("port out of range: {}", port)),
    }
}

/// A mount binding in short (`src:dst[:mode]`) or long form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeSpec {
    Short(String),
    Long(LongVolume),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongVolume {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub target: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// How a mount source is interpreted on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountSource<'a> {
    /// Anonymous volume, no source at all
    Anonymous,
    /// Named volume managed by the runtime
    Named(&'a str),
    /// Path relative to the document directory
    Relative(&'a str),
    /// Absolute host path
    Absolute(&'a str),
    /// Path relative to a home directory (`~`)
    Home(&'a str),
}

impl VolumeSpec {
    pub fn source(&self) -> Option<&str> {
        match self {
            VolumeSpec::Short(spec) => spec.split_once(':').map(|(source, _)| source),
            VolumeSpec::Long(long) => long.source.as_deref(),
        }
    }

    pub fn classify(&self) -> MountSource<'_> {
        match self.source() {
            None | Some("") => MountSource::Anonymous,
            Some(source) if source.starts_with('/') => MountSource::Absolute(source),
            Some(source) if source.starts_with('~') => MountSource::Home(source),
            Some(source) if source.starts_with('.') || source.contains('/') => {
                MountSource::Relative(source)
            }
            Some(source) => MountSource::Named(source),
        }
    }

    /// Replace the source, keeping target and mode
    pub fn set_source(&mut self, source: String) {
        match self {
            VolumeSpec::Short(spec) => {
                if let Some((_, rest)) = spec.split_once(':') {
                    *spec = format!("{}:{}", source, rest);
                }
            }
            VolumeSpec::Long(long) => long.source = Some(source),
        }
    }
}

/// `deploy:` section, only resources are typed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Scalar>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A limit written either as a number or a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_cpus(&self) -> Option<f64> {
        let cpus = match self {
            Scalar::Number(n) => *n,
            Scalar::Text(s) => s.trim().parse().ok()?,
        };
        (cpus.is_finite() && cpus > 0.0).then_some(cpus)
    }

    /// Memory in bytes; accepts `b`, `k`, `m`, `g` suffixes with optional `b`/`ib`
    pub fn as_memory_bytes(&self) -> Option<u64> {
        match self {
            Scalar::Number(n) if n.is_finite() && *n > 0.0 => Some(*n as u64),
            Scalar::Number(_) => None,
            Scalar::Text(s) => parse_memory(s),
        }
    }
}

fn parse_memory(text: &str) -> Option<u64> {
    let lower = text.trim().to_lowercase();
    let digits_end = lower
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lower.len());
    let (number, unit) = lower.split_at(digits_end);
    let number: f64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        _ => return None,
    };
    let bytes = (number * multiplier as f64) as u64;
    (bytes > 0).then_some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "3.8"
services:
  web:
    image: nginx:alpine
    ports:
      - "8080:80"
      - 443
      - target: 53
        protocol: udp
    volumes:
      - ./app:/var/www
      - db_data:/data
    environment:
      - APP_ENV=prod
  db:
    image: postgres:16
    environment:
      POSTGRES_PASSWORD: secret
networks:
  backend: {}
volumes:
  db_data: {}
"#;

    #[test]
    fn test_parse_preserves_service_order() {
        let doc = ComposeDocument::parse(SAMPLE).unwrap();
        let names: Vec<_> = doc.services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);
        assert!(doc.networks.contains_key("backend"));
        assert!(doc.extra.contains_key("volumes"));
        assert!(doc.extra.contains_key("version"));
    }

    #[test]
    fn test_parse_port_forms() {
        let doc = ComposeDocument::parse(SAMPLE).unwrap();
        let web = doc.service("web").unwrap();
        let targets: Vec<_> = web.ports.iter().map(|p| p.target().unwrap()).collect();
        assert_eq!(targets[0].internal, 80);
        assert_eq!(targets[1].internal, 443);
        assert_eq!(targets[2].internal, 53);
        assert_eq!(targets[2].protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_rejects_missing_services() {
        let err = ComposeDocument::parse("networks: {}\n").unwrap_err();
        assert!(matches!(err, ShipyardError::ParseError(_)));
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let err = ComposeDocument::parse("services: [unclosed").unwrap_err();
        assert!(matches!(err, ShipyardError::ParseError(_)));
    }

    #[test]
    fn test_unknown_service_keys_are_kept() {
        let doc = ComposeDocument::parse(
            "services:\n  app:\n    image: busybox\n    privileged: true\n    command: [\"sh\"]\n",
        )
        .unwrap();
        let app = doc.service("app").unwrap();
        assert!(app.extra.contains_key("privileged"));
        assert!(app.extra.contains_key("command"));
    }

    #[test]
    fn test_short_port_with_host_ip_and_suffix() {
        let spec = PortSpec::Short("127.0.0.1:5353:53/udp".to_string());
        let target = spec.target().unwrap();
        assert_eq!(target.internal, 53);
        assert_eq!(target.protocol, Protocol::Udp);

        assert_eq!(spec.host_ip().as_deref(), Some("127.0.0.1"));
        assert_eq!(PortSpec::Short("[::1]:8080:80".to_string()).host_ip().as_deref(), Some("[::1]"));
        assert_eq!(PortSpec::Short("8080:80".to_string()).host_ip(), None);
        assert_eq!(PortSpec::Number(80).host_ip(), None);

        assert!(PortSpec::Short("8000-8010:8000-8010".to_string()).target().is_err());
        assert!(PortSpec::Number(70000).target().is_err());
    }

    #[test]
    fn test_mount_classification() {
        let spec = |s: &str| VolumeSpec::Short(s.to_string());
        assert_eq!(spec("./app:/var/www").classify(), MountSource::Relative("./app"));
        assert_eq!(spec("/etc:/etc").classify(), MountSource::Absolute("/etc"));
        assert_eq!(spec("db_data:/data").classify(), MountSource::Named("db_data"));
        assert_eq!(spec("/data").classify(), MountSource::Anonymous);
        assert_eq!(spec("~/.ssh:/keys").classify(), MountSource::Home("~/.ssh"));
    }

    #[test]
    fn test_memory_parsing() {
        assert_eq!(Scalar::Text("512M".into()).as_memory_bytes(), Some(512 << 20));
        assert_eq!(Scalar::Text("2g".into()).as_memory_bytes(), Some(2 << 30));
        assert_eq!(Scalar::Text("1.5GiB".into()).as_memory_bytes(), Some(1_610_612_736));
        assert_eq!(Scalar::Text("lots".into()).as_memory_bytes(), None);
        assert_eq!(Scalar::Text("0.5".into()).as_cpus(), Some(0.5));
    }

    #[test]
    fn test_environment_insert_if_absent() {
        let mut env = Environment::List(vec!["TZ=Europe/Paris".to_string()]);
        env.insert_if_absent("TZ", "UTC");
        assert_eq!(env, Environment::List(vec!["TZ=Europe/Paris".to_string()]));

        let mut env = Environment::Map(Mapping::new());
        env.insert_if_absent("TZ", "UTC");
        assert!(env.contains("TZ"));
    }
}
