use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};

/// What the readiness logic needs to know about one compose service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComposeServiceDefinition {
    pub name: String,
    /// Direct `image`, or the base images of the service's Dockerfile.
    pub images: BTreeSet<String>,
    pub labels: BTreeMap<String, String>,
    /// Container-side ports, in declaration order.
    pub ports: Vec<u16>,
    pub has_healthcheck: bool,
    pub profiles: Vec<String>,
}

impl ComposeServiceDefinition {
    /// Read the fields of interest from a service mapping. Build contexts
    /// are resolved by the caller.
    pub fn from_mapping(name: &str, map: &Mapping) -> Self {
        let mut def = ComposeServiceDefinition {
            name: name.to_string(),
            ..Default::default()
        };
        if let Some(image) = map.get("image").and_then(scalar) {
            def.images.insert(image);
        }
        if let Some(labels) = map.get("labels") {
            def.labels = parse_labels(labels);
        }
        if let Some(Value::Sequence(ports)) = map.get("ports") {
            for entry in ports {
                for port in parse_port_entry(entry) {
                    if !def.ports.contains(&port) {
                        def.ports.push(port);
                    }
                }
            }
        }
        def.has_healthcheck = map.get("healthcheck").is_some_and(healthcheck_enabled);
        if let Some(Value::Sequence(profiles)) = map.get("profiles") {
            def.profiles = profiles.iter().filter_map(scalar).collect();
        }
        def
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Labels whose key starts with `prefix`.
    pub fn labels_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.labels
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// String form of a YAML scalar.
pub(crate) fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Labels in map form (`key: value`) or list form (`- key=value`).
fn parse_labels(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let key = scalar(k)?;
                let value = if v.is_null() { String::new() } else { scalar(v)? };
                Some((key, value))
            })
            .collect(),
        Value::Sequence(items) => items
            .iter()
            .filter_map(scalar)
            .map(|item| match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (item, String::new()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Container ports of one `ports:` entry.
///
/// Short syntax: `"80"`, `"8080:80"`, `"127.0.0.1:8080:80/udp"`,
/// `"9090-9091:8080-8081"`. Long syntax: a mapping with `target`.
pub(crate) fn parse_port_entry(entry: &Value) -> Vec<u16> {
    match entry {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()).into_iter().collect(),
        Value::String(s) => parse_short_port(s),
        Value::Mapping(map) => match map.get("target") {
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()).into_iter().collect(),
            Some(Value::String(s)) => parse_port_range(s),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn parse_short_port(spec: &str) -> Vec<u16> {
    let without_proto = spec.split('/').next().unwrap_or(spec);
    let container = without_proto.rsplit(':').next().unwrap_or(without_proto);
    parse_port_range(container)
}

fn parse_port_range(s: &str) -> Vec<u16> {
    let s = s.trim();
    match s.split_once('-') {
        Some((start, end)) => match (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
            (Ok(start), Ok(end)) if start <= end => (start..=end).collect(),
            _ => Vec::new(),
        },
        None => s.parse::<u16>().into_iter().collect(),
    }
}

fn healthcheck_enabled(value: &Value) -> bool {
    let Value::Mapping(map) = value else {
        return false;
    };
    if map.get("disable").and_then(Value::as_bool) == Some(true) {
        return false;
    }
    match map.get("test") {
        Some(Value::Sequence(test)) => test.first().and_then(Value::as_str) != Some("NONE"),
        Some(Value::String(test)) => test != "NONE",
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(yaml: &str) -> ComposeServiceDefinition {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        ComposeServiceDefinition::from_mapping("svc", value.as_mapping().unwrap())
    }

    #[test]
    fn labels_in_both_forms() {
        let map = def("labels:\n  a: '1'\n  b: true\n");
        assert_eq!(map.label("a"), Some("1"));
        assert_eq!(map.label("b"), Some("true"));

        let list = def("labels:\n  - a=1\n  - b=x=y\n  - flag\n");
        assert_eq!(list.label("a"), Some("1"));
        assert_eq!(list.label("b"), Some("x=y"));
        assert_eq!(list.label("flag"), Some(""));
    }

    #[test]
    fn ports_in_short_and_long_syntax() {
        let d = def(
            "ports:\n  - 80\n  - \"8080:81\"\n  - \"127.0.0.1:9000:82/udp\"\n  - \"9090-9091:8000-8001\"\n  - target: 5432\n    published: 15432\n  - \"80\"\n",
        );
        assert_eq!(d.ports, vec![80, 81, 82, 8000, 8001, 5432]);
    }

    #[test]
    fn healthcheck_presence() {
        assert!(def("healthcheck:\n  test: [\"CMD\", \"true\"]\n").has_healthcheck);
        assert!(!def("healthcheck:\n  disable: true\n").has_healthcheck);
        assert!(!def("healthcheck:\n  test: [\"NONE\"]\n").has_healthcheck);
        assert!(!def("image: x\n").has_healthcheck);
    }

    #[test]
    fn image_and_profiles() {
        let d = def("image: redis:7\nprofiles: [cache, full]\n");
        assert_eq!(d.images.iter().collect::<Vec<_>>(), vec!["redis:7"]);
        assert_eq!(d.profiles, vec!["cache", "full"]);
    }
}
