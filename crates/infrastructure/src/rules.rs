//! Rules-file loading: YAML rule configs converted into domain rules.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use domain::common::entity::RuleId;
use domain::dns::entity::RecordType;
use domain::filter::entity::{Action, DomainPattern, Rule};

use crate::config::ConfigError;
use crate::constants::MAX_RULES;

// ── File schema ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleConfig>,
    #[serde(default)]
    ip_blacklist: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleConfig {
    id: String,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    enabled: bool,
    action: String,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    query_types: Vec<String>,
    #[serde(default)]
    description: String,
}

fn default_true() -> bool {
    true
}

// ── Loaded result ───────────────────────────────────────────────────

/// An IP or CIDR entry from `ip_blacklist`.
///
/// Parsed and validated for the future in-kernel drop map; not
/// enforced by the user-space pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCidr {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

#[derive(Debug)]
pub struct LoadedRules {
    pub rules: Vec<Rule>,
    pub ip_blacklist: Vec<IpCidr>,
}

/// Load and convert a rules file.
pub fn load_rules(path: &Path) -> Result<LoadedRules, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_rules(&content)
}

pub fn parse_rules(yaml: &str) -> Result<LoadedRules, ConfigError> {
    let file: RulesFile = serde_yaml_ng::from_str(yaml)?;

    if file.rules.len() > MAX_RULES {
        return Err(ConfigError::Validation {
            field: "rules".to_string(),
            message: format!("count {} exceeds maximum {MAX_RULES}", file.rules.len()),
        });
    }

    let mut rules = Vec::with_capacity(file.rules.len());
    for rc in file.rules {
        rules.push(convert_rule(rc)?);
    }

    let mut ip_blacklist = Vec::with_capacity(file.ip_blacklist.len());
    for entry in &file.ip_blacklist {
        ip_blacklist.push(parse_cidr(entry)?);
    }
    if !ip_blacklist.is_empty() {
        info!(
            count = ip_blacklist.len(),
            "ip_blacklist parsed (reserved for the in-kernel drop map)"
        );
    }

    Ok(LoadedRules {
        rules,
        ip_blacklist,
    })
}

fn convert_rule(rc: RuleConfig) -> Result<Rule, ConfigError> {
    let action = parse_action(&rc.action).ok_or_else(|| ConfigError::InvalidValue {
        field: format!("rules[{}].action", rc.id),
        value: rc.action.clone(),
        expected: "allow, block, log".to_string(),
    })?;

    let mut domains = Vec::with_capacity(rc.domains.len());
    for raw in &rc.domains {
        let pattern = DomainPattern::parse(raw).map_err(|e| ConfigError::Validation {
            field: format!("rules[{}].domains", rc.id),
            message: e.to_string(),
        })?;
        domains.push(pattern);
    }

    let mut query_types = Vec::with_capacity(rc.query_types.len());
    for name in &rc.query_types {
        query_types.push(parse_query_type(name).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: format!("rules[{}].query_types", rc.id),
                value: name.clone(),
                expected: "A, AAAA, CNAME, MX, NS, PTR, SOA, SRV, TXT, ANY, or a numeric code"
                    .to_string(),
            }
        })?);
    }

    Ok(Rule {
        id: RuleId(rc.id),
        priority: rc.priority,
        enabled: rc.enabled,
        action,
        domains,
        query_types,
        description: rc.description,
    })
}

fn parse_action(s: &str) -> Option<Action> {
    match s.to_ascii_lowercase().as_str() {
        "allow" => Some(Action::Allow),
        "block" => Some(Action::Block),
        "log" => Some(Action::Log),
        _ => None,
    }
}

/// Accepts mnemonic names (`"TXT"`) and raw numeric codes (`"65"`).
fn parse_query_type(s: &str) -> Option<u16> {
    if let Some(rt) = RecordType::from_name(s) {
        return Some(rt.to_wire());
    }
    s.parse::<u16>().ok()
}

/// Parse `"10.0.0.1"`, `"10.0.0.0/8"`, `"2001:db8::/32"` forms.
fn parse_cidr(s: &str) -> Result<IpCidr, ConfigError> {
    let invalid = |message: String| ConfigError::Validation {
        field: "ip_blacklist".to_string(),
        message,
    };

    let (ip_str, prefix) = match s.split_once('/') {
        Some((ip, prefix)) => {
            let len: u8 = prefix
                .parse()
                .map_err(|_| invalid(format!("invalid prefix length in '{s}'")))?;
            (ip, Some(len))
        }
        None => (s, None),
    };

    let addr: IpAddr = ip_str
        .parse()
        .map_err(|e| invalid(format!("invalid address '{s}': {e}")))?;

    let max = if addr.is_ipv4() { 32 } else { 128 };
    let prefix_len = prefix.unwrap_or(max);
    if prefix_len > max {
        return Err(invalid(format!(
            "prefix length {prefix_len} exceeds {max} in '{s}'"
        )));
    }

    Ok(IpCidr { addr, prefix_len })
}
