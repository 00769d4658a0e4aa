//! Feed line processors.
//!
//! Each processor turns one feed line into entities. Blank lines and `#`
//! comments produce nothing.

use std::net::IpAddr;

use chrono::Utc;
use serde_json::json;
use url::Url;

use crate::errors::IngestError;
use crate::ingest::context::IngestContext;
use cti_graph_shared::{Entity, EntityType, StixId};

/// Signature shared by every processor.
pub type Processor = fn(&str, &mut IngestContext) -> Result<Vec<Entity>, IngestError>;

fn content(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        None
    } else {
        Some(line)
    }
}

fn indicator(name: &str, pattern: String) -> Entity {
    Entity::new(EntityType::Indicator)
        .with_property("name", name)
        .with_property("pattern", pattern)
        .with_property("pattern_type", "stix")
        .with_property("indicator_types", json!(["malicious-activity"]))
        .with_property("valid_from", Utc::now().to_rfc3339())
}

fn ip_indicator(
    raw: &str,
    ctx: &mut IngestContext,
    out: &mut Vec<Entity>,
) -> Result<StixId, IngestError> {
    let addr: IpAddr = raw
        .parse()
        .map_err(|_| IngestError::parse(format!("Not an IP address: {}", raw)))?;
    let object = match addr {
        IpAddr::V4(_) => "ipv4-addr",
        IpAddr::V6(_) => "ipv6-addr",
    };
    let name = addr.to_string();
    Ok(ctx.library_entity(EntityType::Indicator, &name, out, || {
        indicator(&name, format!("[{}:value = '{}']", object, name))
    }))
}

fn domain_indicator(
    raw: &str,
    ctx: &mut IngestContext,
    out: &mut Vec<Entity>,
) -> Result<StixId, IngestError> {
    let name = raw.trim_end_matches('.').to_lowercase();
    let valid = name.contains('.')
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if !valid {
        return Err(IngestError::parse(format!("Not a domain name: {}", raw)));
    }
    Ok(ctx.library_entity(EntityType::Indicator, &name, out, || {
        indicator(&name, format!("[domain-name:value = '{}']", name))
    }))
}

/// One IPv4 or IPv6 address per line.
pub fn single_ip(line: &str, ctx: &mut IngestContext) -> Result<Vec<Entity>, IngestError> {
    let mut out = Vec::new();
    if let Some(raw) = content(line) {
        ip_indicator(raw, ctx, &mut out)?;
    }
    Ok(out)
}

/// One domain name per line.
pub fn single_domain(line: &str, ctx: &mut IngestContext) -> Result<Vec<Entity>, IngestError> {
    let mut out = Vec::new();
    if let Some(raw) = content(line) {
        domain_indicator(raw, ctx, &mut out)?;
    }
    Ok(out)
}

/// One absolute URL per line.
pub fn single_url(line: &str, ctx: &mut IngestContext) -> Result<Vec<Entity>, IngestError> {
    let mut out = Vec::new();
    let Some(raw) = content(line) else {
        return Ok(out);
    };
    let url = Url::parse(raw).map_err(|e| IngestError::parse(format!("Invalid URL {}: {}", raw, e)))?;
    let name = url.to_string();
    ctx.library_entity(EntityType::Indicator, &name, &mut out, || {
        indicator(&name, format!("[url:value = '{}']", name))
    });
    Ok(out)
}

/// One MD5, SHA-1 or SHA-256 file hash per line.
pub fn single_hash(line: &str, ctx: &mut IngestContext) -> Result<Vec<Entity>, IngestError> {
    let mut out = Vec::new();
    let Some(raw) = content(line) else {
        return Ok(out);
    };
    if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IngestError::parse(format!("Not a hex digest: {}", raw)));
    }
    let algorithm = match raw.len() {
        32 => "MD5",
        40 => "SHA-1",
        64 => "SHA-256",
        n => return Err(IngestError::parse(format!("Unexpected digest length {}", n))),
    };
    let name = raw.to_lowercase();
    ctx.library_entity(EntityType::Indicator, &name, &mut out, || {
        indicator(&name, format!("[file:hashes.'{}' = '{}']", algorithm, name))
    });
    Ok(out)
}

/// C2 master list lines: `domain,ip[|ip...],nameservers,ns ips,description,manual url`.
///
/// The malware family is named after the manual page. Each line links the
/// domain and address indicators to the family's C2 attack pattern, which
/// uses the malware.
pub fn c2_masterlist(line: &str, ctx: &mut IngestContext) -> Result<Vec<Entity>, IngestError> {
    let mut out = Vec::new();
    let Some(raw) = content(line) else {
        return Ok(out);
    };
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return Err(IngestError::parse(format!(
            "Expected 6 fields, found {}",
            fields.len()
        )));
    }
    let family = Url::parse(fields[5])
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|file| file.split('.').next().map(str::to_string))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| IngestError::parse(format!("No malware family in {}", fields[5])))?;
    let description = fields[4];

    let mut indicators = vec![domain_indicator(fields[0], ctx, &mut out)?];
    for ip in fields[1].split('|').filter(|ip| !ip.is_empty()) {
        indicators.push(ip_indicator(ip, ctx, &mut out)?);
    }

    let malware_name = format!("{} Malware", family);
    let malware = ctx.library_entity(EntityType::Malware, &malware_name, &mut out, || {
        Entity::new(EntityType::Malware)
            .with_property("name", malware_name.as_str())
            .with_property("is_family", true)
            .with_property("description", description)
            .with_property("external_references", json!([{"source_name": "manual", "url": fields[5]}]))
    });
    let c2_name = format!("{} C2", family);
    let c2 = ctx.library_entity(EntityType::AttackPattern, &c2_name, &mut out, || {
        Entity::new(EntityType::AttackPattern)
            .with_property("name", c2_name.as_str())
            .with_property("description", description)
    });

    relate(ctx, &mut out, &c2, "uses", &malware);
    for indicator in &indicators {
        relate(ctx, &mut out, indicator, "indicates", &c2);
    }
    Ok(out)
}

fn relate(ctx: &mut IngestContext, out: &mut Vec<Entity>, source: &StixId, kind: &str, target: &StixId) {
    let key = format!("{} {} {}", source, kind, target);
    ctx.library_entity(EntityType::Relationship, &key, out, || {
        Entity::relationship(source, kind, target)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cti_graph_shared::marking::Tlp;

    fn ctx() -> IngestContext {
        IngestContext::new(
            StixId::generate(EntityType::Identity),
            vec![Tlp::Green.id()],
        )
    }

    #[test]
    fn test_single_ip() {
        let mut ctx = ctx();
        let out = single_ip("10.0.0.1", &mut ctx).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_str("pattern"), Some("[ipv4-addr:value = '10.0.0.1']"));
        assert_eq!(out[0].created_by_ref.as_ref(), Some(ctx.author()));
        assert_eq!(out[0].object_marking_refs, vec![Tlp::Green.id()]);

        // Repeats within a request are not emitted again.
        assert!(single_ip("10.0.0.1", &mut ctx).unwrap().is_empty());
        assert!(single_ip("# comment", &mut ctx).unwrap().is_empty());
        assert!(single_ip("not-an-ip", &mut ctx).is_err());
    }

    #[test]
    fn test_single_hash_detects_algorithm() {
        let mut ctx = ctx();
        let out = single_hash(&"a".repeat(64), &mut ctx).unwrap();
        assert!(out[0].get_str("pattern").unwrap().contains("SHA-256"));
        assert!(single_hash("abc", &mut ctx).is_err());
        assert!(single_hash(&"z".repeat(32), &mut ctx).is_err());
    }

    #[test]
    fn test_single_domain_and_url() {
        let mut ctx = ctx();
        assert_eq!(single_domain("Evil.Example.com.", &mut ctx).unwrap().len(), 1);
        assert!(single_domain("no_dots", &mut ctx).is_err());
        assert_eq!(single_url("http://evil.example.com/x", &mut ctx).unwrap().len(), 1);
        assert!(single_url("not a url", &mut ctx).is_err());
    }

    #[test]
    fn test_c2_masterlist_line() {
        let mut ctx = ctx();
        let line = "bad.example.com,10.0.0.1|10.0.0.2,ns1.example.com,10.0.0.53,Master of a C&C,http://feeds.example.com/manual/cryptolocker.txt";
        let out = c2_masterlist(line, &mut ctx).unwrap();

        let count = |t: EntityType| out.iter().filter(|e| e.entity_type == t).count();
        assert_eq!(count(EntityType::Indicator), 3);
        assert_eq!(count(EntityType::Malware), 1);
        assert_eq!(count(EntityType::AttackPattern), 1);
        assert_eq!(count(EntityType::Relationship), 4);
        assert!(out
            .iter()
            .any(|e| e.get_str("name") == Some("cryptolocker Malware")));

        // A second line of the same family only adds its new indicator.
        let line = "other.example.com,10.0.0.1,ns1.example.com,10.0.0.53,Master of a C&C,http://feeds.example.com/manual/cryptolocker.txt";
        let out = c2_masterlist(line, &mut ctx).unwrap();
        assert_eq!(out.len(), 2);
        assert!(c2_masterlist("too,few", &mut ctx).is_err());
    }
}
