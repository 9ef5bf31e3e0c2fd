//! ARM resource identifiers
//!
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]`

use std::fmt;

use azweb_core::provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("ID \"{0}\" is not an ARM resource ID: it must start with /subscriptions/")]
    NotArmId(String),

    #[error("ID \"{id}\" is missing the {segment} segment")]
    MissingSegment { id: String, segment: &'static str },

    #[error("ID \"{0}\" has a type segment without a name")]
    OddSegments(String),

    #[error("ID \"{id}\" is not a {expected} ID")]
    WrongType { id: String, expected: String },
}

impl From<IdError> for ProviderError {
    fn from(e: IdError) -> Self {
        ProviderError::validation(e.to_string())
    }
}

/// A parsed ARM resource ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    /// Provider namespace (e.g., "Microsoft.Web")
    pub namespace: String,
    /// Ordered `(type, name)` pairs below the namespace
    pub segments: Vec<(String, String)>,
}

impl ArmResourceId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            namespace: namespace.into(),
            segments: vec![(resource_type.into(), name.into())],
        }
    }

    pub fn parse(id: &str) -> Result<Self, IdError> {
        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();
        if parts.len() < 2 || !parts[0].eq_ignore_ascii_case("subscriptions") {
            return Err(IdError::NotArmId(id.to_string()));
        }
        let subscription_id = non_empty(parts.get(1), id, "subscriptions")?;

        if !parts
            .get(2)
            .is_some_and(|p| p.eq_ignore_ascii_case("resourceGroups"))
        {
            return Err(IdError::MissingSegment {
                id: id.to_string(),
                segment: "resourceGroups",
            });
        }
        let resource_group = non_empty(parts.get(3), id, "resourceGroups")?;

        if !parts
            .get(4)
            .is_some_and(|p| p.eq_ignore_ascii_case("providers"))
        {
            return Err(IdError::MissingSegment {
                id: id.to_string(),
                segment: "providers",
            });
        }
        let namespace = non_empty(parts.get(5), id, "providers")?;

        let rest = &parts[6.min(parts.len())..];
        if rest.is_empty() {
            return Err(IdError::MissingSegment {
                id: id.to_string(),
                segment: "resource type",
            });
        }
        if rest.len() % 2 != 0 || rest.iter().any(|p| p.is_empty()) {
            return Err(IdError::OddSegments(id.to_string()));
        }

        Ok(Self {
            subscription_id,
            resource_group,
            namespace,
            segments: rest
                .chunks(2)
                .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                .collect(),
        })
    }

    /// Parse and require the given namespace and type path (e.g., `["sites", "slots"]`)
    pub fn parse_as(id: &str, namespace: &str, types: &[&str]) -> Result<Self, IdError> {
        let parsed = Self::parse(id)?;
        let matches = parsed.namespace.eq_ignore_ascii_case(namespace)
            && parsed.segments.len() == types.len()
            && parsed
                .segments
                .iter()
                .zip(types)
                .all(|((t, _), expected)| t.eq_ignore_ascii_case(expected));
        if !matches {
            return Err(IdError::WrongType {
                id: id.to_string(),
                expected: format!("{}/{}", namespace, types.join("/")),
            });
        }
        Ok(parsed)
    }

    /// A nested resource below this one
    pub fn child(&self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.segments.push((resource_type.into(), name.into()));
        child
    }

    /// Name of the last segment
    pub fn name(&self) -> &str {
        self.segments.last().map(|(_, n)| n.as_str()).unwrap_or("")
    }

    /// Name of the first segment with the given type, compared case-insensitively
    pub fn segment(&self, resource_type: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(resource_type))
            .map(|(_, n)| n.as_str())
    }

    /// The enclosing resource, if this one is nested
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }
}

fn non_empty(part: Option<&&str>, id: &str, segment: &'static str) -> Result<String, IdError> {
    match part {
        Some(p) if !p.is_empty() => Ok(p.to_string()),
        _ => Err(IdError::MissingSegment {
            id: id.to_string(),
            segment,
        }),
    }
}

impl fmt::Display for ArmResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            self.subscription_id, self.resource_group, self.namespace
        )?;
        for (resource_type, name) in &self.segments {
            write!(f, "/{}/{}", resource_type, name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBNET: &str = "/subscriptions/0000/resourceGroups/rg-net/providers/Microsoft.Network/virtualNetworks/vnet-a/subnets/apps";

    #[test]
    fn parse_nested_id() {
        let id = ArmResourceId::parse(SUBNET).unwrap();
        assert_eq!(id.subscription_id, "0000");
        assert_eq!(id.resource_group, "rg-net");
        assert_eq!(id.namespace, "Microsoft.Network");
        assert_eq!(id.segment("virtualnetworks"), Some("vnet-a"));
        assert_eq!(id.name(), "apps");
        assert_eq!(id.to_string(), SUBNET);
    }

    #[test]
    fn parent_drops_last_segment() {
        let id = ArmResourceId::parse(SUBNET).unwrap();
        let vnet = id.parent().unwrap();
        assert_eq!(vnet.name(), "vnet-a");
        assert!(vnet.parent().is_none());
    }

    #[test]
    fn parse_as_checks_type_path() {
        assert!(ArmResourceId::parse_as(SUBNET, "Microsoft.Network", &["virtualNetworks", "subnets"]).is_ok());
        let err = ArmResourceId::parse_as(SUBNET, "Microsoft.Web", &["sites"]).unwrap_err();
        assert!(matches!(err, IdError::WrongType { .. }));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            ArmResourceId::parse("not-an-id"),
            Err(IdError::NotArmId(_))
        ));
        assert!(matches!(
            ArmResourceId::parse("/subscriptions/0000/providers/Microsoft.Web/sites/a"),
            Err(IdError::MissingSegment { segment: "resourceGroups", .. })
        ));
        assert!(matches!(
            ArmResourceId::parse("/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites"),
            Err(IdError::OddSegments(_))
        ));
    }

    #[test]
    fn child_builds_nested_id() {
        let site = ArmResourceId::new("0000", "rg", "Microsoft.Web", "sites", "web");
        let binding = site.child("hostNameBindings", "www.example.com");
        assert_eq!(
            binding.to_string(),
            "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Web/sites/web/hostNameBindings/www.example.com"
        );
    }
}
