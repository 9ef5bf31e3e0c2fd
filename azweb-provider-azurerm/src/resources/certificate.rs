//! `app_service_certificate` - an uploaded or Key Vault backed certificate
//! (`Microsoft.Web/certificates/{name}`)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use azweb_core::orchestrator::ResourceHandler;
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use azweb_core::timeouts::OperationContext;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::{Value as Json, json};

use super::{
    arm_id_type, base_schema, custom, flatten_string_map, normalize_location, optional_str,
    required_str, set_from_json, string_map, to_json_map,
};
use crate::client::{ArmClient, WEB_API_VERSION};
use crate::id::ArmResourceId;

pub const RESOURCE_TYPE: &str = "app_service_certificate";

const SECRET_ID: &str =
    r"^https://[0-9a-zA-Z-]+\.vault\.[0-9a-z.]+/secrets/([0-9a-zA-Z-]+)(?:/[0-9a-zA-Z]+)?/?$";

/// Computed attributes: (attribute name, ARM property)
const COMPUTED_FIELDS: &[(&str, &str)] = &[
    ("thumbprint", "thumbprint"),
    ("subject_name", "subjectName"),
    ("issuer", "issuer"),
    ("issue_date", "issueDate"),
    ("expiration_date", "expirationDate"),
    ("friendly_name", "friendlyName"),
    ("host_names", "hostNames"),
];

fn validate_base64(value: &str) -> Result<(), String> {
    STANDARD
        .decode(value)
        .map(|_| ())
        .map_err(|e| format!("pfx_blob is not valid base64: {}", e))
}

/// Secret name from a Key Vault secret URL
fn secret_name(secret_id: &str) -> Result<String, String> {
    let re = Regex::new(SECRET_ID).map_err(|e| e.to_string())?;
    re.captures(secret_id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| format!("\"{}\" is not a Key Vault secret ID", secret_id))
}

fn validate_secret_id(value: &str) -> Result<(), String> {
    secret_name(value).map(|_| ())
}

pub fn schema() -> ResourceSchema {
    let mut schema = base_schema(RESOURCE_TYPE)
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("pfx_blob", custom("Base64", validate_base64))
                .force_new()
                .write_only(),
        )
        .attribute(
            AttributeSchema::new("password", AttributeType::String)
                .force_new()
                .write_only(),
        )
        .attribute(
            AttributeSchema::new(
                "key_vault_secret_id",
                custom("KeyVaultSecretId", validate_secret_id),
            )
            .force_new()
            .write_only(),
        )
        .attribute(AttributeSchema::new("key_vault_id", arm_id_type()).force_new())
        .with_description("Manages an App Service certificate");

    for (attr, _) in COMPUTED_FIELDS {
        let attr_type = if *attr == "host_names" {
            AttributeType::List(Box::new(AttributeType::String))
        } else {
            AttributeType::String
        };
        schema = schema.attribute(AttributeSchema::new(*attr, attr_type).computed());
    }
    schema
}

/// Where the certificate material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    Pfx {
        blob: String,
        password: Option<String>,
    },
    KeyVault {
        vault_id: String,
        secret_name: String,
    },
}

/// Typed certificate configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSettings {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub source: CertificateSource,
    pub tags: BTreeMap<String, String>,
}

impl CertificateSettings {
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        let pfx = optional_str(attributes, "pfx_blob");
        let password = optional_str(attributes, "password");
        let secret_id = optional_str(attributes, "key_vault_secret_id");

        let source = match (pfx, secret_id) {
            (Some(blob), None) => CertificateSource::Pfx { blob, password },
            (None, Some(secret_id)) => {
                if password.is_some() {
                    return Err(ProviderError::validation(
                        "\"password\" can only be used with \"pfx_blob\"",
                    ));
                }
                let vault_id = optional_str(attributes, "key_vault_id").ok_or_else(|| {
                    ProviderError::validation(
                        "\"key_vault_id\" is required when \"key_vault_secret_id\" is set",
                    )
                })?;
                CertificateSource::KeyVault {
                    vault_id,
                    secret_name: secret_name(&secret_id).map_err(ProviderError::validation)?,
                }
            }
            (Some(_), Some(_)) => {
                return Err(ProviderError::validation(
                    "only one of \"pfx_blob\" or \"key_vault_secret_id\" can be set",
                ));
            }
            (None, None) => {
                return Err(ProviderError::validation(
                    "one of \"pfx_blob\" or \"key_vault_secret_id\" must be set",
                ));
            }
        };

        Ok(Self {
            name: required_str(attributes, "name")?,
            resource_group: required_str(attributes, "resource_group_name")?,
            location: required_str(attributes, "location")?,
            source,
            tags: string_map(attributes, "tags"),
        })
    }

    pub fn body(&self) -> Json {
        let properties = match &self.source {
            CertificateSource::Pfx { blob, password } => json!({
                "pfxBlob": blob,
                "password": password.clone().unwrap_or_default(),
            }),
            CertificateSource::KeyVault {
                vault_id,
                secret_name,
            } => json!({
                "keyVaultId": vault_id,
                "keyVaultSecretName": secret_name,
            }),
        };
        json!({
            "location": self.location,
            "tags": to_json_map(&self.tags),
            "properties": properties,
        })
    }
}

pub struct CertificateHandler {
    client: Arc<dyn ArmClient>,
    subscription_id: String,
}

impl CertificateHandler {
    pub fn new(client: Arc<dyn ArmClient>, subscription_id: String) -> Self {
        Self {
            client,
            subscription_id,
        }
    }
}

fn parse_certificate_id(identifier: &str) -> ProviderResult<ArmResourceId> {
    Ok(ArmResourceId::parse_as(
        identifier,
        "Microsoft.Web",
        &["certificates"],
    )?)
}

#[async_trait]
impl ResourceHandler for CertificateHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn identifier_for(&self, resource: &Resource) -> ProviderResult<String> {
        let settings = CertificateSettings::from_attributes(&resource.attributes)?;
        Ok(ArmResourceId::new(
            &self.subscription_id,
            &settings.resource_group,
            "Microsoft.Web",
            "certificates",
            &settings.name,
        )
        .to_string())
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<String> {
        let id = self.identifier_for(resource)?;
        let settings = CertificateSettings::from_attributes(&resource.attributes)?;
        self.client
            .put(ctx, &id, WEB_API_VERSION, &settings.body())
            .await?;
        Ok(id)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        identifier: &str,
        resource: &Resource,
    ) -> ProviderResult<()> {
        let settings = CertificateSettings::from_attributes(&resource.attributes)?;
        self.client
            .put(ctx, identifier, WEB_API_VERSION, &settings.body())
            .await?;
        Ok(())
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        identifier: &str,
    ) -> ProviderResult<Option<HashMap<String, Value>>> {
        let id = parse_certificate_id(identifier)?;
        let Some(body) = self.client.get(identifier, WEB_API_VERSION).await? else {
            return Ok(None);
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(id.name()));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(id.resource_group.as_str()),
        );
        if let Some(location) = body.get("location").and_then(Json::as_str) {
            attributes.insert(
                "location".to_string(),
                Value::String(normalize_location(location)),
            );
        }
        attributes.insert("tags".to_string(), flatten_string_map(body.get("tags")));

        let properties = body.get("properties");
        set_from_json(
            &mut attributes,
            "key_vault_id",
            properties.and_then(|p| p.get("keyVaultId")),
        );
        for (attr, arm) in COMPUTED_FIELDS {
            set_from_json(&mut attributes, attr, properties.and_then(|p| p.get(*arm)));
        }
        Ok(Some(attributes))
    }

    async fn delete(&self, ctx: &OperationContext, identifier: &str) -> ProviderResult<()> {
        parse_certificate_id(identifier)?;
        self.client.delete(ctx, identifier, WEB_API_VERSION).await
    }
}
