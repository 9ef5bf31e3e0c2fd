//! Resource handlers for Microsoft.Web
//!
//! This module defines:
//! - The resource types this provider manages
//! - Lock categories shared by handlers touching the same ARM parents
//! - Helpers turning validated attributes into typed configuration

pub mod app_service;
pub mod certificate;
pub mod function_app;
pub mod hostname_binding;
pub mod site;
pub mod slot;
pub mod swift_connection;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use azweb_core::orchestrator::ResourceHandler;
use azweb_core::provider::{ProviderError, ProviderResult, ResourceType};
use azweb_core::resource::{Resource, Value};
use azweb_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use regex::Regex;
use serde_json::{Map, Value as Json};

use crate::client::ArmClient;
use crate::config::ProviderConfig;

// =============================================================================
// Lock categories
// =============================================================================
//
// Locks are always acquired in this order: app service, virtual network,
// subnet.

pub const APP_SERVICE_LOCK: &str = "azurerm_app_service";
pub const VIRTUAL_NETWORK_LOCK: &str = "azurerm_virtual_network";
pub const SUBNET_LOCK: &str = "azurerm_subnet";

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, $schema:path) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn schema(&self) -> ResourceSchema {
                $schema()
            }
        }
    };
}

define_resource_type!(AppServiceType, "app_service", app_service::schema);
define_resource_type!(FunctionAppType, "function_app", function_app::schema);
define_resource_type!(AppServiceSlotType, "app_service_slot", slot::schema);
define_resource_type!(
    AppServiceCertificateType,
    "app_service_certificate",
    certificate::schema
);
define_resource_type!(
    CustomHostnameBindingType,
    "app_service_custom_hostname_binding",
    hostname_binding::schema
);
define_resource_type!(
    SwiftConnectionType,
    "app_service_virtual_network_swift_connection",
    swift_connection::schema
);

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(AppServiceType),
        Box::new(FunctionAppType),
        Box::new(AppServiceSlotType),
        Box::new(AppServiceCertificateType),
        Box::new(CustomHostnameBindingType),
        Box::new(SwiftConnectionType),
    ]
}

/// One handler per resource type, sharing a client
pub fn handlers(
    client: Arc<dyn ArmClient>,
    config: &ProviderConfig,
) -> Vec<Arc<dyn ResourceHandler>> {
    let subscription = config.subscription_id.clone();
    vec![
        Arc::new(app_service::AppServiceHandler::new(
            client.clone(),
            subscription.clone(),
        )),
        Arc::new(function_app::FunctionAppHandler::new(
            client.clone(),
            subscription.clone(),
            config.poll_interval,
        )),
        Arc::new(slot::SlotHandler::new(client.clone(), subscription.clone())),
        Arc::new(certificate::CertificateHandler::new(
            client.clone(),
            subscription.clone(),
        )),
        Arc::new(hostname_binding::HostnameBindingHandler::new(
            client.clone(),
            subscription,
        )),
        Arc::new(swift_connection::SwiftConnectionHandler::new(
            client,
            config.poll_interval,
        )),
    ]
}

// =============================================================================
// Validation
// =============================================================================

/// Schema and cross-field checks that need no ARM access
pub fn validate_resource(resource: &Resource) -> ProviderResult<()> {
    let resource_type = resource.id.resource_type.as_str();
    let schema = resource_types()
        .into_iter()
        .find(|t| t.name() == resource_type)
        .map(|t| t.schema())
        .ok_or_else(|| {
            ProviderError::unsupported(format!("Unknown resource type: {}", resource_type))
        })?;
    schema
        .validate_resource(resource)
        .map_err(ProviderError::validation)?;

    let attributes = &resource.attributes;
    let checked = match resource_type {
        app_service::RESOURCE_TYPE | slot::RESOURCE_TYPE => {
            site::SiteSettings::from_attributes(attributes).map(drop)
        }
        function_app::RESOURCE_TYPE => {
            function_app::FunctionAppSettings::from_attributes(attributes).map(drop)
        }
        certificate::RESOURCE_TYPE => {
            certificate::CertificateSettings::from_attributes(attributes).map(drop)
        }
        hostname_binding::RESOURCE_TYPE => {
            hostname_binding::HostnameBindingSettings::from_attributes(attributes).map(drop)
        }
        swift_connection::RESOURCE_TYPE => {
            swift_connection::SwiftConnectionSettings::from_attributes(attributes).map(drop)
        }
        _ => Ok(()),
    };
    checked.map_err(|e| e.for_resource(resource.id.clone()))
}

const APP_SERVICE_NAME: &str = r"^[0-9a-zA-Z][0-9a-zA-Z-]{0,58}[0-9a-zA-Z]?$";
const RESOURCE_GROUP_NAME: &str = r"^[-\w._()]{1,89}[-\w_()]$";

fn matches(pattern: &str, value: &str) -> Result<bool, String> {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .map_err(|e| e.to_string())
}

pub fn validate_app_service_name(value: &str) -> Result<(), String> {
    if matches(APP_SERVICE_NAME, value)? {
        Ok(())
    } else {
        Err(format!(
            "\"{}\" may only contain alphanumeric characters and dashes, up to 60 characters",
            value
        ))
    }
}

pub fn validate_resource_group_name(value: &str) -> Result<(), String> {
    if matches(RESOURCE_GROUP_NAME, value)? {
        Ok(())
    } else {
        Err(format!("\"{}\" is not a valid resource group name", value))
    }
}

/// Locations are written in the short form ARM uses in IDs
pub fn validate_location(value: &str) -> Result<(), String> {
    if !value.is_empty() && normalize_location(value) == value {
        Ok(())
    } else {
        Err(format!(
            "location \"{}\" must be written in short form, e.g. \"{}\"",
            value,
            normalize_location(value)
        ))
    }
}

pub fn validate_arm_id(value: &str) -> Result<(), String> {
    crate::id::ArmResourceId::parse(value)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn custom(name: &str, validate: fn(&str) -> Result<(), String>) -> AttributeType {
    AttributeType::Custom {
        name: name.to_string(),
        validate,
    }
}

pub fn app_service_name_type() -> AttributeType {
    custom("AppServiceName", validate_app_service_name)
}

pub fn arm_id_type() -> AttributeType {
    custom("ArmResourceId", validate_arm_id)
}

/// `name`, `resource_group_name`, `location` and `tags`
pub fn base_schema(resource_type: &str) -> ResourceSchema {
    ResourceSchema::new(resource_type)
        .attribute(
            AttributeSchema::new("name", app_service_name_type())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "resource_group_name",
                custom("ResourceGroupName", validate_resource_group_name),
            )
            .required()
            .force_new(),
        )
        .attribute(
            AttributeSchema::new("location", custom("Location", validate_location))
                .required()
                .force_new()
                .with_description("Azure region, e.g. westeurope"),
        )
        .attribute(AttributeSchema::new(
            "tags",
            AttributeType::Map(Box::new(AttributeType::String)),
        ))
}

// =============================================================================
// Attribute access
// =============================================================================

pub fn required_str(attributes: &HashMap<String, Value>, key: &str) -> ProviderResult<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::validation(format!("\"{}\" is required", key)))
}

pub fn optional_str(attributes: &HashMap<String, Value>, key: &str) -> Option<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn optional_bool(attributes: &HashMap<String, Value>, key: &str) -> Option<bool> {
    attributes.get(key).and_then(Value::as_bool)
}

pub fn string_map(attributes: &HashMap<String, Value>, key: &str) -> BTreeMap<String, String> {
    attributes
        .get(key)
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// ARM reports display names ("West Europe"); compare the short form
pub fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}

pub fn to_json_map(map: &BTreeMap<String, String>) -> Json {
    Json::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Json::String(v.clone())))
            .collect::<Map<String, Json>>(),
    )
}

/// A JSON object of strings as an attribute map
pub fn flatten_string_map(json: Option<&Json>) -> Value {
    let map = json
        .and_then(Json::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), Value::from(s))))
                .collect()
        })
        .unwrap_or_default();
    Value::Map(map)
}

/// Copy a JSON field into `attributes` under `key` when present
pub fn set_from_json(attributes: &mut HashMap<String, Value>, key: &str, json: Option<&Json>) {
    if let Some(value) = json.and_then(Value::from_json) {
        attributes.insert(key.to_string(), value);
    }
}
