//! Configuration model and the build step that turns it into the immutable
//! resource registry.
//!
//! The serde structs mirror the external configuration format: camelCase
//! field names, property mappers tagged by a `type` discriminator. `build`
//! runs once at startup and fails fast with a [`ConfigError`] on anything a
//! request handler would otherwise trip over later: unresolved super types,
//! inheritance cycles, malformed DN templates and base filters, collections
//! without a naming strategy.

use crate::connection::SearchScope;
use crate::error::{ConfigError, ConfigResult};
use crate::ldap::{Dn, DnTemplate, LdapFilter};
use crate::mapper::{
    ConstantMapper, JsonMapper, ObjectMapper, PropertyMapper, ReferenceMapper, ResourceTypeMapper,
    SimpleMapper, SimpleType, Writability,
};
use crate::naming::NamingStrategy;
use crate::path::JsonPointer;
use crate::resource::{Resource, ResourceSet};
use crate::routing::{SubResource, SubResourceKind};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Native connection bootstrap parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirectoryConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

/// The root configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Attribute carrying the entry revision for conditional operations.
    #[serde(default = "default_revision_attribute")]
    pub revision_attribute: String,
    #[serde(default)]
    pub resource_types: BTreeMap<String, ResourceTypeConfig>,
    /// Top-level routes: URL segment to sub-resource definition.
    #[serde(default)]
    pub routes: BTreeMap<String, SubResourceConfig>,
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

fn default_revision_attribute() -> String {
    "etag".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceTypeConfig {
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub object_classes: Vec<String>,
    #[serde(default)]
    pub supported_actions: Vec<String>,
    /// JSON pointer of the subtype discriminator field.
    #[serde(default)]
    pub resource_type_property: Option<String>,
    #[serde(default)]
    pub include_all_user_attributes_by_default: bool,
    #[serde(default)]
    pub excluded_default_user_attributes: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyMapperConfig>,
    #[serde(default)]
    pub sub_resources: BTreeMap<String, SubResourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PropertyMapperConfig {
    /// The resolved resource type id, read-only.
    ResourceType {},
    #[serde(rename_all = "camelCase")]
    Constant { value: Value },
    #[serde(rename_all = "camelCase")]
    Simple {
        ldap_attribute: String,
        #[serde(default)]
        value_type: ValueTypeConfig,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        multi_valued: bool,
        #[serde(default)]
        writability: WritabilityConfig,
        #[serde(default)]
        default_values: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Json {
        ldap_attribute: String,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        multi_valued: bool,
        #[serde(default)]
        writability: WritabilityConfig,
        #[serde(default)]
        matching_rule: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reference {
        ldap_attribute: String,
        base_dn: String,
        #[serde(default)]
        scope: ScopeConfig,
        primary_key: String,
        #[serde(default)]
        base_search_filter: Option<String>,
        /// JSON shape of the referenced entry.
        properties: BTreeMap<String, PropertyMapperConfig>,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        multi_valued: bool,
        #[serde(default)]
        writability: WritabilityConfig,
    },
    #[serde(rename_all = "camelCase")]
    Object {
        properties: BTreeMap<String, PropertyMapperConfig>,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueTypeConfig {
    #[default]
    String,
    Integer,
    Boolean,
    DateTime,
    Binary,
}

impl From<ValueTypeConfig> for SimpleType {
    fn from(value: ValueTypeConfig) -> Self {
        match value {
            ValueTypeConfig::String => SimpleType::String,
            ValueTypeConfig::Integer => SimpleType::Integer,
            ValueTypeConfig::Boolean => SimpleType::Boolean,
            ValueTypeConfig::DateTime => SimpleType::DateTime,
            ValueTypeConfig::Binary => SimpleType::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WritabilityConfig {
    ReadOnly,
    ReadOnlyDiscardWrites,
    CreateOnly,
    CreateOnlyDiscardWrites,
    #[default]
    ReadWrite,
}

impl From<WritabilityConfig> for Writability {
    fn from(value: WritabilityConfig) -> Self {
        match value {
            WritabilityConfig::ReadOnly => Writability::ReadOnly,
            WritabilityConfig::ReadOnlyDiscardWrites => Writability::ReadOnlyDiscardWrites,
            WritabilityConfig::CreateOnly => Writability::CreateOnly,
            WritabilityConfig::CreateOnlyDiscardWrites => Writability::CreateOnlyDiscardWrites,
            WritabilityConfig::ReadWrite => Writability::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeConfig {
    Base,
    One,
    #[default]
    Subtree,
}

impl From<ScopeConfig> for SearchScope {
    fn from(value: ScopeConfig) -> Self {
        match value {
            ScopeConfig::Base => SearchScope::Base,
            ScopeConfig::One => SearchScope::One,
            ScopeConfig::Subtree => SearchScope::Subtree,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubResourceConfig {
    #[serde(rename = "type")]
    pub kind: SubResourceKindConfig,
    /// Target resource type id.
    pub resource: String,
    pub dn_template: String,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub naming_strategy: Option<NamingStrategyConfig>,
    #[serde(default)]
    pub glue_object_classes: Vec<String>,
    #[serde(default)]
    pub base_search_filter: Option<String>,
    #[serde(default)]
    pub flatten_subtree: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubResourceKindConfig {
    Collection,
    Singleton,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NamingStrategyConfig {
    #[serde(rename_all = "camelCase")]
    ClientDnNaming { dn_attribute: String },
    #[serde(rename_all = "camelCase")]
    ClientNaming {
        dn_attribute: String,
        id_attribute: String,
    },
    #[serde(rename_all = "camelCase")]
    ServerNaming {
        dn_attribute: String,
        id_attribute: String,
    },
}

/// The built, immutable model a gateway serves from.
#[derive(Debug)]
pub struct GatewayModel {
    pub resources: ResourceSet,
    pub routes: Vec<SubResource>,
    pub revision_attribute: String,
}

impl GatewayConfig {
    /// Resolve inheritance and compile every template and filter. Runs once;
    /// any failure here is a configuration mistake, not a request error.
    pub fn build(&self) -> ConfigResult<GatewayModel> {
        let mut seen = BTreeSet::new();
        for id in self.resource_types.keys() {
            if !seen.insert(id.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateResourceType(id.clone()));
            }
        }

        let mut types = BTreeMap::new();
        for id in self.resource_types.keys() {
            let merged = self.merge_ancestry(id)?;
            let sub_type_ids: Vec<String> = self
                .resource_types
                .iter()
                .filter(|(_, cfg)| {
                    cfg.super_type
                        .as_deref()
                        .is_some_and(|sup| sup.eq_ignore_ascii_case(id))
                })
                .map(|(sub_id, _)| sub_id.clone())
                .collect();

            if !merged.is_abstract && merged.object_classes.is_empty() {
                return Err(ConfigError::MissingObjectClasses(id.clone()));
            }

            let mut properties = Vec::with_capacity(merged.properties.len());
            for (name, mapper_config) in &merged.properties {
                properties.push((name.clone(), build_mapper(mapper_config)?));
            }
            let mut sub_resources = Vec::with_capacity(merged.sub_resources.len());
            for (url_template, sub_config) in &merged.sub_resources {
                sub_resources.push(build_sub_resource(
                    url_template,
                    sub_config,
                    &self.resource_types,
                )?);
            }

            types.insert(
                id.clone(),
                Arc::new(Resource {
                    id: id.clone(),
                    is_abstract: merged.is_abstract,
                    super_type: self.resource_types[id].super_type.clone(),
                    object_classes: merged.object_classes,
                    mapper: PropertyMapper::Object(ObjectMapper::new(properties)),
                    sub_resources,
                    sub_type_ids,
                    supported_actions: merged.supported_actions,
                    resource_type_property: merged
                        .resource_type_property
                        .as_deref()
                        .map(JsonPointer::parse),
                    include_all_user_attributes: merged.include_all_user_attributes,
                    excluded_default_user_attributes: merged.excluded_default_user_attributes,
                }),
            );
        }

        let mut routes = Vec::with_capacity(self.routes.len());
        for (url_template, sub_config) in &self.routes {
            routes.push(build_sub_resource(
                url_template,
                sub_config,
                &self.resource_types,
            )?);
        }

        Ok(GatewayModel {
            resources: ResourceSet::new(types),
            routes,
            revision_attribute: self.revision_attribute.clone(),
        })
    }

    /// Fold a type's ancestry, root first, so declared members override
    /// inherited ones. Detects unresolved super types and cycles.
    fn merge_ancestry(&self, id: &str) -> ConfigResult<MergedType> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut cursor = Some(id.to_string());
        while let Some(type_id) = cursor {
            if !visited.insert(type_id.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "resource type '{id}' has a super-type cycle through '{type_id}'"
                )));
            }
            let config = self.resource_types.get(&type_id).ok_or_else(|| {
                ConfigError::UnresolvedSuperType {
                    type_id: chain
                        .last()
                        .map(|(last, _): &(String, &ResourceTypeConfig)| last.clone())
                        .unwrap_or_else(|| id.to_string()),
                    super_type: type_id.clone(),
                }
            })?;
            cursor = config.super_type.clone();
            chain.push((type_id, config));
        }

        let mut merged = MergedType::default();
        for (_, config) in chain.iter().rev() {
            merged.is_abstract = config.is_abstract;
            for class in &config.object_classes {
                if !merged
                    .object_classes
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(class))
                {
                    merged.object_classes.push(class.clone());
                }
            }
            for action in &config.supported_actions {
                merged.supported_actions.insert(action.clone());
            }
            if config.resource_type_property.is_some() {
                merged.resource_type_property = config.resource_type_property.clone();
            }
            merged.include_all_user_attributes |= config.include_all_user_attributes_by_default;
            merged
                .excluded_default_user_attributes
                .extend(config.excluded_default_user_attributes.iter().cloned());
            for (name, mapper) in &config.properties {
                merged.properties.insert(name.clone(), mapper.clone());
            }
            for (url, sub) in &config.sub_resources {
                merged.sub_resources.insert(url.clone(), sub.clone());
            }
        }
        Ok(merged)
    }
}

#[derive(Default)]
struct MergedType {
    is_abstract: bool,
    object_classes: Vec<String>,
    supported_actions: BTreeSet<String>,
    resource_type_property: Option<String>,
    include_all_user_attributes: bool,
    excluded_default_user_attributes: BTreeSet<String>,
    properties: BTreeMap<String, PropertyMapperConfig>,
    sub_resources: BTreeMap<String, SubResourceConfig>,
}

fn build_mapper(config: &PropertyMapperConfig) -> ConfigResult<PropertyMapper> {
    Ok(match config {
        PropertyMapperConfig::ResourceType {} => PropertyMapper::ResourceType(ResourceTypeMapper),
        PropertyMapperConfig::Constant { value } => {
            PropertyMapper::Constant(ConstantMapper::new(value.clone()))
        }
        PropertyMapperConfig::Simple {
            ldap_attribute,
            value_type,
            required,
            multi_valued,
            writability,
            default_values,
        } => {
            let mut mapper = SimpleMapper::new(ldap_attribute.clone());
            mapper.value_type = (*value_type).into();
            mapper.required = *required;
            mapper.multi_valued = *multi_valued;
            mapper.writability = (*writability).into();
            mapper.default_values = default_values.clone();
            PropertyMapper::Simple(mapper)
        }
        PropertyMapperConfig::Json {
            ldap_attribute,
            required,
            multi_valued,
            writability,
            matching_rule,
        } => {
            let mut mapper = JsonMapper::new(ldap_attribute.clone());
            mapper.required = *required;
            mapper.multi_valued = *multi_valued;
            mapper.writability = (*writability).into();
            mapper.matching_rule = matching_rule.clone();
            PropertyMapper::Json(mapper)
        }
        PropertyMapperConfig::Reference {
            ldap_attribute,
            base_dn,
            scope,
            primary_key,
            base_search_filter,
            properties,
            required,
            multi_valued,
            writability,
        } => {
            let base_dn = Dn::parse(base_dn).map_err(|err| {
                ConfigError::Invalid(format!("reference base DN '{base_dn}': {err}"))
            })?;
            let base_filter = base_search_filter
                .as_deref()
                .map(parse_base_filter)
                .transpose()?;
            let mut inner = Vec::with_capacity(properties.len());
            for (name, child) in properties {
                inner.push((name.clone(), build_mapper(child)?));
            }
            PropertyMapper::Reference(ReferenceMapper {
                ldap_attribute: ldap_attribute.clone(),
                base_dn,
                scope: (*scope).into(),
                primary_key: primary_key.clone(),
                base_filter,
                mapper: Box::new(PropertyMapper::Object(ObjectMapper::new(inner))),
                required: *required,
                multi_valued: *multi_valued,
                writability: (*writability).into(),
            })
        }
        PropertyMapperConfig::Object { properties } => {
            let mut children = Vec::with_capacity(properties.len());
            for (name, child) in properties {
                children.push((name.clone(), build_mapper(child)?));
            }
            PropertyMapper::Object(ObjectMapper::new(children))
        }
    })
}

fn parse_base_filter(filter: &str) -> ConfigResult<LdapFilter> {
    LdapFilter::parse(filter)
        .map_err(|reason| ConfigError::Invalid(format!("base search filter '{filter}': {reason}")))
}

fn build_naming(
    url_template: &str,
    config: &NamingStrategyConfig,
) -> ConfigResult<NamingStrategy> {
    let built = match config {
        NamingStrategyConfig::ClientDnNaming { dn_attribute } => NamingStrategy::ClientDnNaming {
            dn_attribute: dn_attribute.clone(),
        },
        NamingStrategyConfig::ClientNaming {
            dn_attribute,
            id_attribute,
        } => NamingStrategy::ClientNaming {
            dn_attribute: dn_attribute.clone(),
            id_attribute: id_attribute.clone(),
        },
        NamingStrategyConfig::ServerNaming {
            dn_attribute,
            id_attribute,
        } => NamingStrategy::ServerNaming {
            dn_attribute: dn_attribute.clone(),
            id_attribute: id_attribute.clone(),
        },
    };
    if let NamingStrategy::ClientNaming {
        dn_attribute,
        id_attribute,
    }
    | NamingStrategy::ServerNaming {
        dn_attribute,
        id_attribute,
    } = &built
        && dn_attribute.eq_ignore_ascii_case(id_attribute)
    {
        return Err(ConfigError::InvalidNamingStrategy {
            url_template: url_template.to_string(),
            reason: format!("the naming attribute and id attribute are both '{dn_attribute}'"),
        });
    }
    Ok(built)
}

fn build_sub_resource(
    url_template: &str,
    config: &SubResourceConfig,
    known_types: &BTreeMap<String, ResourceTypeConfig>,
) -> ConfigResult<SubResource> {
    if !known_types.contains_key(&config.resource) {
        return Err(ConfigError::UnresolvedSubResourceType {
            url_template: url_template.to_string(),
            type_id: config.resource.clone(),
        });
    }
    let dn_template = DnTemplate::compile(&config.dn_template).map_err(|reason| {
        ConfigError::InvalidDnTemplate {
            template: config.dn_template.clone(),
            reason,
        }
    })?;
    let kind = match config.kind {
        SubResourceKindConfig::Collection => SubResourceKind::Collection,
        SubResourceKindConfig::Singleton => SubResourceKind::Singleton,
    };
    if kind == SubResourceKind::Collection && config.naming_strategy.is_none() {
        return Err(ConfigError::InvalidNamingStrategy {
            url_template: url_template.to_string(),
            reason: "collections require a naming strategy".to_string(),
        });
    }
    let naming = config
        .naming_strategy
        .as_ref()
        .map(|n| build_naming(url_template, n))
        .transpose()?;
    let base_search_filter = config
        .base_search_filter
        .as_deref()
        .map(parse_base_filter)
        .transpose()?;
    Ok(SubResource {
        url_template: url_template.to_string(),
        kind,
        resource_id: config.resource.clone(),
        dn_template,
        read_only: config.is_read_only,
        naming,
        glue_object_classes: config.glue_object_classes.clone(),
        base_search_filter,
        flatten_subtree: config.flatten_subtree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(document: Value) -> GatewayConfig {
        serde_json::from_value(document).unwrap()
    }

    fn user_types() -> Value {
        json!({
            "party": {
                "isAbstract": true,
                "resourceTypeProperty": "/schema",
                "properties": {
                    "schema": {"type": "resourceType"},
                    "name": {"type": "simple", "ldapAttribute": "cn", "required": true}
                }
            },
            "user": {
                "superType": "party",
                "objectClasses": ["top", "person"],
                "properties": {
                    "surname": {"type": "simple", "ldapAttribute": "sn"}
                }
            }
        })
    }

    #[test]
    fn inheritance_merges_root_first() {
        let cfg = config(json!({"resourceTypes": user_types()}));
        let model = cfg.build().unwrap();
        let user = model.resources.get("user").unwrap();
        assert!(!user.is_abstract);
        assert_eq!(user.object_classes, vec!["top", "person"]);
        assert_eq!(
            user.resource_type_property.as_ref().map(|p| p.to_string()),
            Some("/schema".to_string())
        );
        let mut attrs = BTreeSet::new();
        user.mapper.ldap_attributes(None, &mut attrs);
        assert!(attrs.contains("cn"));
        assert!(attrs.contains("sn"));

        let party = model.resources.get("party").unwrap();
        assert_eq!(party.sub_type_ids, vec!["user"]);
    }

    #[test]
    fn unresolved_super_type_fails_fast() {
        let cfg = config(json!({
            "resourceTypes": {
                "user": {"superType": "ghost", "objectClasses": ["person"]}
            }
        }));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::UnresolvedSuperType { super_type, .. }) if super_type == "ghost"
        ));
    }

    #[test]
    fn super_type_cycles_are_rejected() {
        let cfg = config(json!({
            "resourceTypes": {
                "a": {"superType": "b", "objectClasses": ["x"]},
                "b": {"superType": "a", "objectClasses": ["y"]}
            }
        }));
        assert!(matches!(cfg.build(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn concrete_types_need_object_classes() {
        let cfg = config(json!({"resourceTypes": {"user": {}}}));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::MissingObjectClasses(id)) if id == "user"
        ));
    }

    #[test]
    fn collections_require_naming() {
        let cfg = config(json!({
            "resourceTypes": {"user": {"objectClasses": ["person"]}},
            "routes": {
                "users": {
                    "type": "collection",
                    "resource": "user",
                    "dnTemplate": "ou=people"
                }
            }
        }));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::InvalidNamingStrategy { .. })
        ));
    }

    #[test]
    fn naming_attributes_must_differ() {
        let cfg = config(json!({
            "resourceTypes": {"user": {"objectClasses": ["person"]}},
            "routes": {
                "users": {
                    "type": "collection",
                    "resource": "user",
                    "dnTemplate": "ou=people",
                    "namingStrategy": {
                        "type": "clientNaming",
                        "dnAttribute": "cn",
                        "idAttribute": "CN"
                    }
                }
            }
        }));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::InvalidNamingStrategy { .. })
        ));
    }

    #[test]
    fn malformed_templates_and_filters_fail_fast() {
        let cfg = config(json!({
            "resourceTypes": {"user": {"objectClasses": ["person"]}},
            "routes": {
                "users": {
                    "type": "singleton",
                    "resource": "user",
                    "dnTemplate": "ou={unclosed"
                }
            }
        }));
        assert!(matches!(
            cfg.build(),
            Err(ConfigError::InvalidDnTemplate { .. })
        ));

        let cfg = config(json!({
            "resourceTypes": {"user": {"objectClasses": ["person"]}},
            "routes": {
                "admin": {
                    "type": "singleton",
                    "resource": "user",
                    "dnTemplate": "cn=admin",
                    "baseSearchFilter": "(cn=admin"
                }
            }
        }));
        assert!(matches!(cfg.build(), Err(ConfigError::Invalid(_))));
    }
}
