//! Shared fixture: a small organization served by an in-memory directory.
//!
//! The tree holds a people branch, a services branch with the "LDAP
//! Connection Handler" entry referenced by user resources, and a couple of
//! device entries beneath one user for cascade-delete coverage.
#![allow(dead_code)]

use ldap_gateway::connection::InMemoryDirectory;
use ldap_gateway::ldap::{Attribute, Dn, Entry};
use ldap_gateway::{Gateway, GatewayConfig, Operation, Request, RequestContext};
use serde_json::json;
use std::sync::Arc;

pub fn fixture_config() -> GatewayConfig {
    serde_json::from_value(json!({
        "resourceTypes": {
            "person": {
                "isAbstract": true,
                "resourceTypeProperty": "/kind",
                "properties": {
                    "kind": {"type": "resourceType"}
                }
            },
            "user": {
                "superType": "person",
                "objectClasses": ["inetOrgPerson"],
                "supportedActions": ["modify-password", "reset-password"],
                "properties": {
                    "username": {"type": "simple", "ldapAttribute": "uid", "required": true},
                    "fullName": {"type": "simple", "ldapAttribute": "cn", "required": true},
                    "surname": {"type": "simple", "ldapAttribute": "sn"},
                    "mail": {"type": "simple", "ldapAttribute": "mail", "multiValued": true},
                    "handler": {
                        "type": "reference",
                        "ldapAttribute": "seeAlso",
                        "baseDn": "ou=services,dc=example,dc=com",
                        "scope": "one",
                        "primaryKey": "cn",
                        "properties": {
                            "name": {"type": "simple", "ldapAttribute": "cn", "required": true}
                        }
                    }
                },
                "subResources": {
                    "devices": {
                        "type": "collection",
                        "resource": "device",
                        "dnTemplate": "",
                        "namingStrategy": {"type": "clientDnNaming", "dnAttribute": "cn"}
                    }
                }
            },
            "poweruser": {
                "superType": "user",
                "objectClasses": ["posixAccount"],
                "properties": {
                    "uidNumber": {
                        "type": "simple",
                        "ldapAttribute": "uidNumber",
                        "valueType": "integer"
                    }
                }
            },
            "device": {
                "objectClasses": ["device"],
                "properties": {
                    "name": {"type": "simple", "ldapAttribute": "cn", "required": true}
                }
            },
            "service": {
                "objectClasses": ["applicationProcess"],
                "properties": {
                    "name": {"type": "simple", "ldapAttribute": "cn", "required": true}
                }
            },
            "project": {
                "objectClasses": ["applicationProcess"],
                "properties": {
                    "name": {"type": "simple", "ldapAttribute": "cn", "required": true}
                }
            }
        },
        "routes": {
            "users": {
                "type": "collection",
                "resource": "user",
                "dnTemplate": "ou=people,dc=example,dc=com",
                "namingStrategy": {"type": "clientDnNaming", "dnAttribute": "uid"}
            },
            "services": {
                "type": "collection",
                "resource": "service",
                "dnTemplate": "ou=services,dc=example,dc=com",
                "namingStrategy": {"type": "clientDnNaming", "dnAttribute": "cn"}
            },
            "projects": {
                "type": "collection",
                "resource": "project",
                "dnTemplate": "ou=projects,dc=example,dc=com",
                "glueObjectClasses": ["organizationalUnit"],
                "namingStrategy": {"type": "clientDnNaming", "dnAttribute": "cn"}
            },
            "handler": {
                "type": "singleton",
                "resource": "service",
                "dnTemplate": "cn=LDAP Connection Handler,ou=services,dc=example,dc=com",
                "isReadOnly": true
            }
        }
    }))
    .expect("fixture config deserializes")
}

pub fn gateway() -> Gateway {
    let _ = env_logger::builder().is_test(true).try_init();
    Gateway::from_config(&fixture_config()).expect("fixture config builds")
}

pub fn entry(dn: &str, classes: &[&str], attrs: &[(&str, &[&str])]) -> Entry {
    let mut entry = Entry::new(Dn::parse(dn).unwrap());
    entry.put(Attribute::new(
        "objectClass",
        classes.iter().map(|c| c.to_string()).collect(),
    ));
    for (name, values) in attrs {
        entry.put(Attribute::new(
            name.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
    }
    entry
}

pub async fn seeded_directory() -> Arc<InMemoryDirectory> {
    let dir = InMemoryDirectory::new();
    dir.seed(entry("dc=example,dc=com", &["domain"], &[("dc", &["example"])]))
        .await;
    dir.seed(entry(
        "ou=people,dc=example,dc=com",
        &["organizationalUnit"],
        &[("ou", &["people"])],
    ))
    .await;
    dir.seed(entry(
        "ou=services,dc=example,dc=com",
        &["organizationalUnit"],
        &[("ou", &["services"])],
    ))
    .await;
    dir.seed(entry(
        "cn=LDAP Connection Handler,ou=services,dc=example,dc=com",
        &["applicationProcess"],
        &[("cn", &["LDAP Connection Handler"])],
    ))
    .await;
    dir.seed(entry(
        "uid=bob,ou=people,dc=example,dc=com",
        &["inetOrgPerson"],
        &[
            ("uid", &["bob"]),
            ("cn", &["Bob Byrne"]),
            ("sn", &["Byrne"]),
            ("mail", &["bob@example.com"]),
            ("userPassword", &["hunter2"]),
        ],
    ))
    .await;
    dir.seed(entry(
        "cn=laptop,uid=bob,ou=people,dc=example,dc=com",
        &["device"],
        &[("cn", &["laptop"])],
    ))
    .await;
    dir.seed(entry(
        "cn=phone,uid=bob,ou=people,dc=example,dc=com",
        &["device"],
        &[("cn", &["phone"])],
    ))
    .await;
    dir.seed(entry(
        "uid=carol,ou=people,dc=example,dc=com",
        &["inetOrgPerson", "posixAccount"],
        &[
            ("uid", &["carol"]),
            ("cn", &["Carol Chen"]),
            ("uidNumber", &["1000"]),
        ],
    ))
    .await;
    dir.seed(entry(
        "uid=eve,ou=people,dc=example,dc=com",
        &["inetOrgPerson"],
        &[
            ("uid", &["eve"]),
            ("cn", &["Eve Eriksen"]),
            ("seeAlso", &["cn=ghost,ou=missing,dc=example,dc=com"]),
        ],
    ))
    .await;
    Arc::new(dir)
}

pub fn request(path: &[&str], operation: Operation) -> Request {
    Request {
        path: path.iter().map(|s| s.to_string()).collect(),
        operation,
        context: RequestContext::default(),
    }
}

pub fn secure_request(path: &[&str], operation: Operation) -> Request {
    Request {
        path: path.iter().map(|s| s.to_string()).collect(),
        operation,
        context: RequestContext {
            authorization_id: None,
            secure: true,
            authenticated: true,
        },
    }
}
