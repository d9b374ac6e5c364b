use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct DomainRequest {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub subdomain: HashMap<String, Vec<String>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct TxtRequest {
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct CnameRequest {
    pub target: String,
}

#[derive(Serialize, Debug, Clone, Default)]
pub(super) struct DomainResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub data: DomainData,
}

#[derive(Serialize, Debug, Clone, Default)]
pub(super) struct DomainData {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fqdn: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub subdomain: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}

impl DomainResponse {
    pub fn ok(data: DomainData) -> Self {
        DomainResponse {
            status: 200,
            token: None,
            data,
        }
    }

    pub fn with_token(token: String, data: DomainData) -> Self {
        DomainResponse {
            status: 200,
            token: Some(token),
            data,
        }
    }
}
