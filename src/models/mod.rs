//! Captured transaction records persisted to the document store

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Core data captured from an intercepted HTTP request
///
/// The record is immutable once persisted; the store assigns its identity
/// and fills `response_id` when the paired response is saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub method: String,
    pub path: String,

    /// Query parameters, multi-value ordering preserved
    pub query_params: HashMap<String, Vec<String>>,

    /// Headers as multi-value maps; names are lowercase on the wire
    pub headers: HashMap<String, Vec<String>>,

    /// Cookies, last write wins on duplicate names
    pub cookies: HashMap<String, String>,

    /// Decoded body; raw bytes when gzip decompression failed
    pub body: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub form_params: HashMap<String, Vec<String>>,

    pub is_gzipped: bool,
    pub target_host: String,
    pub client_ip: String,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ObjectId>,
}

/// Core data captured from an intercepted HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub request_id: ObjectId,
    pub status_code: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
    pub is_gzipped: bool,
    pub content_type: String,

    /// Content length as declared by the origin, -1 when unknown
    pub content_length: i64,

    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

/// A captured request/response pair joined by the identity links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

impl RequestRecord {
    /// Create an empty record for the given method and target
    pub fn new(method: String, path: String, target_host: String, client_ip: String) -> Self {
        Self {
            id: None,
            method,
            path,
            query_params: HashMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: String::new(),
            form_params: HashMap::new(),
            is_gzipped: false,
            target_host,
            client_ip,
            timestamp: Utc::now(),
            response_id: None,
        }
    }
}
