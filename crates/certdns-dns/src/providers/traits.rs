//! DNS provider trait definitions
//!
//! This module defines the core traits and types for DNS provider implementations.
//! Records are always addressed relative to their zone, so a challenge record for
//! `sub.example.com` lives in zone `example.com` under the name `_acme-challenge.sub`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DnsError;

/// Supported DNS provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProviderType {
    /// DNSimple (API token)
    Dnsimple,
    /// Manual DNS (user sets records manually)
    Manual,
}

impl std::fmt::Display for DnsProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsProviderType::Dnsimple => write!(f, "dnsimple"),
            DnsProviderType::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for DnsProviderType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dnsimple" | "ds" => Ok(DnsProviderType::Dnsimple),
            "manual" => Ok(DnsProviderType::Manual),
            _ => Err(DnsError::InvalidProviderType(s.to_string())),
        }
    }
}

/// DNS record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    AAAA,
    CNAME,
    TXT,
    MX,
    NS,
    CAA,
}

impl std::fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsRecordType::A => write!(f, "A"),
            DnsRecordType::AAAA => write!(f, "AAAA"),
            DnsRecordType::CNAME => write!(f, "CNAME"),
            DnsRecordType::TXT => write!(f, "TXT"),
            DnsRecordType::MX => write!(f, "MX"),
            DnsRecordType::NS => write!(f, "NS"),
            DnsRecordType::CAA => write!(f, "CAA"),
        }
    }
}

impl DnsRecordType {
    /// Parse the record type string a provider API returns
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "A" => Some(DnsRecordType::A),
            "AAAA" => Some(DnsRecordType::AAAA),
            "CNAME" => Some(DnsRecordType::CNAME),
            "TXT" => Some(DnsRecordType::TXT),
            "MX" => Some(DnsRecordType::MX),
            "NS" => Some(DnsRecordType::NS),
            "CAA" => Some(DnsRecordType::CAA),
            _ => None,
        }
    }
}

/// DNS record content - varies by record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DnsRecordContent {
    /// A record - IPv4 address
    A { address: String },
    /// AAAA record - IPv6 address
    AAAA { address: String },
    /// CNAME record - canonical name
    CNAME { target: String },
    /// TXT record - text content
    TXT { content: String },
    /// MX record - mail exchange
    MX { priority: u16, target: String },
    /// NS record - nameserver
    NS { nameserver: String },
    /// CAA record - raw `flags tag "value"` text
    CAA { value: String },
}

impl DnsRecordContent {
    /// Get the record type for this content
    pub fn record_type(&self) -> DnsRecordType {
        match self {
            DnsRecordContent::A { .. } => DnsRecordType::A,
            DnsRecordContent::AAAA { .. } => DnsRecordType::AAAA,
            DnsRecordContent::CNAME { .. } => DnsRecordType::CNAME,
            DnsRecordContent::TXT { .. } => DnsRecordType::TXT,
            DnsRecordContent::MX { .. } => DnsRecordType::MX,
            DnsRecordContent::NS { .. } => DnsRecordType::NS,
            DnsRecordContent::CAA { .. } => DnsRecordType::CAA,
        }
    }

    /// Convert to the string form sent to provider APIs
    pub fn to_value_string(&self) -> String {
        match self {
            DnsRecordContent::A { address } | DnsRecordContent::AAAA { address } => address.clone(),
            DnsRecordContent::CNAME { target } | DnsRecordContent::NS { nameserver: target } => {
                target.clone()
            }
            DnsRecordContent::TXT { content } => content.clone(),
            DnsRecordContent::MX { target, .. } => target.clone(),
            DnsRecordContent::CAA { value } => value.clone(),
        }
    }
}

/// A DNS record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-specific record ID
    pub id: String,

    /// Zone this record belongs to
    pub zone: String,

    /// Record name relative to the zone ("" for the apex)
    pub name: String,

    /// Fully qualified domain name
    pub fqdn: String,

    /// Record content
    pub content: DnsRecordContent,

    /// Time to live in seconds
    pub ttl: u32,
}

impl DnsRecord {
    pub fn record_type(&self) -> DnsRecordType {
        self.content.record_type()
    }
}

/// Request to create or update a DNS record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordRequest {
    /// Record name relative to the zone
    pub name: String,

    /// Record content
    pub content: DnsRecordContent,

    /// TTL in seconds (None = provider default)
    pub ttl: Option<u32>,
}

impl DnsRecordRequest {
    pub fn txt(name: impl Into<String>, content: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            content: DnsRecordContent::TXT {
                content: content.into(),
            },
            ttl: Some(ttl),
        }
    }
}

/// A DNS zone (registrable domain managed by the provider)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    /// Provider-specific zone ID
    pub id: String,

    /// Zone name (domain)
    pub name: String,

    /// Provider account owning the zone, if the provider has accounts
    pub account_id: Option<String>,
}

/// Build the fully qualified name for a zone-relative record name
pub fn fqdn(zone: &str, name: &str) -> String {
    if name.is_empty() || name == "@" {
        zone.to_string()
    } else {
        format!("{}.{}", name, zone)
    }
}

/// Core DNS provider trait
///
/// All DNS providers must implement this trait to provide a unified interface
/// for managing DNS records across different providers.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> DnsProviderType;

    /// Test the credentials/connection to the provider
    async fn test_connection(&self) -> Result<bool, DnsError>;

    /// Get a specific zone by its name. An unknown zone is `Ok(None)`.
    async fn get_zone(&self, zone: &str) -> Result<Option<DnsZone>, DnsError>;

    /// List all records in a zone
    async fn list_records(&self, zone: &str) -> Result<Vec<DnsRecord>, DnsError>;

    /// Create a new DNS record. Providers that allow several values at one
    /// name must add a new record rather than replace an existing one.
    async fn create_record(&self, zone: &str, request: DnsRecordRequest)
        -> Result<DnsRecord, DnsError>;

    /// Update an existing DNS record in place
    async fn update_record(
        &self,
        zone: &str,
        record_id: &str,
        request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError>;

    /// Delete a DNS record. Deleting a record that no longer exists succeeds.
    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), DnsError>;

    /// Find every record with the given relative name and type
    async fn find_records(
        &self,
        zone: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> Result<Vec<DnsRecord>, DnsError> {
        let records = self.list_records(zone).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.name.eq_ignore_ascii_case(name) && r.record_type() == record_type)
            .collect())
    }
}

/// Manual DNS provider that doesn't actually manage records
///
/// It owns no zones, so automated challenges fail at the zone lookup instead of
/// waiting on records nobody creates. Writes return `NotSupported`.
pub struct ManualDnsProvider;

impl Default for ManualDnsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualDnsProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DnsProvider for ManualDnsProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Manual
    }

    async fn test_connection(&self) -> Result<bool, DnsError> {
        Ok(true)
    }

    async fn get_zone(&self, _zone: &str) -> Result<Option<DnsZone>, DnsError> {
        Ok(None)
    }

    async fn list_records(&self, _zone: &str) -> Result<Vec<DnsRecord>, DnsError> {
        Err(DnsError::NotSupported(
            "Manual DNS provider cannot list records".to_string(),
        ))
    }

    async fn create_record(
        &self,
        _zone: &str,
        _request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        Err(DnsError::NotSupported(
            "Manual DNS provider cannot create records - user must configure DNS manually"
                .to_string(),
        ))
    }

    async fn update_record(
        &self,
        _zone: &str,
        _record_id: &str,
        _request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        Err(DnsError::NotSupported(
            "Manual DNS provider cannot update records - user must configure DNS manually"
                .to_string(),
        ))
    }

    async fn delete_record(&self, _zone: &str, _record_id: &str) -> Result<(), DnsError> {
        Err(DnsError::NotSupported(
            "Manual DNS provider cannot delete records - user must configure DNS manually"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== DnsProviderType tests ====================

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!(
            "dnsimple".parse::<DnsProviderType>().unwrap(),
            DnsProviderType::Dnsimple
        );
        assert_eq!(
            "DNSimple".parse::<DnsProviderType>().unwrap(),
            DnsProviderType::Dnsimple
        );
        assert_eq!(
            "ds".parse::<DnsProviderType>().unwrap(),
            DnsProviderType::Dnsimple
        );
        assert_eq!(
            "manual".parse::<DnsProviderType>().unwrap(),
            DnsProviderType::Manual
        );
        assert!(matches!(
            "route53".parse::<DnsProviderType>(),
            Err(DnsError::InvalidProviderType(_))
        ));
    }

    #[test]
    fn test_provider_type_display() {
        assert_eq!(DnsProviderType::Dnsimple.to_string(), "dnsimple");
        assert_eq!(DnsProviderType::Manual.to_string(), "manual");
    }

    // ==================== DnsRecordType tests ====================

    #[test]
    fn test_record_type_parse() {
        assert_eq!(DnsRecordType::parse("txt"), Some(DnsRecordType::TXT));
        assert_eq!(DnsRecordType::parse("AAAA"), Some(DnsRecordType::AAAA));
        assert_eq!(DnsRecordType::parse("SOA"), None);
    }

    // ==================== DnsRecordContent tests ====================

    #[test]
    fn test_record_content_type_and_value() {
        let txt = DnsRecordContent::TXT {
            content: "abc123".to_string(),
        };
        assert_eq!(txt.record_type(), DnsRecordType::TXT);
        assert_eq!(txt.to_value_string(), "abc123");

        let mx = DnsRecordContent::MX {
            priority: 10,
            target: "mail.example.com".to_string(),
        };
        assert_eq!(mx.record_type(), DnsRecordType::MX);
        assert_eq!(mx.to_value_string(), "mail.example.com");
    }

    #[test]
    fn test_txt_request_builder() {
        let request = DnsRecordRequest::txt("_acme-challenge", "digest", 60);
        assert_eq!(request.name, "_acme-challenge");
        assert_eq!(request.ttl, Some(60));
        assert_eq!(request.content.record_type(), DnsRecordType::TXT);
    }

    #[test]
    fn test_fqdn() {
        assert_eq!(fqdn("example.com", ""), "example.com");
        assert_eq!(fqdn("example.com", "@"), "example.com");
        assert_eq!(
            fqdn("example.com", "_acme-challenge.sub"),
            "_acme-challenge.sub.example.com"
        );
    }

    #[test]
    fn test_dns_record_content_serialization() {
        let content = DnsRecordContent::TXT {
            content: "token".to_string(),
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("\"type\":\"TXT\""));
        assert!(json.contains("\"content\":\"token\""));
    }

    // ==================== ManualDnsProvider tests ====================

    #[tokio::test]
    async fn test_manual_provider() {
        let provider = ManualDnsProvider::new();
        assert_eq!(provider.provider_type(), DnsProviderType::Manual);
        assert!(provider.test_connection().await.unwrap());
        assert!(provider.get_zone("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manual_provider_mutations_not_supported() {
        let provider = ManualDnsProvider::default();

        let created = provider
            .create_record(
                "example.com",
                DnsRecordRequest::txt("_acme-challenge", "x", 60),
            )
            .await;
        assert!(matches!(created, Err(DnsError::NotSupported(_))));

        let deleted = provider.delete_record("example.com", "1").await;
        assert!(matches!(deleted, Err(DnsError::NotSupported(_))));

        let listed = provider.list_records("example.com").await;
        assert!(matches!(listed, Err(DnsError::NotSupported(_))));
    }
}
