//! DNS zone management for certdns
//!
//! This crate provides the DNS side of DNS-01 challenge fulfillment: a
//! provider-neutral [`DnsProvider`] trait and concrete providers that create,
//! list and delete records in a hosted zone.
//!
//! # Supported Providers
//!
//! - **DNSimple**: Full support for zone lookup and record management via API v2
//! - **Manual**: Placeholder provider that refuses to touch DNS
//!
//! # Usage
//!
//! ```ignore
//! use certdns_dns::{DnsProvider, DnsRecordContent, DnsRecordRequest, DnsimpleCredentials, DnsimpleProvider};
//!
//! let provider = DnsimpleProvider::login(credentials, "admin@example.com").await?;
//!
//! if provider.get_zone("example.com").await?.is_some() {
//!     provider
//!         .create_record(
//!             "example.com",
//!             DnsRecordRequest {
//!                 name: "_acme-challenge".to_string(),
//!                 content: DnsRecordContent::TXT { content: digest },
//!                 ttl: Some(60),
//!             },
//!         )
//!         .await?;
//! }
//! ```

pub mod errors;
pub mod providers;

// Re-export main types
pub use errors::DnsError;
pub use providers::{
    DnsProvider, DnsProviderType, DnsRecord, DnsRecordContent, DnsRecordRequest, DnsRecordType,
    DnsZone, DnsimpleCredentials, DnsimpleProvider, ManualDnsProvider,
};
