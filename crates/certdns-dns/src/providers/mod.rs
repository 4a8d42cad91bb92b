//! DNS provider implementations
//!
//! This module contains the DNS provider trait definitions and the
//! implementations used for challenge record management.

pub mod credentials;
pub mod dnsimple;
pub mod traits;

// Re-export commonly used types
pub use credentials::DnsimpleCredentials;
pub use dnsimple::DnsimpleProvider;
pub use traits::{
    DnsProvider, DnsProviderType, DnsRecord, DnsRecordContent, DnsRecordRequest, DnsRecordType,
    DnsZone, ManualDnsProvider,
};
