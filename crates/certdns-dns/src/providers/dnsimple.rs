//! DNSimple DNS provider implementation
//!
//! This provider uses the DNSimple API v2 to manage DNS records.
//! It requires an API access token; every call is scoped to one DNSimple account.
//!
//! API reference: https://developer.dnsimple.com/v2/

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credentials::DnsimpleCredentials;
use super::traits::{
    fqdn, DnsProvider, DnsProviderType, DnsRecord, DnsRecordContent, DnsRecordRequest,
    DnsRecordType, DnsZone,
};
use crate::errors::DnsError;

const DNSIMPLE_API_BASE: &str = "https://api.dnsimple.com/v2";
const DNSIMPLE_SANDBOX_API_BASE: &str = "https://api.sandbox.dnsimple.com/v2";

/// DNSimple rejects TTLs below one minute
const MIN_TTL: u32 = 60;
const DEFAULT_TTL: u32 = 3600;
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// DNSimple DNS provider
pub struct DnsimpleProvider {
    client: Client,
    credentials: DnsimpleCredentials,
    account_id: String,
    base_url: String,
}

/// DNSimple API response structures
#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct DsAccount {
    id: i64,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DsZone {
    id: i64,
    account_id: i64,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DsRecord {
    id: i64,
    zone_id: String,
    name: String,
    content: String,
    ttl: u32,
    #[serde(default)]
    priority: Option<u16>,
    #[serde(rename = "type")]
    record_type: String,
}

/// Request to create/update a zone record
#[derive(Debug, Serialize)]
struct RecordBody {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct DsErrorResponse {
    message: String,
}

impl DnsimpleProvider {
    /// Log in to DNSimple and bind the provider to one account.
    ///
    /// An explicit `account_id` in the credentials wins. Otherwise the account
    /// whose e-mail matches `contact` is used, falling back to the only account
    /// the token can see.
    pub async fn login(credentials: DnsimpleCredentials, contact: &str) -> Result<Self, DnsError> {
        let base_url = if credentials.sandbox {
            DNSIMPLE_SANDBOX_API_BASE
        } else {
            DNSIMPLE_API_BASE
        };
        Self::login_with_base_url(credentials, contact, base_url.to_string()).await
    }

    /// Log in against a custom base URL (for testing)
    pub async fn login_with_base_url(
        credentials: DnsimpleCredentials,
        contact: &str,
        base_url: String,
    ) -> Result<Self, DnsError> {
        let client = Self::build_client()?;
        let mut provider = Self {
            client,
            credentials,
            account_id: String::new(),
            base_url,
        };

        provider.account_id = match provider.credentials.account_id.clone() {
            Some(id) => id,
            None => provider.resolve_account(contact).await?,
        };

        info!(
            "Logged in to DNSimple account {} for {}",
            provider.account_id, contact
        );

        Ok(provider)
    }

    /// Create a provider bound to a known account without any API call
    pub fn with_account(
        credentials: DnsimpleCredentials,
        account_id: impl Into<String>,
        base_url: String,
    ) -> Result<Self, DnsError> {
        Ok(Self {
            client: Self::build_client()?,
            credentials,
            account_id: account_id.into(),
            base_url,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn build_client() -> Result<Client, DnsError> {
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DnsError::ApiError(format!("Failed to create HTTP client: {}", e)))
    }

    async fn resolve_account(&self, contact: &str) -> Result<String, DnsError> {
        let accounts: DataResponse<Vec<DsAccount>> = self
            .api_request(Method::GET, "/accounts", None::<&()>)
            .await?;

        if let Some(account) = accounts.data.iter().find(|a| {
            a.email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(contact))
        }) {
            return Ok(account.id.to_string());
        }

        match accounts.data.as_slice() {
            [only] => Ok(only.id.to_string()),
            [] => Err(DnsError::InvalidCredentials(
                "API token has no DNSimple account".to_string(),
            )),
            _ => Err(DnsError::InvalidCredentials(format!(
                "API token can access {} accounts and none matches {}; set an account id",
                accounts.data.len(),
                contact
            ))),
        }
    }

    /// Map a non-success response to the matching error
    async fn error_from_response(response: reqwest::Response) -> DnsError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<DsErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        match status {
            StatusCode::UNAUTHORIZED => DnsError::InvalidCredentials(message),
            StatusCode::FORBIDDEN => DnsError::PermissionDenied(message),
            StatusCode::TOO_MANY_REQUESTS => DnsError::RateLimited(message),
            StatusCode::NOT_FOUND => DnsError::RecordNotFound(message),
            _ => DnsError::ApiError(format!("DNSimple API returned {}: {}", status, message)),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<reqwest::Response, DnsError> {
        let url = format!("{}{}", self.base_url, path);

        debug!("DNSimple API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.credentials.api_token)
            .header("Accept", "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DnsError::ApiError(format!("API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(response)
    }

    /// Make an authenticated request and decode the JSON body
    async fn api_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, DnsError> {
        let response = self.send(method, path, body).await?;

        let response_text = response
            .text()
            .await
            .map_err(|e| DnsError::ApiError(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&response_text).map_err(|e| {
            DnsError::ApiError(format!(
                "Failed to parse response: {} - Body: {}",
                e, response_text
            ))
        })
    }

    fn zone_path(&self, zone: &str) -> String {
        format!(
            "/{}/zones/{}",
            self.account_id,
            urlencoding::encode(zone)
        )
    }

    /// Fetch every page of a record listing; `filter` is an extra query string
    async fn fetch_records(&self, zone: &str, filter: &str) -> Result<Vec<DnsRecord>, DnsError> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let path = format!(
                "{}/records?page={}&per_page={}{}",
                self.zone_path(zone),
                page,
                PAGE_SIZE,
                filter
            );
            let response: PagedResponse<DsRecord> =
                self.api_request(Method::GET, &path, None::<&()>).await?;

            records.extend(
                response
                    .data
                    .iter()
                    .filter_map(|r| Self::convert_record(r, zone)),
            );

            match response.pagination {
                Some(p) if p.current_page < p.total_pages => page = p.current_page + 1,
                _ => break,
            }
        }

        Ok(records)
    }

    /// Convert a DNSimple record to our DnsRecord type
    fn convert_record(record: &DsRecord, zone: &str) -> Option<DnsRecord> {
        let record_type = DnsRecordType::parse(&record.record_type)?;

        let content = match record_type {
            DnsRecordType::A => DnsRecordContent::A {
                address: record.content.clone(),
            },
            DnsRecordType::AAAA => DnsRecordContent::AAAA {
                address: record.content.clone(),
            },
            DnsRecordType::CNAME => DnsRecordContent::CNAME {
                target: record.content.trim_end_matches('.').to_string(),
            },
            DnsRecordType::TXT => DnsRecordContent::TXT {
                content: record.content.trim_matches('"').to_string(),
            },
            DnsRecordType::MX => DnsRecordContent::MX {
                priority: record.priority.unwrap_or(10),
                target: record.content.trim_end_matches('.').to_string(),
            },
            DnsRecordType::NS => DnsRecordContent::NS {
                nameserver: record.content.trim_end_matches('.').to_string(),
            },
            DnsRecordType::CAA => DnsRecordContent::CAA {
                value: record.content.clone(),
            },
        };

        let zone_name = if record.zone_id.is_empty() {
            zone
        } else {
            record.zone_id.as_str()
        };

        Some(DnsRecord {
            id: record.id.to_string(),
            zone: zone_name.to_string(),
            name: record.name.clone(),
            fqdn: fqdn(zone_name, &record.name),
            content,
            ttl: record.ttl,
        })
    }

    fn build_record_body(request: &DnsRecordRequest) -> RecordBody {
        let priority = match &request.content {
            DnsRecordContent::MX { priority, .. } => Some(*priority),
            _ => None,
        };

        RecordBody {
            name: request.name.clone(),
            record_type: request.content.record_type().to_string(),
            content: request.content.to_value_string(),
            ttl: request.ttl.unwrap_or(DEFAULT_TTL).max(MIN_TTL),
            priority,
        }
    }
}

#[async_trait]
impl DnsProvider for DnsimpleProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Dnsimple
    }

    async fn test_connection(&self) -> Result<bool, DnsError> {
        match self
            .api_request::<serde_json::Value>(Method::GET, "/whoami", None::<&()>)
            .await
        {
            Ok(_) => {
                info!("DNSimple API connection test successful");
                Ok(true)
            }
            Err(e) => {
                warn!("DNSimple API connection test failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn get_zone(&self, zone: &str) -> Result<Option<DnsZone>, DnsError> {
        let path = self.zone_path(zone);
        match self
            .api_request::<DataResponse<DsZone>>(Method::GET, &path, None::<&()>)
            .await
        {
            Ok(response) => Ok(Some(DnsZone {
                id: response.data.id.to_string(),
                name: response.data.name,
                account_id: Some(response.data.account_id.to_string()),
            })),
            Err(DnsError::RecordNotFound(_)) => {
                debug!("Zone {} not found in DNSimple account {}", zone, self.account_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_records(&self, zone: &str) -> Result<Vec<DnsRecord>, DnsError> {
        self.fetch_records(zone, "").await
    }

    async fn find_records(
        &self,
        zone: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> Result<Vec<DnsRecord>, DnsError> {
        let filter = format!(
            "&name={}&type={}",
            urlencoding::encode(name),
            record_type
        );
        let records = self.fetch_records(zone, &filter).await?;

        // The API filter is exact, but keep the contract independent of it
        Ok(records
            .into_iter()
            .filter(|r| r.name.eq_ignore_ascii_case(name) && r.record_type() == record_type)
            .collect())
    }

    async fn create_record(
        &self,
        zone: &str,
        request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        let body = Self::build_record_body(&request);
        let path = format!("{}/records", self.zone_path(zone));

        let response: DataResponse<DsRecord> =
            self.api_request(Method::POST, &path, Some(&body)).await?;

        let record = Self::convert_record(&response.data, zone)
            .ok_or_else(|| DnsError::ApiError("Failed to convert created record".to_string()))?;

        info!(
            "Created {} record {} in zone {}",
            body.record_type, request.name, zone
        );

        Ok(record)
    }

    async fn update_record(
        &self,
        zone: &str,
        record_id: &str,
        request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        let body = Self::build_record_body(&request);
        let path = format!("{}/records/{}", self.zone_path(zone), record_id);

        let response: DataResponse<DsRecord> =
            self.api_request(Method::PATCH, &path, Some(&body)).await?;

        let record = Self::convert_record(&response.data, zone)
            .ok_or_else(|| DnsError::ApiError("Failed to convert updated record".to_string()))?;

        info!("Updated DNS record {} in zone {}", record_id, zone);

        Ok(record)
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), DnsError> {
        let path = format!("{}/records/{}", self.zone_path(zone), record_id);

        match self.send(Method::DELETE, &path, None::<&()>).await {
            Ok(_) => {
                info!("Deleted DNS record {} from zone {}", record_id, zone);
                Ok(())
            }
            Err(DnsError::RecordNotFound(_)) => {
                debug!("DNS record {} already absent from zone {}", record_id, zone);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
