//! Certificate finalization: fresh key, CSR, signed chain, PKCS#12 export

use chrono::{DateTime, TimeZone, Utc};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::{debug, info};

use crate::acme::AcmeOrder;
use crate::errors::FinalizationError;
use crate::models::{CertificateBundle, CertificateRequest, SubjectProfile};

/// A freshly generated key pair and the DER-encoded CSR built from it
pub struct SigningRequest {
    pub key_pair: KeyPair,
    pub csr_der: Vec<u8>,
}

/// Build a P-256 key and a CSR for the request. A new key is generated on
/// every call.
pub fn build_signing_request(
    request: &CertificateRequest,
) -> Result<SigningRequest, FinalizationError> {
    let common_name = request.primary_domain().ok_or_else(|| {
        FinalizationError::CertificateGeneration("Request has no domains".to_string())
    })?;

    let mut params = CertificateParams::new(request.order_identifiers())?;
    params.distinguished_name = distinguished_name(&request.subject, &common_name);

    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
    let csr = params.serialize_request(&key_pair)?;

    Ok(SigningRequest {
        key_pair,
        csr_der: csr.der().to_vec(),
    })
}

fn distinguished_name(subject: &SubjectProfile, common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();

    let fields = [
        (DnType::CountryName, &subject.country),
        (DnType::StateOrProvinceName, &subject.state),
        (DnType::LocalityName, &subject.locality),
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
    ];
    for (dn_type, value) in fields {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            dn.push(dn_type, value);
        }
    }

    dn.push(DnType::CommonName, common_name);
    dn
}

/// Finalize a validated order and package the result.
pub async fn finalize_order(
    order: &dyn AcmeOrder,
    request: &CertificateRequest,
) -> Result<CertificateBundle, FinalizationError> {
    let signing = build_signing_request(request)?;
    debug!("Generated P-256 key and CSR");

    let chain_pem = order.finalize(&signing.csr_der).await?;
    let not_after = extract_expiration_time(&chain_pem)?;

    let friendly_name = request.friendly_name();
    let pkcs12_der = export_pkcs12(
        &signing.key_pair.serialize_pem(),
        &chain_pem,
        &friendly_name,
        &request.password,
    )?;

    let common_name = request.primary_domain().unwrap_or_default();
    info!(
        "Certificate for {} issued, valid until {}",
        common_name, not_after
    );

    Ok(CertificateBundle {
        friendly_name,
        common_name,
        domains: request.order_identifiers(),
        pkcs12_der,
        not_after,
    })
}

/// Package a private key and a PEM chain (leaf first) into a
/// password-protected PKCS#12 archive.
pub fn export_pkcs12(
    key_pem: &str,
    chain_pem: &str,
    friendly_name: &str,
    password: &str,
) -> Result<Vec<u8>, FinalizationError> {
    let pkey = PKey::private_key_from_pem(key_pem.as_bytes())?;
    let mut chain = X509::stack_from_pem(chain_pem.as_bytes())?.into_iter();

    let leaf = chain
        .next()
        .ok_or_else(|| FinalizationError::InvalidChain("Chain contains no certificate".to_string()))?;

    if !leaf.public_key()?.public_eq(&pkey) {
        return Err(FinalizationError::InvalidChain(
            "Leaf certificate does not match the generated key".to_string(),
        ));
    }

    let mut ca = Stack::new()?;
    for cert in chain {
        ca.push(cert)?;
    }

    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(&pkey).cert(&leaf).ca(ca);
    let archive = builder.build2(password)?;

    Ok(archive.to_der()?)
}

/// notAfter of the first certificate in a PEM chain
pub fn extract_expiration_time(chain_pem: &str) -> Result<DateTime<Utc>, FinalizationError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| FinalizationError::InvalidChain(format!("Failed to parse PEM: {}", e)))?;

    let x509 = pem
        .parse_x509()
        .map_err(|e| FinalizationError::InvalidChain(format!("Failed to parse X509: {}", e)))?;

    let not_after = x509.validity().not_after;

    Utc.timestamp_opt(not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| FinalizationError::InvalidChain("Invalid expiration timestamp".to_string()))
}
