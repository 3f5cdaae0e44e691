use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use super::sigv4::{self, SigningError, SigningParams};
use crate::agent::store::Credential;
use crate::config;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// S3 answered with an error document; `message` is already translated
    #[error("{message}")]
    Api { code: String, message: String },

    #[error("S3 operation failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    fn during(self, step: &'static str) -> Self {
        ProviderError::Step {
            step,
            source: Box::new(self),
        }
    }
}

/// Default server-side encryption for a new bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum EncryptionType {
    #[default]
    #[serde(rename = "AES256")]
    Aes256,
    #[serde(rename = "aws:kms")]
    AwsKms,
    #[serde(rename = "none")]
    None,
}

impl EncryptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionType::Aes256 => "AES256",
            EncryptionType::AwsKms => "aws:kms",
            EncryptionType::None => "none",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "AES256" => Ok(EncryptionType::Aes256),
            "aws:kms" => Ok(EncryptionType::AwsKms),
            "none" => Ok(EncryptionType::None),
            other => Err(ProviderError::InvalidInput(format!(
                "Invalid encryption type '{}' (expected AES256, aws:kms or none)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBucketInput {
    pub bucket_name: String,
    /// Already resolved; never empty
    pub region: String,
    pub encryption: EncryptionType,
    pub kms_key_id: Option<String>,
    pub versioning_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreateBucketOutput {
    pub bucket_name: String,
    pub region: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Creates buckets on behalf of the broker
#[async_trait]
pub trait BucketProvider: Send + Sync {
    async fn create_bucket(
        &self,
        credential: &Credential,
        input: &CreateBucketInput,
    ) -> Result<CreateBucketOutput, ProviderError>;
}

/// Every naming rule `name` breaks, in a stable order
pub fn bucket_name_violations(name: &str) -> Vec<&'static str> {
    let mut violations = Vec::new();

    if name.len() < 3 || name.len() > 63 {
        violations.push("bucket name must be between 3 and 63 characters");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        violations.push("bucket name must be lowercase");
    }
    if name.starts_with('-') || name.ends_with('-') {
        violations.push("bucket name cannot start or end with hyphen");
    }
    if name.contains("..") {
        violations.push("bucket name cannot contain consecutive periods");
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '-'))
    {
        violations.push("bucket name may only contain letters, numbers, periods and hyphens");
    }

    violations
}

pub fn validate_bucket_name(name: &str) -> Result<(), ProviderError> {
    let violations = bucket_name_violations(name);
    if violations.is_empty() {
        return Ok(());
    }

    Err(ProviderError::InvalidInput(format!(
        "Invalid bucket name '{}': {}",
        name,
        violations.join("; ")
    )))
}

/// Human-readable message for an S3 error code
pub fn translate(code: &str, message: &str) -> String {
    match code {
        "BucketAlreadyExists" => "bucket name already taken globally (S3 bucket names must be unique across all AWS accounts)".to_string(),
        "BucketAlreadyOwnedByYou" => "you already own a bucket with this name".to_string(),
        "InvalidBucketName" => "invalid bucket name (check naming rules: 3-63 chars, lowercase, no consecutive periods)".to_string(),
        "AccessDenied" => "permission denied (check your AWS credentials have s3:CreateBucket permission)".to_string(),
        "TooManyBuckets" => "bucket limit reached (AWS allows 100 buckets per account by default)".to_string(),
        _ => format!("AWS error ({}): {}", code, message),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn api_error(status: StatusCode, body: &str) -> ProviderError {
    let (code, message) = match quick_xml::de::from_str::<ErrorDocument>(body) {
        Ok(doc) => (doc.code, doc.message),
        Err(_) => (
            status.as_u16().to_string(),
            status.canonical_reason().unwrap_or("unexpected response").to_string(),
        ),
    };

    ProviderError::Api {
        message: translate(&code, &message),
        code,
    }
}

/// S3 over its REST API, signed with SigV4
pub struct S3Provider {
    client: Client,
    /// Path-style endpoint for S3-compatible services
    endpoint: Option<String>,
}

impl S3Provider {
    pub fn new(endpoint: Option<&str>) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(endpoint) = endpoint {
            Url::parse(endpoint).with_context(|| format!("Invalid S3 endpoint: {}", endpoint))?;
        }

        let client = Client::builder()
            .user_agent(format!("ark-agent/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create S3 client")?;

        Ok(Self {
            client,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    fn bucket_url(&self, bucket: &str, region: &str, subresource: Option<&str>) -> Result<Url, ProviderError> {
        let base = match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint, bucket),
            // Dotted names break the wildcard certificate of virtual-hosted URLs
            None if bucket.contains('.') => format!("https://s3.{}.amazonaws.com/{}", region, bucket),
            None if region == config::default_region() => format!("https://{}.s3.amazonaws.com/", bucket),
            None => format!("https://{}.s3.{}.amazonaws.com/", bucket, region),
        };

        let mut url = Url::parse(&base)
            .map_err(|e| ProviderError::InvalidInput(format!("Invalid bucket URL {}: {}", base, e)))?;
        url.set_query(subresource);
        Ok(url)
    }

    async fn put(
        &self,
        credential: &Credential,
        region: &str,
        url: Url,
        body: Vec<u8>,
        with_checksum: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut headers = BTreeMap::new();
        if !body.is_empty() {
            headers.insert("content-type".to_string(), "application/xml".to_string());
        }
        if with_checksum {
            headers.insert(
                "x-amz-checksum-sha256".to_string(),
                BASE64.encode(Sha256::digest(&body)),
            );
            headers.insert("x-amz-sdk-checksum-algorithm".to_string(), "SHA256".to_string());
        }

        let params = SigningParams {
            access_key_id: &credential.access_key_id,
            secret_access_key: &credential.secret_access_key,
            session_token: credential.session_token.as_deref().filter(|t| !t.is_empty()),
            region,
            service: "s3",
            time: Utc::now(),
        };
        sigv4::sign(&params, Method::PUT.as_str(), &url, &mut headers, &body)?;

        let mut request = self.client.put(url);
        for (name, value) in &headers {
            // reqwest derives Host from the URL
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }

    fn fallback_location(&self, bucket: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint, bucket),
            None => format!("http://{}.s3.amazonaws.com/", bucket),
        }
    }
}

fn location_constraint(region: &str) -> Vec<u8> {
    if region == config::default_region() {
        return Vec::new();
    }

    format!(
        "<CreateBucketConfiguration xmlns=\"{}\"><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
        S3_XMLNS,
        quick_xml::escape::escape(region)
    )
    .into_bytes()
}

fn encryption_configuration(encryption: EncryptionType, kms_key_id: Option<&str>) -> Vec<u8> {
    let key = match (encryption, kms_key_id) {
        (EncryptionType::AwsKms, Some(id)) if !id.is_empty() => {
            format!("<KMSMasterKeyID>{}</KMSMasterKeyID>", quick_xml::escape::escape(id))
        }
        _ => String::new(),
    };

    format!(
        "<ServerSideEncryptionConfiguration xmlns=\"{}\"><Rule><ApplyServerSideEncryptionByDefault>\
         <SSEAlgorithm>{}</SSEAlgorithm>{}</ApplyServerSideEncryptionByDefault></Rule>\
         </ServerSideEncryptionConfiguration>",
        S3_XMLNS,
        encryption.as_str(),
        key
    )
    .into_bytes()
}

fn versioning_configuration() -> Vec<u8> {
    format!(
        "<VersioningConfiguration xmlns=\"{}\"><Status>Enabled</Status></VersioningConfiguration>",
        S3_XMLNS
    )
    .into_bytes()
}

#[async_trait]
impl BucketProvider for S3Provider {
    async fn create_bucket(
        &self,
        credential: &Credential,
        input: &CreateBucketInput,
    ) -> Result<CreateBucketOutput, ProviderError> {
        validate_bucket_name(&input.bucket_name)?;

        let bucket = &input.bucket_name;
        let region = input.region.as_str();

        let url = self.bucket_url(bucket, region, None)?;
        let response = self
            .put(credential, region, url, location_constraint(region), false)
            .await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| self.fallback_location(bucket));

        if input.encryption != EncryptionType::None {
            let url = self.bucket_url(bucket, region, Some("encryption"))?;
            let body = encryption_configuration(input.encryption, input.kms_key_id.as_deref());
            self.put(credential, region, url, body, true)
                .await
                .map_err(|e| e.during("configure encryption"))?;
        }

        if input.versioning_enabled {
            let url = self.bucket_url(bucket, region, Some("versioning"))?;
            self.put(credential, region, url, versioning_configuration(), true)
                .await
                .map_err(|e| e.during("enable versioning"))?;
        }

        Ok(CreateBucketOutput {
            bucket_name: bucket.clone(),
            region: region.to_string(),
            location,
            created_at: Utc::now(),
        })
    }
}
