//! S3-compatible object store.
//!
//! Talks plain HTTP to any S3-compatible endpoint (AWS, MinIO, Ceph RGW)
//! with AWS Signature Version 4 request signing. Artifact immutability
//! uses `If-None-Match: *` conditional puts.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use sha2::{Digest, Sha256};

use crate::config::StorageSettings;
use crate::error::GovernanceError;
use crate::storage::{ObjectStore, PutOutcome};

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    client: Client,
    endpoint: Url,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    path_style: bool,
}

impl S3Store {
    pub fn new(settings: &StorageSettings) -> Result<Self, GovernanceError> {
        if settings.bucket.trim().is_empty() {
            return Err(GovernanceError::validation("s3 bucket is required"));
        }
        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|e| GovernanceError::validation(format!("bad s3 endpoint: {}", e)))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
            path_style: settings.path_style,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, GovernanceError> {
        let mut url = self.endpoint.clone();
        if self.path_style {
            url.set_path(&format!("/{}/{}", self.bucket, key));
        } else {
            let host = url
                .host_str()
                .ok_or_else(|| GovernanceError::validation("s3 endpoint has no host"))?;
            let bucket_host = format!("{}.{}", self.bucket, host);
            url.set_host(Some(&bucket_host))
                .map_err(|e| GovernanceError::validation(format!("bad s3 host: {}", e)))?;
            url.set_path(&format!("/{}", key));
        }
        Ok(url)
    }

    /// AWS Signature Version 4 for a request with no query string.
    fn sign(
        &self,
        method: &Method,
        url: &Url,
        payload_hash: &str,
    ) -> Result<Vec<(&'static str, String)>, GovernanceError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(GovernanceError::validation("s3 url has no host")),
        };

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            host, payload_hash, amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            url.path(),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        let k_signing = hmac(&k_service, b"aws4_request");
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );

        Ok(vec![
            ("authorization", authorization),
            ("x-amz-date", amz_date),
            ("x-amz-content-sha256", payload_hash.to_string()),
        ])
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<Vec<u8>>,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, GovernanceError> {
        let url = self.object_url(key)?;
        let payload_hash = match &body {
            Some(bytes) => hex::encode(Sha256::digest(bytes)),
            None => hex::encode(Sha256::digest(b"")),
        };

        let mut request = self.client.request(method.clone(), url.clone());
        for (name, value) in self.sign(&method, &url, &payload_hash)? {
            request = request.header(name, value);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        if let Some(bytes) = body {
            request = request.body(bytes);
        }
        Ok(request.send().await?)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn classify_failure(status: StatusCode, key: &str) -> GovernanceError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GovernanceError::unavailable(format!("object storage returned {} for {}", status, key))
    } else {
        GovernanceError::publishing(format!("object storage returned {} for {}", status, key))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, GovernanceError> {
        let response = self
            .send(
                Method::PUT,
                key,
                Some(bytes.to_vec()),
                &[("if-none-match", "*"), ("content-type", "application/json")],
            )
            .await?;
        match response.status() {
            status if status.is_success() => Ok(PutOutcome::Created),
            StatusCode::PRECONDITION_FAILED | StatusCode::NOT_MODIFIED => {
                Ok(PutOutcome::AlreadyExists)
            }
            status => Err(classify_failure(status, key)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), GovernanceError> {
        let response = self
            .send(
                Method::PUT,
                key,
                Some(bytes.to_vec()),
                &[("content-type", "application/json")],
            )
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_failure(status, key))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GovernanceError> {
        let response = self.send(Method::GET, key, None, &[]).await?;
        match response.status() {
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(classify_failure(status, key)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, GovernanceError> {
        let response = self.send(Method::HEAD, key, None, &[]).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(classify_failure(status, key)),
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
