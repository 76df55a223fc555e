//! S3 bucket reader.
//!
//! Lists the bucket with `ListObjectsV2` (following continuation tokens),
//! filters keys through include/exclude globs relative to the prefix, and
//! downloads every match with `GetObject`. Requests are signed with AWS
//! Signature V4 using the credentials from the reader arguments; signing
//! uses `hmac` + `sha2` only.
//!
//! # Addressing
//!
//! | Endpoint | Style | Example |
//! |----------|-------|---------|
//! | *(none)* | virtual-hosted | `https://docs.s3.us-east-1.amazonaws.com/guide.md` |
//! | `http://127.0.0.1:9000` | path | `http://127.0.0.1:9000/docs/guide.md` |
//!
//! A failed listing makes the whole source unavailable. A failed or
//! non-UTF-8 object download is logged and skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use context_pipeline_core::models::Metadata;
use context_pipeline_core::{PipelineError, Result};
use globset::GlobSet;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{build_globset, RawItem, Reader, FILE_NAME_KEY, FILE_PATH_KEY};
use crate::config::S3Config;
use crate::payload::{AssetType, S3ReaderArgs};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**"];

pub struct S3Reader {
    args: S3ReaderArgs,
    config: S3Config,
    include: GlobSet,
    exclude: GlobSet,
    client: reqwest::Client,
}

/// Metadata for a single object, parsed from a `ListObjectsV2` response.
#[derive(Debug, Clone, PartialEq)]
struct S3Object {
    key: String,
    /// Entity tag, stripped of surrounding quotes.
    etag: String,
    size: i64,
}

/// Where requests for this bucket go.
#[derive(Debug, Clone, PartialEq)]
struct Location {
    scheme: String,
    host: String,
    /// Path prefix before the object key: `/` or `/<bucket>/`.
    base_path: String,
}

impl S3Reader {
    pub fn new(args: S3ReaderArgs, config: S3Config) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            args,
            config,
            include,
            exclude,
            client: reqwest::Client::new(),
        })
    }

    fn location(&self) -> Location {
        match self.args.endpoint.as_deref() {
            Some(endpoint) => {
                let (scheme, rest) = endpoint.split_once("://").unwrap_or(("https", endpoint));
                Location {
                    scheme: scheme.to_string(),
                    host: rest.trim_end_matches('/').to_string(),
                    base_path: format!("/{}/", self.args.bucket_name),
                }
            }
            None => Location {
                scheme: "https".to_string(),
                host: format!(
                    "{}.s3.{}.amazonaws.com",
                    self.args.bucket_name, self.config.region
                ),
                base_path: "/".to_string(),
            },
        }
    }

    fn prefix(&self) -> &str {
        self.args.prefix.as_deref().unwrap_or("")
    }

    fn unavailable(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_kind: "s3".to_string(),
            message: message.into(),
        }
    }

    async fn signed_get(&self, location: &Location, canonical_uri: &str, query: &str) -> reqwest::Result<reqwest::Response> {
        let signed = sign_get(
            &self.args.access_key,
            &self.args.secret_key,
            &self.config.region,
            &location.host,
            canonical_uri,
            query,
            Utc::now(),
        );

        let mut url = format!("{}://{}{}", location.scheme, location.host, canonical_uri);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        self.client
            .get(&url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .header("x-amz-date", &signed.amz_date)
            .send()
            .await
    }

    /// List every object under the prefix, following continuation tokens.
    async fn list_objects(&self) -> Result<Vec<S3Object>> {
        let location = self.location();
        let canonical_uri = if location.base_path == "/" {
            "/".to_string()
        } else {
            location.base_path.trim_end_matches('/').to_string()
        };

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.prefix().is_empty() {
                params.push(("prefix".to_string(), self.prefix().to_string()));
            }
            if let Some(token) = &continuation_token {
                params.push(("continuation-token".to_string(), token.clone()));
            }
            let query = canonical_query(params);

            let resp = self
                .signed_get(&location, &canonical_uri, &query)
                .await
                .map_err(|e| {
                    self.unavailable(format!(
                        "failed to list s3://{}/{}: {}",
                        self.args.bucket_name,
                        self.prefix(),
                        e
                    ))
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(self.unavailable(format!(
                    "ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                )));
            }

            let xml = resp
                .text()
                .await
                .map_err(|e| self.unavailable(format!("failed to read listing: {}", e)))?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml);
            objects.extend(batch);

            match (is_truncated, next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn download_object(&self, key: &str) -> std::result::Result<String, String> {
        let location = self.location();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("{}{}", location.base_path, encoded_key);

        let resp = self
            .signed_get(&location, &canonical_uri, "")
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("GetObject failed (HTTP {})", resp.status()));
        }

        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "object is not UTF-8 text".to_string())
    }

    /// Key relative to the configured prefix, used for glob matching.
    fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        let prefix = self.prefix().trim_end_matches('/');
        if prefix.is_empty() {
            return key;
        }
        key.strip_prefix(prefix)
            .map(|s| s.trim_start_matches('/'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl Reader for S3Reader {
    fn asset_type(&self) -> AssetType {
        AssetType::S3
    }

    async fn load_raw(&self) -> Result<Vec<RawItem>> {
        let objects = self.list_objects().await?;
        let bucket = &self.args.bucket_name;
        let mut items = Vec::new();

        for obj in &objects {
            let rel_key = self.relative_key(&obj.key);
            if self.exclude.is_match(rel_key) || !self.include.is_match(rel_key) {
                continue;
            }

            let text = match self.download_object(&obj.key).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(bucket = %bucket, key = %obj.key, error = %e, "skipping object");
                    continue;
                }
            };

            let file_name = obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string();
            let mut metadata = Metadata::new();
            metadata.insert(FILE_NAME_KEY.into(), file_name.into());
            metadata.insert(FILE_PATH_KEY.into(), obj.key.clone().into());
            metadata.insert("bucket".into(), bucket.clone().into());
            metadata.insert("etag".into(), obj.etag.clone().into());
            metadata.insert("size".into(), obj.size.into());
            metadata.insert("url".into(), format!("s3://{}/{}", bucket, obj.key).into());

            items.push(RawItem { text, metadata });
        }

        tracing::info!(
            bucket = %bucket,
            listed = objects.len(),
            read = items.len(),
            "bucket read"
        );
        Ok(items)
    }
}

// ============ AWS SigV4 Helpers ============

/// Headers produced by signing a request.
#[derive(Debug, Clone)]
pub(crate) struct SignedRequest {
    pub authorization: String,
    pub amz_date: String,
    pub payload_hash: String,
}

/// Sign an unauthenticated-body GET request with AWS Signature V4.
pub(crate) fn sign_get(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    canonical_uri: &str,
    canonical_querystring: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    let headers = [
        ("host", host),
        ("x-amz-content-sha256", payload_hash.as_str()),
        ("x-amz-date", amz_date.as_str()),
    ];
    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "GET\n{}\n{}\n{}\n{}\n{}",
        canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            access_key, credential_scope, signed_headers, signature
        ),
        amz_date,
        payload_hash,
    }
}

/// Sorted, URI-encoded query string.
fn canonical_query(mut params: Vec<(String, String)>) -> String {
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ XML Parsing ============

/// Parse a `ListObjectsV2` body into objects, the truncation flag and the
/// next continuation token. Directory placeholder keys (ending in `/`) are
/// dropped.
fn parse_list_objects_response(xml: &str) -> (Vec<S3Object>, bool, Option<String>) {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        objects.push(S3Object {
            key: xml_unescape(&key),
            etag: extract_xml_value(block, "ETag")
                .map(|e| xml_unescape(&e).trim_matches('"').to_string())
                .unwrap_or_default(),
            size: extract_xml_value(block, "Size")
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
        });
    }

    (objects, is_truncated, next_token)
}

/// Text content of the first `<tag>` (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(endpoint: Option<&str>, prefix: Option<&str>) -> S3ReaderArgs {
        S3ReaderArgs {
            bucket_name: "docs".into(),
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            endpoint: endpoint.map(str::to_string),
            prefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn test_derive_signing_key_aws_vector() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_virtual_hosted_location() {
        let reader = S3Reader::new(args(None, None), S3Config::default()).unwrap();
        let loc = reader.location();
        assert_eq!(loc.scheme, "https");
        assert_eq!(loc.host, "docs.s3.us-east-1.amazonaws.com");
        assert_eq!(loc.base_path, "/");
    }

    #[test]
    fn test_path_style_location() {
        let reader = S3Reader::new(args(Some("http://127.0.0.1:9000/"), None), S3Config::default()).unwrap();
        let loc = reader.location();
        assert_eq!(loc.scheme, "http");
        assert_eq!(loc.host, "127.0.0.1:9000");
        assert_eq!(loc.base_path, "/docs/");
    }

    #[test]
    fn test_relative_key() {
        let reader = S3Reader::new(args(None, Some("manuals/")), S3Config::default()).unwrap();
        assert_eq!(reader.relative_key("manuals/setup/install.md"), "setup/install.md");
        assert_eq!(reader.relative_key("other/file.md"), "other/file.md");
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        let q = canonical_query(vec![
            ("prefix".into(), "a b/".into()),
            ("list-type".into(), "2".into()),
        ]);
        assert_eq!(q, "list-type=2&prefix=a%20b%2F");
    }

    #[test]
    fn test_sign_get_shape() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let signed = sign_get("AK", "SK", "us-east-1", "docs.s3.us-east-1.amazonaws.com", "/", "", now);
        assert_eq!(signed.amz_date, "20240501T120000Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AK/20240501/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        assert_eq!(
            signed.payload_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_parse_list_objects() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-2</NextContinuationToken>
  <Contents><Key>guide.md</Key><ETag>&quot;abc&quot;</ETag><Size>42</Size></Contents>
  <Contents><Key>folder/</Key><ETag>&quot;d&quot;</ETag><Size>0</Size></Contents>
  <Contents><Key>a &amp; b.txt</Key><ETag>"e"</ETag><Size>7</Size></Contents>
</ListBucketResult>"#;
        let (objects, truncated, token) = parse_list_objects_response(xml);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("tok-2"));
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "guide.md");
        assert_eq!(objects[0].etag, "abc");
        assert_eq!(objects[0].size, 42);
        assert_eq!(objects[1].key, "a & b.txt");
        assert_eq!(objects[1].etag, "e");
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello world"), "hello%20world");
        assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(uri_encode("ü"), "%C3%BC");
    }
}
