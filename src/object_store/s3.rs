use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client, Method, Response, StatusCode, Url};
use tokio_util::io::ReaderStream;

use super::sigv4::{self, Signer, EMPTY_PAYLOAD_SHA256, UNSIGNED_PAYLOAD};
use super::{ObjectBody, ObjectInfo, ObjectStore, ObjectStoreError};

#[derive(Debug, Clone)]
pub struct S3Config {
    /// e.g. `http://minio:9000`. Requests use path-style addressing.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout: Duration,
}

/// S3-compatible object store (MinIO, AWS S3) speaking SigV4-signed HTTP.
pub struct S3Store {
    client: Client,
    endpoint: Url,
    host: String,
    bucket: String,
    signer: Signer,
    timeout: Duration,
}

#[derive(Debug, Default)]
struct ListPage {
    objects: Vec<ObjectInfo>,
    truncated: bool,
    next_token: Option<String>,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, ObjectStoreError> {
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/')).map_err(|e| {
            ObjectStoreError::Backend(format!("invalid S3 endpoint {}: {e}", config.endpoint))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ObjectStoreError::Backend(format!(
                    "S3 endpoint {} has no host",
                    config.endpoint
                )))
            }
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            host,
            bucket: config.bucket,
            signer: Signer::new(config.access_key, config.secret_key, config.region),
            timeout: config.timeout,
        })
    }

    fn bucket_path(&self) -> String {
        format!("{}/{}", self.endpoint.path().trim_end_matches('/'), self.bucket)
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_path(), key.trim_start_matches('/'))
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host,
            sigv4::canonical_uri(path)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }
        url
    }

    fn transport_error(&self, e: reqwest::Error) -> ObjectStoreError {
        if e.is_timeout() {
            ObjectStoreError::Timeout(self.timeout)
        } else {
            ObjectStoreError::Backend(e.to_string())
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<(reqwest::Body, u64)>,
        payload_hash: &str,
    ) -> Result<Response, ObjectStoreError> {
        let now = Utc::now();
        let amz_date = sigv4::amz_date(now);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        let authorization =
            self.signer
                .authorization(method.as_str(), path, query, &headers, payload_hash, now);

        let mut request = self
            .client
            .request(method, self.url(path, query))
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header(AUTHORIZATION, authorization);
        if let Some((body, length)) = body {
            request = request.header(CONTENT_LENGTH, length).body(body);
        }

        request.send().await.map_err(|e| self.transport_error(e))
    }

    async fn failure(&self, operation: &str, resp: Response) -> ObjectStoreError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = error_message(&body).unwrap_or(body);
        ObjectStoreError::Backend(format!("S3 {operation} failed ({status}): {detail}"))
    }

    async fn list_page(
        &self,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListPage, ObjectStoreError> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }

        let resp = self
            .send(Method::GET, &self.bucket_path(), &query, None, EMPTY_PAYLOAD_SHA256)
            .await?;
        if !resp.status().is_success() {
            return Err(self.failure("list", resp).await);
        }

        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        parse_list_response(&body)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: ObjectBody, size: u64) -> Result<(), ObjectStoreError> {
        let (body, payload_hash) = match body {
            ObjectBody::Bytes(data) => {
                let hash = sigv4::sha256_hex(&data);
                (reqwest::Body::from(data), hash)
            }
            ObjectBody::File(file) => (
                reqwest::Body::wrap_stream(ReaderStream::new(file)),
                UNSIGNED_PAYLOAD.to_string(),
            ),
        };

        let resp = self
            .send(
                Method::PUT,
                &self.object_path(key),
                &[],
                Some((body, size)),
                &payload_hash,
            )
            .await?;
        if !resp.status().is_success() {
            return Err(self.failure("upload", resp).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let resp = self
            .send(Method::GET, &self.object_path(key), &[], None, EMPTY_PAYLOAD_SHA256)
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(self.failure("download", resp).await);
        }

        resp.bytes().await.map_err(|e| self.transport_error(e))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let resp = self
            .send(Method::DELETE, &self.object_path(key), &[], None, EMPTY_PAYLOAD_SHA256)
            .await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(self.failure("delete", resp).await);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let resp = self
            .send(Method::HEAD, &self.object_path(key), &[], None, EMPTY_PAYLOAD_SHA256)
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.failure("head", resp).await),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(prefix, token.as_deref()).await?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, ObjectStoreError> {
        let path = self.object_path(key);
        let query =
            self.signer
                .presigned_query("GET", &self.host, &path, expires_in.as_secs(), Utc::now());
        Ok(Some(format!(
            "{}://{}{}?{query}",
            self.endpoint.scheme(),
            self.host,
            sigv4::canonical_uri(&path)
        )))
    }

    async fn ensure_bucket(&self) -> Result<(), ObjectStoreError> {
        let path = self.bucket_path();
        let resp = self
            .send(Method::HEAD, &path, &[], None, EMPTY_PAYLOAD_SHA256)
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status() != StatusCode::NOT_FOUND {
            return Err(self.failure("bucket check", resp).await);
        }

        let resp = self
            .send(
                Method::PUT,
                &path,
                &[],
                Some((reqwest::Body::from(Bytes::new()), 0)),
                EMPTY_PAYLOAD_SHA256,
            )
            .await?;
        // Another instance may have created it in between.
        if resp.status().is_success() || resp.status() == StatusCode::CONFLICT {
            tracing::info!(bucket = %self.bucket, "Created bucket");
            return Ok(());
        }
        Err(self.failure("bucket creation", resp).await)
    }
}

fn parse_list_response(xml: &str) -> Result<ListPage, ObjectStoreError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut page = ListPage::default();
    let mut current: Option<ObjectInfo> = None;
    let mut element = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if element == "Contents" {
                    current = Some(ObjectInfo {
                        key: String::new(),
                        size: 0,
                        etag: None,
                        last_modified: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| ObjectStoreError::Backend(format!("invalid list response: {e}")))?
                    .to_string();
                match (current.as_mut(), element.as_str()) {
                    (Some(object), "Key") => object.key = text,
                    (Some(object), "Size") => object.size = text.parse().unwrap_or(0),
                    (Some(object), "ETag") => object.etag = Some(text.trim_matches('"').to_string()),
                    (Some(object), "LastModified") => {
                        object.last_modified = DateTime::parse_from_rfc3339(&text)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    (None, "IsTruncated") => page.truncated = text == "true",
                    (None, "NextContinuationToken") => page.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Contents" {
                    if let Some(object) = current.take() {
                        page.objects.push(object);
                    }
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ObjectStoreError::Backend(format!(
                    "invalid list response: {e}"
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

/// `Code: Message` from an S3 XML error body.
fn error_message(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut element = String::new();
    let mut code = None;
    let mut message = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = String::from_utf8_lossy(e.name().as_ref()).to_string();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().ok()?.to_string();
                match element.as_str() {
                    "Code" => code = Some(text),
                    "Message" => message = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => element.clear(),
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    match (code, message) {
        (Some(code), Some(message)) => Some(format!("{code}: {message}")),
        (Some(code), None) => Some(code),
        (None, message) => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>openupload</Name>
  <Prefix>uploads/1/</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-2</NextContinuationToken>
  <Contents>
    <Key>uploads/1/2024/05/01/a/hello.txt</Key>
    <LastModified>2024-05-01T10:00:00.000Z</LastModified>
    <ETag>&quot;5d41402abc4b2a76b9719d911017c592&quot;</ETag>
    <Size>5</Size>
  </Contents>
  <Contents>
    <Key>uploads/1/2024/05/01/b/photo.png</Key>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;

    fn test_store(endpoint: &str) -> S3Store {
        S3Store::new(S3Config {
            endpoint: endpoint.to_string(),
            bucket: "openupload".to_string(),
            region: "us-east-1".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn parses_list_page() {
        let page = parse_list_response(LIST_RESPONSE).unwrap();

        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("token-2"));
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "uploads/1/2024/05/01/a/hello.txt");
        assert_eq!(page.objects[0].size, 5);
        assert_eq!(
            page.objects[0].etag.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert!(page.objects[0].last_modified.is_some());
        assert_eq!(page.objects[1].size, 2048);
        assert!(page.objects[1].etag.is_none());
    }

    #[test]
    fn extracts_error_message() {
        let body = "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>";
        assert_eq!(
            error_message(body).as_deref(),
            Some("NoSuchBucket: The specified bucket does not exist")
        );
        assert_eq!(error_message(""), None);
    }

    #[test]
    fn builds_path_style_urls() {
        let store = test_store("http://minio:9000/");
        assert_eq!(store.host, "minio:9000");
        assert_eq!(
            store.url(&store.object_path("uploads/a b.txt"), &[]),
            "http://minio:9000/openupload/uploads/a%20b.txt"
        );
        assert_eq!(
            store.url(&store.bucket_path(), &[("prefix", "uploads/"), ("list-type", "2")]),
            "http://minio:9000/openupload?list-type=2&prefix=uploads%2F"
        );
    }

    #[test]
    fn default_port_is_left_out_of_host() {
        let store = test_store("https://s3.amazonaws.com");
        assert_eq!(store.host, "s3.amazonaws.com");
    }

    #[tokio::test]
    async fn presigned_url_carries_signature() {
        let store = test_store("http://minio:9000");
        let url = store
            .presign_get("uploads/x.txt", Duration::from_secs(900))
            .await
            .unwrap()
            .unwrap();

        assert!(url.starts_with("http://minio:9000/openupload/uploads/x.txt?X-Amz-Algorithm="));
        assert!(url.contains("X-Amz-Expires=900"));
        assert!(url.contains("&X-Amz-Signature="));
    }
}
