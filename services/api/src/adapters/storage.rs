//! services/api/src/adapters/storage.rs
//!
//! Object-storage adapter implementing `ImageStorageService` against a
//! Supabase-style storage REST endpoint.

use async_trait::async_trait;
use exam_report_core::ports::{ImageStorageService, PortError, PortResult};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpStorageAdapter {
    client: reqwest::Client,
    base_url: String,
    key: String,
    bucket: String,
}

impl HttpStorageAdapter {
    pub fn new(client: reqwest::Client, base_url: String, key: String, bucket: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            bucket,
        }
    }

    /// Joins `prefix`, the bucket and each `/`-separated piece of `path` onto the
    /// base URL. Every piece is percent-encoded, so `#`, `?` and `%` stay in the key.
    fn object_url(&self, prefix: &[&str], path: &str) -> PortResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| PortError::Unexpected(format!("invalid storage url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| PortError::Unexpected("storage url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(prefix)
            .push(&self.bucket)
            .extend(path.split('/'));
        Ok(url)
    }

    fn upload_url(&self, path: &str) -> PortResult<Url> {
        self.object_url(&["object"], path)
    }

    /// The durable, publicly readable URL of a stored object.
    pub fn public_url(&self, path: &str) -> PortResult<Url> {
        self.object_url(&["object", "public"], path)
    }
}

#[async_trait]
impl ImageStorageService for HttpStorageAdapter {
    async fn upload(&self, path: &str, bytes: &[u8], mime_type: &str) -> PortResult<String> {
        let response = self
            .client
            .post(self.upload_url(path)?)
            .header(AUTHORIZATION, format!("Bearer {}", self.key))
            .header("apikey", &self.key)
            .header(CONTENT_TYPE, mime_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                error!("Storage request for {} failed: {:?}", path, e);
                PortError::Unexpected(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Storage rejected {} with {}: {}", path, status, body);
            return Err(PortError::Unexpected(format!("storage returned {}", status)));
        }

        info!(bucket = %self.bucket, path = %path, "Stored exam image.");
        Ok(self.public_url(path)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use exam_report_core::submission::storage_path;
    use uuid::Uuid;

    fn adapter() -> HttpStorageAdapter {
        HttpStorageAdapter::new(
            reqwest::Client::new(),
            "https://proj.supabase.co/storage/v1/".to_string(),
            "key".to_string(),
            "exam_images".to_string(),
        )
    }

    #[test]
    fn urls_are_built_from_bucket_and_path() {
        let adapter = adapter();
        assert_eq!(
            adapter.upload_url("u/1_a.png").unwrap().as_str(),
            "https://proj.supabase.co/storage/v1/object/exam_images/u/1_a.png"
        );
        assert_eq!(
            adapter.public_url("u/1_a.png").unwrap().as_str(),
            "https://proj.supabase.co/storage/v1/object/public/exam_images/u/1_a.png"
        );
    }

    #[test]
    fn reserved_characters_in_file_names_stay_in_the_object_key() {
        let adapter = adapter();
        let at = Utc.timestamp_millis_opt(1_792_146_696_519).unwrap();
        let path = storage_path(Uuid::nil(), at, "raio-x #2?v.png");

        for url in [adapter.upload_url(&path).unwrap(), adapter.public_url(&path).unwrap()] {
            assert_eq!(url.query(), None);
            assert_eq!(url.fragment(), None);
            assert!(url.path().ends_with("/1792146696519_raio-x%20%232%3Fv.png"), "{}", url);
        }

        let url = adapter.upload_url("a%b/c.png").unwrap();
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments[segments.len() - 2..], ["a%25b", "c.png"]);
    }
}
