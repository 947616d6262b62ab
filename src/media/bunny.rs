//! Bunny Storage zone for images, with CDN cache purge after each upload.

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{ImageStore, MediaError};
use crate::config::BunnyConfig;

const ACCESS_KEY: &str = "AccessKey";
const UPLOAD_OK_MESSAGE: &str = "File uploaded.";

pub struct BunnyImageStore {
    client: reqwest::Client,
    config: BunnyConfig,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StorageObject {
    #[serde(rename = "ObjectName")]
    object_name: String,
    #[serde(rename = "IsDirectory")]
    is_directory: bool,
}

impl BunnyImageStore {
    pub fn new(config: BunnyConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: BunnyConfig) -> Self {
        Self { client, config }
    }

    /// `images/{path}` inside the storage zone.
    fn object_path(path: &str) -> String {
        format!("images/{}", path)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.storage_api.trim_end_matches('/'),
            Self::object_path(path)
        )
    }

    fn zone_url(&self) -> &str {
        self.config.cdn_zone_url.trim_end_matches('/')
    }

    /// Ask the CDN to drop its cached copy of `object_path`. Failures are
    /// logged; the upload itself already succeeded.
    async fn purge(&self, object_path: &str) -> bool {
        let Some(api_key) = self.config.cdn_api_key.as_deref() else {
            tracing::warn!("CDN purge not configured, skipping {}", object_path);
            return false;
        };
        let target = format!("{}/{}", self.zone_url(), object_path);
        let result = self
            .client
            .post(&self.config.purge_api)
            .query(&[("url", target.as_str())])
            .header(ACCESS_KEY, api_key)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status() == StatusCode::OK => {
                tracing::debug!("Purged CDN cache for {}", target);
                true
            }
            Ok(resp) => {
                tracing::warn!("CDN purge for {} returned {}", target, resp.status());
                false
            }
            Err(e) => {
                tracing::warn!("CDN purge for {} failed: {}", target, e);
                false
            }
        }
    }
}

#[async_trait]
impl ImageStore for BunnyImageStore {
    fn reference(&self, entity_id: &str, slot: &str) -> String {
        format!("{}/images/{}/{}.jpg", self.zone_url(), entity_id, slot)
    }

    fn accept_reference(&self, raw: &str) -> Option<String> {
        if !raw.contains("/images/") {
            return None;
        }
        if raw.starts_with("http") {
            Some(raw.to_string())
        } else {
            Some(format!("{}{}", self.zone_url(), raw))
        }
    }

    async fn put(&self, entity_id: &str, slot: &str, jpeg: Vec<u8>) -> Result<String, MediaError> {
        let path = format!("{}/{}.jpg", entity_id, slot);
        let response = self
            .client
            .put(self.object_url(&path))
            .header(ACCESS_KEY, &self.config.access_key)
            .header(CACHE_CONTROL, "no-cache")
            .body(jpeg)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let accepted = status == StatusCode::CREATED
            && serde_json::from_str::<UploadResponse>(&body)
                .map(|r| r.message == UPLOAD_OK_MESSAGE)
                .unwrap_or(false);
        if !accepted {
            return Err(MediaError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Uploaded {} to remote storage", Self::object_path(&path));
        self.purge(&Self::object_path(&path)).await;
        Ok(self.reference(entity_id, slot))
    }

    async fn remove_folder(&self, entity_id: &str) -> Result<(), MediaError> {
        let response = self
            .client
            .delete(self.object_url(&format!("{}/", entity_id)))
            .header(ACCESS_KEY, &self.config.access_key)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => Err(MediaError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn folders(&self) -> Result<Vec<String>, MediaError> {
        let response = self
            .client
            .get(self.object_url(""))
            .header(ACCESS_KEY, &self.config.access_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let objects: Vec<StorageObject> = response.json().await?;
        Ok(objects
            .into_iter()
            .filter(|o| o.is_directory)
            .map(|o| o.object_name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::routing::{post, put};
    use axum::Router;

    use super::*;

    fn store() -> BunnyImageStore {
        BunnyImageStore::new(BunnyConfig {
            storage_api: "https://storage.example/zone/".into(),
            access_key: "k".into(),
            cdn_zone_url: "https://cdn.example".into(),
            cdn_api_key: None,
            purge_api: "https://api.example/purge".into(),
        })
    }

    #[test]
    fn object_urls_live_under_images() {
        let store = store();
        assert_eq!(
            store.object_url("p1/image1.jpg"),
            "https://storage.example/zone/images/p1/image1.jpg"
        );
        assert_eq!(store.object_url(""), "https://storage.example/zone/images/");
    }

    #[test]
    fn references_point_at_the_cdn() {
        let store = store();
        assert_eq!(
            store.reference("p1", "imagenPrincipal"),
            "https://cdn.example/images/p1/imagenPrincipal.jpg"
        );
    }

    #[test]
    fn relative_references_are_prefixed_with_the_zone() {
        let store = store();
        assert_eq!(
            store.accept_reference("/images/p1/image2.jpg").as_deref(),
            Some("https://cdn.example/images/p1/image2.jpg")
        );
        assert_eq!(
            store
                .accept_reference("https://cdn.example/images/p1/image2.jpg")
                .as_deref(),
            Some("https://cdn.example/images/p1/image2.jpg")
        );
        assert!(store.accept_reference("/public/placeholder.svg").is_none());
    }

    #[test]
    fn storage_listing_parses() {
        let objects: Vec<StorageObject> = serde_json::from_str(
            r#"[{"ObjectName":"p1","IsDirectory":true,"Length":0},
                {"ObjectName":"x.jpg","IsDirectory":false,"Length":10}]"#,
        )
        .unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects[0].is_directory);
        assert_eq!(objects[1].object_name, "x.jpg");
    }

    #[derive(Clone, Default)]
    struct Seen {
        uploads: Arc<Mutex<Vec<String>>>,
        purges: Arc<Mutex<Vec<String>>>,
    }

    /// Local stand-in for the storage zone and the purge API. Uploads are
    /// answered with `status` and `body`.
    async fn fake_bunny(status: u16, body: &'static str) -> (BunnyImageStore, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route(
                "/zone/images/{*path}",
                put(move |State(seen): State<Seen>, Path(path): Path<String>| async move {
                    seen.uploads.lock().unwrap().push(path);
                    (StatusCode::from_u16(status).unwrap(), body)
                }),
            )
            .route(
                "/purge",
                post(
                    |State(seen): State<Seen>, Query(query): Query<HashMap<String, String>>| async move {
                        let url = query.get("url").cloned().unwrap_or_default();
                        seen.purges.lock().unwrap().push(url);
                        StatusCode::OK
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = BunnyImageStore::new(BunnyConfig {
            storage_api: format!("http://{addr}/zone"),
            access_key: "k".into(),
            cdn_zone_url: "https://cdn.example".into(),
            cdn_api_key: Some("p".into()),
            purge_api: format!("http://{addr}/purge"),
        });
        (store, seen)
    }

    const UPLOADED: &str = r#"{"HttpCode":201,"Message":"File uploaded."}"#;

    #[tokio::test]
    async fn accepted_upload_is_purged_from_the_cdn() {
        let (store, seen) = fake_bunny(201, UPLOADED).await;
        let reference = store.put("p1", "image1", vec![0xFF, 0xD8]).await.unwrap();
        assert_eq!(reference, "https://cdn.example/images/p1/image1.jpg");
        assert_eq!(*seen.uploads.lock().unwrap(), vec!["p1/image1.jpg"]);
        assert_eq!(
            *seen.purges.lock().unwrap(),
            vec!["https://cdn.example/images/p1/image1.jpg"]
        );
    }

    #[tokio::test]
    async fn upload_needs_created_status_and_message() {
        for (status, body) in [
            (200, UPLOADED),
            (201, r#"{"HttpCode":201,"Message":"Something else."}"#),
            (201, "not json"),
            (401, r#"{"HttpCode":401,"Message":"Unauthorized"}"#),
        ] {
            let (store, seen) = fake_bunny(status, body).await;
            let err = store.put("p1", "image1", vec![0xFF, 0xD8]).await.unwrap_err();
            assert!(
                matches!(err, MediaError::Rejected { status: s, .. } if s == status),
                "{status} {body}: {err}"
            );
            assert_eq!(seen.uploads.lock().unwrap().len(), 1);
            assert!(seen.purges.lock().unwrap().is_empty(), "{status} {body}");
        }
    }
}
