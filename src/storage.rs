use std::path::Path;

use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::config::MediaConfig;

/// A successfully stored media object with its durable URL.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
}

/// Media upload service: takes a local file path, returns a durable URL.
///
/// Upload failure is non-throwing and reported as `None`; callers distinguish
/// it from the missing-input case, which they check before calling.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Option<UploadedMedia>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    endpoint: String,
    bucket: String,
}

impl Storage {
    pub async fn new(cfg: &MediaConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new("us-east-1".to_string()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            endpoint: cfg.endpoint.clone(),
            bucket: cfg.bucket.clone(),
        })
    }
}

#[async_trait]
impl MediaStorage for Storage {
    async fn upload(&self, local_path: &Path) -> Option<UploadedMedia> {
        let ext = local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let key = format!("uploads/{}.{}", Uuid::new_v4(), ext);

        let body = match ByteStream::from_path(local_path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, path = %local_path.display(), "failed to read upload");
                return None;
            }
        };

        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(mime_from_ext(ext))
            .send()
            .await;

        match put {
            Ok(_) => Some(UploadedMedia {
                // Path-style URL, matching force_path_style above.
                url: format!("{}/{}/{}", self.endpoint, self.bucket, key),
            }),
            Err(e) => {
                warn!(error = %e, %key, "s3 put_object failed");
                None
            }
        }
    }
}

fn mime_from_ext(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_from_ext() {
        assert_eq!(mime_from_ext("jpg"), "image/jpeg");
        assert_eq!(mime_from_ext("jpeg"), "image/jpeg");
        assert_eq!(mime_from_ext("png"), "image/png");
        assert_eq!(mime_from_ext("webp"), "image/webp");
        assert_eq!(mime_from_ext("heic"), "image/heic");
        assert_eq!(mime_from_ext("exe"), "application/octet-stream");
    }
}
