//! Avatar selection held by a chat
//!
//! The streaming service only accepts images it can fetch, so anything not
//! already on our upload host is re-hosted once and the result cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alter_core::{AvatarReference, FileUploader};
use tracing::{debug, info};

pub struct AvatarState {
    uploader: Arc<dyn FileUploader>,
    default_image: String,
    current: Mutex<AvatarReference>,
    /// source URL -> hosted URL
    hosted: Mutex<HashMap<String, String>>,
}

impl AvatarState {
    pub fn new(
        reference: AvatarReference,
        default_image: impl Into<String>,
        uploader: Arc<dyn FileUploader>,
    ) -> Self {
        Self {
            uploader,
            default_image: default_image.into(),
            current: Mutex::new(reference),
            hosted: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AvatarReference> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.hosted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn reference(&self) -> AvatarReference {
        self.lock().clone()
    }

    pub fn replace(&self, reference: AvatarReference) {
        *self.lock() = reference;
    }

    pub fn uploader(&self) -> &Arc<dyn FileUploader> {
        &self.uploader
    }

    /// Image to show, never empty unless the configured default is
    pub fn image_url(&self) -> String {
        self.lock().resolve_image_url(&self.default_image).to_string()
    }

    pub fn voice_id(&self) -> String {
        self.lock().voice_id.clone()
    }

    /// The current image as a URL the streaming service can fetch
    pub async fn presentable_image(&self) -> alter_core::Result<String> {
        let url = self.image_url();
        if self.uploader.is_hosted(&url) {
            return Ok(url);
        }

        let cached = self.cache().get(&url).cloned();
        if let Some(hosted) = cached {
            debug!(source = %url, "Using cached hosted image");
            return Ok(hosted);
        }

        let hosted = self.uploader.rehost_url(&url).await?;
        info!(source = %url, hosted = %hosted, "Avatar image re-hosted");
        self.cache().insert(url, hosted.clone());
        Ok(hosted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeUploader, HOSTED_PREFIX};
    use alter_core::AvatarKind;

    fn reference(images: Vec<&str>) -> AvatarReference {
        AvatarReference {
            id: "alter-1".to_string(),
            kind: AvatarKind::Premade,
            name: "Ada".to_string(),
            persona: String::new(),
            voice_id: "voice-1".to_string(),
            custom_image_url: None,
            declared_images: images.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn test_hosted_image_is_used_as_is() {
        let uploader = Arc::new(FakeUploader::default());
        let hosted = format!("{HOSTED_PREFIX}ada.png");
        let state = AvatarState::new(reference(vec![&hosted]), "", uploader.clone());

        assert_eq!(state.presentable_image().await.unwrap(), hosted);
        assert!(uploader.rehosted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_image_rehosted_once() {
        let uploader = Arc::new(FakeUploader::default());
        let state = AvatarState::new(
            reference(vec!["https://elsewhere.example.org/ada.png"]),
            "",
            uploader.clone(),
        );

        let first = state.presentable_image().await.unwrap();
        let second = state.presentable_image().await.unwrap();
        assert!(first.starts_with(HOSTED_PREFIX));
        assert_eq!(first, second);
        assert_eq!(uploader.rehosted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_falls_back_to_default_image() {
        let state = AvatarState::new(
            reference(vec!["  "]),
            "https://cdn.example.com/default.png",
            Arc::new(FakeUploader::default()),
        );
        assert_eq!(state.image_url(), "https://cdn.example.com/default.png");
    }
}
