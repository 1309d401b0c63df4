//! Avatar reference types

use serde::{Deserialize, Serialize};

use crate::config::AvatarConfig;

/// Where an alter comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarKind {
    #[default]
    Premade,
    Published,
    Custom,
}

impl AvatarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premade => "premade",
            Self::Published => "published",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "premade" => Some(Self::Premade),
            "published" => Some(Self::Published),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for AvatarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The currently selected alter's presentable identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarReference {
    pub id: String,
    pub kind: AvatarKind,
    pub name: String,
    /// Persona context for reply generation
    pub persona: String,
    pub voice_id: String,
    /// Image the user uploaded for this alter, if any
    pub custom_image_url: Option<String>,
    /// Image fields declared by the alter itself, most preferred first
    pub declared_images: Vec<String>,
}

impl AvatarReference {
    pub fn from_config(config: &AvatarConfig) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            name: config.name.clone(),
            persona: config.persona.clone(),
            voice_id: config.voice_id.clone(),
            custom_image_url: None,
            declared_images: config.image_urls.clone(),
        }
    }

    /// Resolve the image to present for this alter.
    ///
    /// Preference order: custom URL, then declared images in order, then
    /// `default`. Blank candidates are skipped.
    pub fn resolve_image_url<'a>(&'a self, default: &'a str) -> &'a str {
        self.custom_image_url
            .iter()
            .chain(self.declared_images.iter())
            .map(|url| url.trim())
            .find(|url| !url.is_empty())
            .unwrap_or(default)
    }

    /// Whether anything other than the configured default would be shown
    pub fn has_own_image(&self) -> bool {
        self.custom_image_url
            .iter()
            .chain(self.declared_images.iter())
            .any(|url| !url.trim().is_empty())
    }

    /// Replace the custom image; an empty value clears it
    pub fn set_custom_image(&mut self, url: Option<String>) {
        self.custom_image_url = url.filter(|u| !u.trim().is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "https://cdn.example.com/default.png";

    fn reference() -> AvatarReference {
        AvatarReference {
            id: "alter-1".to_string(),
            kind: AvatarKind::Published,
            name: "Ada".to_string(),
            persona: "curious".to_string(),
            voice_id: "voice-1".to_string(),
            custom_image_url: None,
            declared_images: vec![],
        }
    }

    #[test]
    fn test_custom_url_wins() {
        let mut avatar = reference();
        avatar.declared_images = vec!["https://a.example.com/1.png".to_string()];
        avatar.set_custom_image(Some("https://me.example.com/custom.png".to_string()));

        assert_eq!(avatar.resolve_image_url(DEFAULT), "https://me.example.com/custom.png");
    }

    #[test]
    fn test_first_non_empty_declared_image() {
        let mut avatar = reference();
        avatar.declared_images = vec![
            "".to_string(),
            "   ".to_string(),
            "https://a.example.com/2.png".to_string(),
            "https://a.example.com/3.png".to_string(),
        ];

        assert_eq!(avatar.resolve_image_url(DEFAULT), "https://a.example.com/2.png");
    }

    #[test]
    fn test_blank_custom_url_is_skipped() {
        let mut avatar = reference();
        avatar.custom_image_url = Some("  ".to_string());
        avatar.declared_images = vec!["https://a.example.com/1.png".to_string()];

        assert_eq!(avatar.resolve_image_url(DEFAULT), "https://a.example.com/1.png");
    }

    #[test]
    fn test_falls_back_to_default() {
        let avatar = reference();
        assert_eq!(avatar.resolve_image_url(DEFAULT), DEFAULT);
        assert!(!avatar.has_own_image());
    }

    #[test]
    fn test_resolution_order_for_every_candidate_subset() {
        let custom = "https://c.example.com/custom.png";
        let first = "https://d.example.com/first.png";
        let second = "https://d.example.com/second.png";

        for mask in 0..8u8 {
            let mut avatar = reference();
            if mask & 1 != 0 {
                avatar.custom_image_url = Some(custom.to_string());
            }
            avatar.declared_images = vec![
                if mask & 2 != 0 { first.to_string() } else { String::new() },
                if mask & 4 != 0 { second.to_string() } else { String::new() },
            ];

            let expected = if mask & 1 != 0 {
                custom
            } else if mask & 2 != 0 {
                first
            } else if mask & 4 != 0 {
                second
            } else {
                DEFAULT
            };
            assert_eq!(avatar.resolve_image_url(DEFAULT), expected, "mask {mask}");
        }
    }

    #[test]
    fn test_avatar_kind_parse() {
        assert_eq!(AvatarKind::parse("Custom"), Some(AvatarKind::Custom));
        assert_eq!(AvatarKind::parse("published"), Some(AvatarKind::Published));
        assert_eq!(AvatarKind::parse("nope"), None);
        assert_eq!(AvatarKind::Premade.to_string(), "premade");
    }
}
