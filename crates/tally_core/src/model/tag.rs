//! Tag model. Tags are created and edited by the host only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TagId = Uuid;

/// Default swatch used when a caller does not pick a color.
pub const DEFAULT_TAG_COLOR: &str = "#8E8E93";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    /// Trimmed display name; unique case-insensitively.
    pub name: String,
    /// `#RRGGBB` color string.
    pub color: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Trims a tag name; blank names are rejected.
pub fn normalize_tag_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Accepts `#RGB`/`#RRGGBB` (any case) and returns uppercase `#RRGGBB`.
pub fn normalize_tag_color(color: &str) -> Option<String> {
    let hex = color.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => Some(format!("#{}", hex.to_ascii_uppercase())),
        3 => {
            let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            Some(format!("#{}", expanded.to_ascii_uppercase()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_tag_color, normalize_tag_name};

    #[test]
    fn tag_name_is_trimmed_and_blank_rejected() {
        assert_eq!(normalize_tag_name("  stress "), Some("stress".to_string()));
        assert_eq!(normalize_tag_name("   "), None);
    }

    #[test]
    fn tag_color_normalizes_short_and_long_forms() {
        assert_eq!(normalize_tag_color("#ff8800"), Some("#FF8800".to_string()));
        assert_eq!(normalize_tag_color("#f80"), Some("#FF8800".to_string()));
        assert_eq!(normalize_tag_color("ff8800"), None);
        assert_eq!(normalize_tag_color("#zzzzzz"), None);
    }
}
