//! Key classes used to pick a staleness window.

use crate::domain::document::ContentKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Documents edited routinely (projects, gallery selections).
    Standard,
    /// Documents that rarely change (bios, contact details).
    Stable,
}

impl KeyClass {
    pub fn of(key: &ContentKey, stable_keys: &[String]) -> Self {
        if stable_keys.iter().any(|stable| stable == key.as_str()) {
            KeyClass::Stable
        } else {
            KeyClass::Standard
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyClass::Standard => "standard",
            KeyClass::Stable => "stable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_exact_key() {
        let stable = vec!["about".to_string()];
        let about = ContentKey::new("about").expect("key");
        let nested = ContentKey::new("pages/about").expect("key");

        assert_eq!(KeyClass::of(&about, &stable), KeyClass::Stable);
        assert_eq!(KeyClass::of(&nested, &stable), KeyClass::Standard);
    }
}
