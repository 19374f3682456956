//! License string classification.
//!
//! A license string is matched, upper-cased, against three keyword lists by
//! substring. Precedence is BLACKLISTED, then RESTRICTED, then ALLOWED;
//! anything else is UNKNOWN. A reference to an external file (`file LICENSE`)
//! always raises a warning since the actual terms are not visible.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Keywords of licenses that forbid installation.
pub const BLACKLISTED_LICENSES: &[&str] = &[
    "ACADEMIC FREE",
    "AFL",
    "AGPL",
    "AFFERO",
    "APPLE",
    "OPEN SOFTWARE",
    "NON-PROFIT",
    "REALNETWORKS",
    "RECIPROCAL",
];

/// Keywords of licenses that are installable with a warning.
pub const RESTRICTED_LICENSES: &[&str] = &[
    "AMAZON",
    "ARTISTIC",
    "CDDL",
    "COMMON DEVELOPMENT AND DISTRIBUTION",
    "CPAL",
    "COMMON PUBLIC ATTRIBUTION",
    "CC BY-SA",
    "CREATIVE COMMONS ATTRIBUTION-SHAREALIKE",
    "EPL",
    "ECLIPSE PUBLIC",
    "GNU GENERAL PUBLIC",
    "GPL",
    "GNU LESSER GENERAL PUBLIC",
    "LGPL",
    "JAVASCRIPT OBJECT NOTATION",
    "JSON",
    "MICROSOFT RECIPROCAL",
    "MS-RL",
    "MOZILLA PUBLIC LICENSE",
    "MPL",
    "Q PUBLIC",
    "IBM PUBLIC",
];

/// Keywords of licenses that are installable without a warning.
pub const ALLOWED_LICENSES: &[&str] = &[
    "INTERNAL",
    "BSD",
    "2-CLAUSE BSD",
    "3-CLAUSE BSD",
    "APACHE",
    "BOOST",
    "BSL",
    "BZIP2",
    "CREATIVE COMMONS ZERO",
    "CC0",
    "CREATIVE COMMONS ATTRIBUTION-ONLY",
    "CC BY",
    "GNU LESSER GENERAL PUBLIC",
    "LGPL",
    "HENRY SPENCER REGEX",
    "ISC",
    "MICROSOFT PUBLIC",
    "MS-PL",
    "MIT",
    "PHP",
    "POSTGRESQL",
    "PYTHON",
    "ZLIB",
    "LIBPNG",
    "SUPERVISOR",
];

/// License class of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseClass {
    Allowed,
    Restricted,
    Blacklisted,
    #[default]
    Unknown,
}

impl LicenseClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Restricted => "RESTRICTED",
            Self::Blacklisted => "BLACKLISTED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Outcome of classifying one license string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseVerdict {
    pub class: LicenseClass,
    pub install_allowed: bool,
    pub install_warning: bool,
}

impl Default for LicenseVerdict {
    fn default() -> Self {
        Self {
            class: LicenseClass::Unknown,
            install_allowed: true,
            install_warning: true,
        }
    }
}

/// Keyword lists driving classification.
#[derive(Debug, Clone)]
pub struct LicensePolicy {
    blacklisted: Vec<String>,
    restricted: Vec<String>,
    allowed: Vec<String>,
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self::new(BLACKLISTED_LICENSES, RESTRICTED_LICENSES, ALLOWED_LICENSES)
    }
}

impl LicensePolicy {
    /// Build a policy from keyword lists (matched case-insensitively).
    #[must_use]
    pub fn new(blacklisted: &[&str], restricted: &[&str], allowed: &[&str]) -> Self {
        let upper = |list: &[&str]| list.iter().map(|s| s.to_uppercase()).collect();
        Self {
            blacklisted: upper(blacklisted),
            restricted: upper(restricted),
            allowed: upper(allowed),
        }
    }

    /// The process-wide built-in policy.
    #[must_use]
    pub fn builtin() -> &'static Self {
        static POLICY: OnceLock<LicensePolicy> = OnceLock::new();
        POLICY.get_or_init(Self::default)
    }

    /// Classify a license string. `None` (no License field) is UNKNOWN.
    #[must_use]
    pub fn classify(&self, license: Option<&str>) -> LicenseVerdict {
        let Some(license) = license else {
            return LicenseVerdict::default();
        };
        let upper = license.to_uppercase();
        let hit = |list: &[String]| list.iter().any(|kw| upper.contains(kw.as_str()));

        let class = if hit(&self.blacklisted) {
            LicenseClass::Blacklisted
        } else if hit(&self.restricted) {
            LicenseClass::Restricted
        } else if hit(&self.allowed) {
            LicenseClass::Allowed
        } else {
            LicenseClass::Unknown
        };
        let file_reference = upper.contains("FILE");

        LicenseVerdict {
            class,
            install_allowed: class != LicenseClass::Blacklisted,
            install_warning: matches!(class, LicenseClass::Restricted | LicenseClass::Unknown)
                || file_reference,
        }
    }
}

/// Classify with the built-in policy.
#[must_use]
pub fn classify(license: &str) -> LicenseVerdict {
    LicensePolicy::builtin().classify(Some(license))
}
