//! Viewer configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration. Deployment secrets (signing endpoint and token) can be
//! overridden from the environment.

use serde::{Deserialize, Serialize};
use shared_types::{PlacementType, Role, SigneeColor};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const ENV_SIGNING_URL: &str = "DOCSIGN_SIGNING_URL";
pub const ENV_SIGNING_TOKEN: &str = "DOCSIGN_SIGNING_TOKEN";

/// Default signee colors
pub const DEFAULT_PALETTE: [SigneeColor; 8] = [
    SigneeColor::rgb(255, 194, 102),
    SigneeColor::rgb(134, 207, 245),
    SigneeColor::rgb(178, 223, 139),
    SigneeColor::rgb(255, 153, 153),
    SigneeColor::rgb(204, 170, 255),
    SigneeColor::rgb(255, 221, 119),
    SigneeColor::rgb(128, 222, 204),
    SigneeColor::rgb(240, 170, 210),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Colors handed out to signees
    pub palette: Palette,
    /// Pointer-space widget sizes per placement type
    pub footprints: Footprints,
    pub roster: RosterConfig,
    pub signing: SigningSettings,
    pub viewer: ViewerSettings,
}

impl PlacementConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: PlacementConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Override deployment values from `DOCSIGN_SIGNING_URL` / `DOCSIGN_SIGNING_TOKEN`
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_SIGNING_URL) {
            if !url.is_empty() {
                self.signing.endpoint = Some(url);
            }
        }
        if let Ok(token) = std::env::var(ENV_SIGNING_TOKEN) {
            if !token.is_empty() {
                self.signing.token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.palette.0.is_empty() {
            return Err(ConfigError::Invalid("palette must not be empty".into()));
        }
        for t in PlacementType::ALL {
            let size = self.footprints.size_for(t);
            if size.width <= 0.0 || size.height <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "footprint for {} must be positive",
                    t.as_str()
                )));
            }
        }
        if self.roster.single_editor {
            let editors = self
                .roster
                .signees
                .iter()
                .filter(|s| s.role == Role::Editor)
                .count();
            if editors > 1 {
                return Err(ConfigError::Invalid(
                    "single_editor policy allows one seeded editor".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Palette(pub Vec<SigneeColor>);

impl Default for Palette {
    fn default() -> Self {
        Self(DEFAULT_PALETTE.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Footprints {
    pub signature: Size,
    pub initial: Size,
    pub name: Size,
    pub date: Size,
    pub ds: Size,
}

impl Default for Footprints {
    fn default() -> Self {
        Self {
            signature: Size::new(250.0, 100.0),
            initial: Size::new(120.0, 60.0),
            name: Size::new(200.0, 40.0),
            date: Size::new(150.0, 40.0),
            ds: Size::new(250.0, 100.0),
        }
    }
}

impl Footprints {
    pub fn size_for(&self, placement_type: PlacementType) -> Size {
        match placement_type {
            PlacementType::Signature => self.signature,
            PlacementType::Initial => self.initial,
            PlacementType::Name => self.name,
            PlacementType::Date => self.date,
            PlacementType::DigitalSignature => self.ds,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Reject a second Editor
    pub single_editor: bool,
    /// Signees created at startup, first one active
    pub signees: Vec<SeedSignee>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSignee {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Signer
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Image stamped into the signature appearance
    pub watermark_path: Option<PathBuf>,
    pub reason: String,
    pub location: String,
    pub signature_type: String,
    pub cades_level: String,
    pub flatten: bool,
    pub appearance: Appearance,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            watermark_path: None,
            reason: "Document approval".to_string(),
            location: "Online".to_string(),
            signature_type: "cades".to_string(),
            cades_level: "b-lt".to_string(),
            flatten: false,
            appearance: Appearance::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Appearance {
    pub mode: String,
    pub show_watermark: bool,
    pub show_sign_date: bool,
    pub show_date_timezone: bool,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            mode: "signatureAndDescription".to_string(),
            show_watermark: true,
            show_sign_date: true,
            show_date_timezone: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    /// DOM container the engine mounts into
    pub container: String,
    pub base_url: Option<String>,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            container: "#pdf-viewer".to_string(),
            base_url: None,
        }
    }
}
