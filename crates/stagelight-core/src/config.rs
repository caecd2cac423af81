//! Engine configuration
//!
//! One [`EngineConfig`] describes the whole rig: audio parameters, the
//! control server, the DMX device and every output. Files are JSON or TOML,
//! picked by extension.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audio::AudioSettings;
use crate::fixture::{Fixture, FixtureOptions, FixtureProfile, LinkConfig, MappingDirective};
use crate::logging::LogConfig;
use crate::{CoreError, Result};

/// Files tried, in order, when no path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config.json", "config.toml"];

/// Channels in one DMX universe
pub const DMX_UNIVERSE_CHANNELS: u16 = 512;

/// Most pixels a remote strip may have
pub const MAX_STRIP_PIXELS: usize = 256;

/// Control server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Whether the control server runs at all
    pub enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 37737,
            enabled: true,
        }
    }
}

/// DMX device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "lowercase")]
pub enum DmxConfig {
    /// Art-Net over UDP
    Artnet {
        /// Node address, `host` or `host:port`
        target: String,
        /// Art-Net universe
        #[serde(default)]
        universe: u16,
    },
    /// Discard output
    Sink,
}

/// Audio capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Substring of the input device name; default device when unset
    pub device: Option<String>,
    /// Seconds without a heartbeat before the worker is restarted
    pub watchdog_timeout: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            watchdog_timeout: 0.5,
        }
    }
}

/// A DMX fixture output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Unique name
    pub name: String,
    /// DMX base address (1-based)
    #[serde(default = "default_address")]
    pub address: u16,
    /// Audio mapping directives
    #[serde(default)]
    pub mapping: Vec<MappingDirective>,
    /// Fixtures mirroring this one
    #[serde(default)]
    pub link: Vec<LinkConfig>,
    /// Initial value overrides
    #[serde(default)]
    pub initialize: BTreeMap<String, u8>,
    /// Laser position box `[xmin, ymin, xmax, ymax]`
    #[serde(default)]
    pub restrict_position: Option<[u8; 4]>,
}

fn default_address() -> u16 {
    1
}

/// A networked LED strip output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripConfig {
    /// Unique name
    pub name: String,
    /// Strip controller host
    #[serde(default)]
    pub host: Option<String>,
    /// Strip controller UDP port
    #[serde(default)]
    pub port: Option<u16>,
    /// Number of pixels
    #[serde(default)]
    pub n_pixels: Option<usize>,
}

impl StripConfig {
    /// Fastest refresh the strip supports, in frames per second
    pub fn max_fps(&self) -> f64 {
        let pixels = self.n_pixels.unwrap_or(0) as f64;
        1.0 / (pixels * 30e-6 + 50e-6)
    }
}

/// One configured output, tagged by device type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device")]
pub enum OutputConfig {
    /// RGB moving head
    TomshineMovingHead6in1(FixtureConfig),
    /// Gobo projector
    UKingGobo(FixtureConfig),
    /// Gobo projector with the alternate color wheel
    UnnamedGobo(FixtureConfig),
    /// Four-color laser
    Generic4ColorLaser(FixtureConfig),
    /// Networked LED strip
    RemoteStrip(StripConfig),
}

impl OutputConfig {
    /// Output name
    pub fn name(&self) -> &str {
        match self {
            OutputConfig::RemoteStrip(strip) => &strip.name,
            other => other.fixture().map(|f| f.name.as_str()).unwrap_or_default(),
        }
    }

    /// Device type name
    pub fn device(&self) -> &'static str {
        match self {
            OutputConfig::TomshineMovingHead6in1(_) => "TomshineMovingHead6in1",
            OutputConfig::UKingGobo(_) => "UKingGobo",
            OutputConfig::UnnamedGobo(_) => "UnnamedGobo",
            OutputConfig::Generic4ColorLaser(_) => "Generic4ColorLaser",
            OutputConfig::RemoteStrip(_) => "RemoteStrip",
        }
    }

    /// Fixture settings, `None` for LED strips
    pub fn fixture(&self) -> Option<&FixtureConfig> {
        match self {
            OutputConfig::TomshineMovingHead6in1(f)
            | OutputConfig::UKingGobo(f)
            | OutputConfig::UnnamedGobo(f)
            | OutputConfig::Generic4ColorLaser(f) => Some(f),
            OutputConfig::RemoteStrip(_) => None,
        }
    }

    /// Strip settings, `None` for DMX fixtures
    pub fn strip(&self) -> Option<&StripConfig> {
        match self {
            OutputConfig::RemoteStrip(s) => Some(s),
            _ => None,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture sample rate in Hz
    pub mic_rate: u32,
    /// Frame loop rate
    pub fps: u32,
    /// Mel bins in the smoothed spectrum
    pub n_fft_bins: usize,
    /// Blocks concatenated before the FFT
    pub n_rolling_history: usize,
    /// Peak level below which the spectrum is silence
    pub min_volume_threshold: f32,
    /// Lowest Mel filter edge (Hz)
    pub min_frequency: f32,
    /// Highest Mel filter edge (Hz)
    pub max_frequency: f32,
    /// Spectrum mean below which audio counts as idle
    pub idle_threshold: f32,
    /// Propagate fixture links
    pub enable_links: bool,
    /// Fixtures suspended at startup
    pub suspended: Vec<String>,
    /// Control server
    pub network: NetworkConfig,
    /// DMX device; no DMX output when unset
    pub dmx: Option<DmxConfig>,
    /// Audio capture
    pub capture: CaptureConfig,
    /// Logging
    pub log: LogConfig,
    /// Outputs in declared order
    pub outputs: Vec<OutputConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let audio = AudioSettings::default();
        Self {
            mic_rate: audio.mic_rate,
            fps: audio.fps,
            n_fft_bins: audio.n_fft_bins,
            n_rolling_history: audio.n_rolling_history,
            min_volume_threshold: audio.min_volume_threshold,
            min_frequency: audio.min_frequency,
            max_frequency: audio.max_frequency,
            idle_threshold: audio.idle_threshold,
            enable_links: false,
            suspended: Vec::new(),
            network: NetworkConfig::default(),
            dmx: None,
            capture: CaptureConfig::default(),
            log: LogConfig::default(),
            outputs: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load `path`, or the first of [`DEFAULT_CONFIG_PATHS`] that exists.
    ///
    /// Falls back to defaults when no path is given and none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_path(path);
        }
        for candidate in DEFAULT_CONFIG_PATHS {
            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Self::from_path(&candidate);
            }
        }
        info!("No configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON or TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(CoreError::InvalidConfig(format!(
                    "{}: unsupported config format {:?}",
                    path.display(),
                    other
                )))
            }
        };
        config.validate()?;
        info!(
            "Loaded configuration from {:?}: {} outputs",
            path,
            config.outputs.len()
        );
        Ok(config)
    }

    /// Parse and validate JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked before the rig starts
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(CoreError::InvalidConfig("fps must be positive".into()));
        }
        if self.n_fft_bins == 0 {
            return Err(CoreError::InvalidConfig(
                "n_fft_bins must be positive".into(),
            ));
        }
        if self.min_frequency >= self.max_frequency {
            return Err(CoreError::InvalidConfig(format!(
                "min_frequency {} must be below max_frequency {}",
                self.min_frequency, self.max_frequency
            )));
        }

        let mut names = HashSet::new();
        for output in &self.outputs {
            if !names.insert(output.name()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate output name '{}'",
                    output.name()
                )));
            }
            match output {
                OutputConfig::RemoteStrip(strip) => self.validate_strip(strip)?,
                fixture => self.validate_fixture(fixture)?,
            }
        }

        for name in &self.suspended {
            if !names.contains(name.as_str()) {
                return Err(CoreError::Unknown {
                    kind: "suspended output",
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_strip(&self, strip: &StripConfig) -> Result<()> {
        let missing = [
            ("host", strip.host.is_none()),
            ("port", strip.port.is_none()),
            ("n_pixels", strip.n_pixels.is_none()),
        ];
        if let Some((key, _)) = missing.iter().find(|(_, absent)| *absent) {
            return Err(CoreError::InvalidConfig(format!(
                "RemoteStrip '{}' requires '{}'",
                strip.name, key
            )));
        }
        let pixels = strip.n_pixels.unwrap_or(0);
        if pixels > MAX_STRIP_PIXELS {
            return Err(CoreError::InvalidConfig(format!(
                "RemoteStrip '{}' has {} pixels, at most {} supported",
                strip.name, pixels, MAX_STRIP_PIXELS
            )));
        }
        if f64::from(self.fps) > strip.max_fps() {
            return Err(CoreError::InvalidConfig(format!(
                "fps {} exceeds the {:.0} fps refresh limit of RemoteStrip '{}'",
                self.fps,
                strip.max_fps(),
                strip.name
            )));
        }
        Ok(())
    }

    fn validate_fixture(&self, output: &OutputConfig) -> Result<()> {
        let profile = self.profile(output)?;
        let Some(fixture) = output.fixture() else {
            return Ok(());
        };
        let last = (u32::from(fixture.address) + u32::from(profile.footprint())).saturating_sub(1);
        if fixture.address == 0 || last > u32::from(DMX_UNIVERSE_CHANNELS) {
            return Err(CoreError::InvalidConfig(format!(
                "{} at address {} needs channels up to {}, the universe has {}",
                fixture.name, fixture.address, last, DMX_UNIVERSE_CHANNELS
            )));
        }
        for directive in &fixture.mapping {
            if profile.mapper(&directive.function).is_none() {
                return Err(CoreError::Unknown {
                    kind: "mapping function",
                    name: format!("{}.{}", fixture.name, directive.function),
                });
            }
        }
        for function in fixture.initialize.keys() {
            if !profile.has_function(function) {
                return Err(CoreError::InvalidConfig(format!(
                    "{}: cannot initialize unknown function '{}'",
                    fixture.name, function
                )));
            }
        }
        Ok(())
    }

    fn profile(&self, output: &OutputConfig) -> Result<&'static FixtureProfile> {
        FixtureProfile::builtin(output.device()).ok_or_else(|| CoreError::Unknown {
            kind: "fixture type",
            name: output.device().to_string(),
        })
    }

    /// Audio stage parameters
    pub fn audio_settings(&self) -> AudioSettings {
        AudioSettings {
            mic_rate: self.mic_rate,
            fps: self.fps,
            n_fft_bins: self.n_fft_bins,
            n_rolling_history: self.n_rolling_history,
            min_volume_threshold: self.min_volume_threshold,
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            idle_threshold: self.idle_threshold,
        }
    }

    /// Build every DMX fixture in declared order.
    ///
    /// With `manual` every fixture starts suspended.
    pub fn build_fixtures(&self, manual: bool) -> Result<Vec<Fixture>> {
        let mut fixtures = Vec::new();
        for output in &self.outputs {
            let Some(config) = output.fixture() else {
                continue;
            };
            let profile = self.profile(output)?;
            let options = FixtureOptions {
                address: config.address,
                mapping: config.mapping.clone(),
                links: config.link.clone(),
                links_enabled: self.enable_links,
                initialize: config.initialize.clone(),
                restrict_position: config.restrict_position.unwrap_or([0, 0, 255, 255]),
                suspended: manual || self.suspended.contains(&config.name),
            };
            debug!(
                "Building {} '{}' at address {}",
                profile.kind, config.name, config.address
            );
            fixtures.push(Fixture::new(config.name.clone(), profile, options)?);
        }
        Ok(fixtures)
    }

    /// LED strip outputs in declared order
    pub fn strips(&self) -> impl Iterator<Item = &StripConfig> {
        self.outputs.iter().filter_map(OutputConfig::strip)
    }
}
