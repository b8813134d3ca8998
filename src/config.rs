// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; a missing file or section falls back to defaults.
// Values that would break the frame protocol are rejected by `validate`.

use anyhow::{bail, Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::vulkan::ShaderPaths;
use crate::frame::{RendererSettings, SimulationClock};
use crate::WORKGROUP_SIZE;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub simulation: SimulationConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Particle Frames".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    Fixed,
    Measured,
}

/// Simulation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub particle_count: u32,
    pub seed: u64,
    /// Step used by the fixed clock.
    pub time_step: f32,
    pub clock: ClockKind,
    /// Upper bound for the measured clock.
    pub max_time_step: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            particle_count: WORKGROUP_SIZE * 64,
            seed: 0,
            time_step: 0.001,
            clock: ClockKind::Fixed,
            max_time_step: 0.01,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Compiled SPIR-V locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub compute: PathBuf,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            compute: PathBuf::from("shaders/particle.comp.spv"),
            vertex: PathBuf::from("shaders/particle.vert.spv"),
            fragment: PathBuf::from("shaders/particle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "particle_frames.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.particle_count == 0 {
            bail!("simulation.particle_count must be at least 1");
        }
        if !(sim.time_step > 0.0) {
            bail!("simulation.time_step must be positive, got {}", sim.time_step);
        }
        if !(sim.max_time_step > 0.0) {
            bail!(
                "simulation.max_time_step must be positive, got {}",
                sim.max_time_step
            );
        }
        if sim.particle_count % WORKGROUP_SIZE != 0 {
            log::warn!(
                "particle_count {} is not a multiple of {}; the last {} particles will not move",
                sim.particle_count,
                WORKGROUP_SIZE,
                sim.particle_count % WORKGROUP_SIZE
            );
        }
        Ok(())
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn shader_paths(&self) -> ShaderPaths {
        ShaderPaths {
            compute: self.shaders.compute.clone(),
            vertex: self.shaders.vertex.clone(),
            fragment: self.shaders.fragment.clone(),
        }
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        let clock = match self.simulation.clock {
            ClockKind::Fixed => SimulationClock::fixed(self.simulation.time_step),
            ClockKind::Measured => SimulationClock::measured(self.simulation.max_time_step),
        };
        RendererSettings {
            clock,
            clear_color: self.graphics.clear_color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.simulation.particle_count, 16384);
        assert_eq!(config.simulation.seed, 0);
        assert_eq!(config.simulation.time_step, 0.001);
        assert_eq!(config.simulation.clock, ClockKind::Fixed);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [simulation]
            particle_count = 512
            clock = "measured"

            [graphics]
            present_mode = "FIFO_RELAXED"
            "#,
        )
        .unwrap();
        assert_eq!(config.simulation.particle_count, 512);
        assert_eq!(config.simulation.clock, ClockKind::Measured);
        assert_eq!(config.simulation.time_step, 0.001);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
        assert_eq!(config.window.width, 800);
        assert!(matches!(
            config.renderer_settings().clock,
            SimulationClock::Measured { .. }
        ));
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn unknown_clock_is_a_parse_error() {
        assert!(Config::parse("[simulation]\nclock = \"sundial\"").is_err());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.simulation.particle_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.time_step = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.time_step = f32::NAN;
        assert!(config.validate().is_err());

        // Not a multiple of the workgroup size: allowed, only warned about
        let mut config = Config::default();
        config.simulation.particle_count = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load_from_path("no/such/config.toml").unwrap();
        assert_eq!(config.shaders.compute, PathBuf::from("shaders/particle.comp.spv"));
    }
}
