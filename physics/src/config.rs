//! World tuning parameters.
//!
//! Every value that used to be a free-floating global of the simulation (gravity,
//! deactivation thresholds, solver settings) lives in [`WorldConfig`]. A config is handed to
//! [`crate::PhysicsWorld::new`] and afterwards only changes through the world's setters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, Result};
use crate::settings;

/// Solver flavor. Kept for configuration compatibility; both map onto the same native
/// solver, `Nncg` only raises the stabilization iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Sequential,
    Nncg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World gravity (m/s^2). +Z is up.
    pub gravity: [f32; 3],
    /// Fixed sub-steps per nominal step.
    pub num_sub_steps: u32,
    /// Upper bound on sub-steps run in one `proceed_delta_time` call.
    pub max_sub_steps: u32,
    /// Velocity solver iterations.
    pub num_iterations: u32,
    pub solver: SolverKind,
    /// Seconds a body must stay under the thresholds before it sleeps.
    pub deactivation_time: f32,
    pub linear_deactivation_threshold: f32,
    pub angular_deactivation_threshold: f32,
    /// Distance beyond which persistent contacts are dropped (m).
    pub contact_breaking_threshold: f32,
    /// Error reduction for joints.
    pub erp_non_contact: f32,
    /// Error reduction for contacts.
    pub erp_contact: f32,
    /// Constraint force mixing (softness) for joints.
    pub cfm: f32,
    /// Solver worker threads. 0 = one per hardware thread. Only used with the `parallel` feature.
    pub solver_workers: usize,
    /// Length of the downward FH-spring probe ray (m).
    pub fh_ray_length: f32,
    /// Logic tic rate, scales FH-spring impulses.
    pub tic_rate: f32,
    pub occlusion: OcclusionConfig,
}

/// Defaults for visibility queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Occlusion buffer resolution along the larger viewport side. 0 disables occlusion.
    pub resolution: u32,
    /// Triangles with a smaller projected area (in buffer pixels) are skipped.
    pub min_area: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, 0.0, -settings::GRAVITY_MPS2],
            num_sub_steps: 1,
            max_sub_steps: settings::MAX_SUB_STEPS,
            num_iterations: 10,
            solver: SolverKind::Sequential,
            deactivation_time: 2.0,
            linear_deactivation_threshold: 0.8,
            angular_deactivation_threshold: 1.0,
            contact_breaking_threshold: 0.02,
            erp_non_contact: 0.2,
            erp_contact: 0.2,
            cfm: 0.0,
            solver_workers: 0,
            fh_ray_length: settings::FH_RAY_LENGTH,
            tic_rate: settings::DEFAULT_TIC_RATE,
            occlusion: OcclusionConfig::default(),
        }
    }
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            resolution: 0,
            min_area: 0.0,
        }
    }
}

impl WorldConfig {
    /// Parse a config from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: WorldConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(PhysicsError::InvalidConfig("gravity must be finite".into()));
        }
        if self.num_sub_steps == 0 {
            return Err(PhysicsError::InvalidConfig(
                "num_sub_steps must be at least 1".into(),
            ));
        }
        if self.max_sub_steps < self.num_sub_steps {
            return Err(PhysicsError::InvalidConfig(format!(
                "max_sub_steps ({}) is below num_sub_steps ({})",
                self.max_sub_steps, self.num_sub_steps
            )));
        }
        if self.num_iterations == 0 {
            return Err(PhysicsError::InvalidConfig(
                "num_iterations must be at least 1".into(),
            ));
        }
        if self.deactivation_time < 0.0 || self.contact_breaking_threshold < 0.0 {
            return Err(PhysicsError::InvalidConfig(
                "deactivation time and contact breaking threshold must be non-negative".into(),
            ));
        }
        if self.fh_ray_length <= 0.0 || self.tic_rate <= 0.0 {
            return Err(PhysicsError::InvalidConfig(
                "fh_ray_length and tic_rate must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = WorldConfig::default();
        assert_eq!(config.gravity, [0.0, 0.0, -9.81]);
        assert_eq!(config.num_sub_steps, 1);
        assert_eq!(config.num_iterations, 10);
        assert_eq!(config.deactivation_time, 2.0);
        assert_eq!(config.linear_deactivation_threshold, 0.8);
        assert_eq!(config.angular_deactivation_threshold, 1.0);
        assert_eq!(config.contact_breaking_threshold, 0.02);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config = WorldConfig::from_toml_str(
            r#"
            num_sub_steps = 4
            solver = "nncg"

            [occlusion]
            resolution = 256
            "#,
        )
        .unwrap();

        assert_eq!(config.num_sub_steps, 4);
        assert_eq!(config.solver, SolverKind::Nncg);
        assert_eq!(config.occlusion.resolution, 256);
        assert_eq!(config.num_iterations, 10);
    }

    #[test]
    fn zero_sub_steps_is_rejected() {
        let err = WorldConfig::from_toml_str("num_sub_steps = 0").unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = WorldConfig::from_toml_str("num_sub_steps = \"many\"").unwrap_err();
        assert!(matches!(err, PhysicsError::ConfigParse(_)));
    }

    #[test]
    fn config_serializes_back_to_toml() {
        let config = WorldConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(WorldConfig::from_toml_str(&text).unwrap(), config);
    }
}
