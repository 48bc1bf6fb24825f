//! Test data builders for creating test objects

use scopestream::config::AppConfig;
use scopestream::types::{Role, VoltageRange};
use std::path::Path;

/// Builder for backend configurations with small buffers and fast stats
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.acquisition.sample_quota = 1_000;
        config.acquisition.stats_interval_ms = 50;
        Self { config }
    }

    pub fn serials(mut self, serials: &[&str]) -> Self {
        self.config.devices.serials = serials.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn sample_quota(mut self, quota: u32) -> Self {
        self.config.acquisition.sample_quota = quota;
        self
    }

    pub fn range(mut self, range: VoltageRange) -> Self {
        self.config.devices.default_range = range;
        self
    }

    /// Roles for channels 0.. of the `device`-th opened unit
    pub fn roles(mut self, device: usize, roles: &[Role]) -> Self {
        let all = &mut self.config.devices.channel_roles;
        if all.len() <= device {
            all.resize(device + 1, Vec::new());
        }
        all[device] = roles.to_vec();
        self
    }

    pub fn formula(mut self, formula: &str) -> Self {
        self.config.expressions.formulas.push(formula.to_string());
        self
    }

    pub fn export_to(mut self, path: &Path) -> Self {
        self.config.export.enabled = true;
        self.config.export.path = path.to_path_buf();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .serials(&["A", "B"])
            .roles(1, &[Role::X])
            .formula("a*x0")
            .build();

        assert_eq!(config.devices.serials, vec!["A", "B"]);
        assert_eq!(config.devices.initial_role(1, 0), Role::X);
        assert_eq!(config.devices.initial_role(0, 0), Role::Off);
        assert_eq!(config.acquisition.sample_quota, 1_000);
    }
}
