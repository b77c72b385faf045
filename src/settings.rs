use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

use crate::parser::cluster::{Dbscan, DEFAULT_EPS, DEFAULT_MIN_SAMPLES};
use crate::parser::PipelineOptions;

const ENV_PREFIX: &str = "DOCSTRUCT";

/// Runtime settings, read from `DOCSTRUCT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub workers: usize,
    pub eps: f64,
    pub min_samples: usize,
    pub extract_tables: bool,
    pub process_headings: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            db_path: None,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
            extract_tables: true,
            process_headings: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read settings from environment")?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: Config) -> Result<Self> {
        let settings: Settings = cfg.try_deserialize().context("invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            bail!("invalid settings: eps must be a positive number, got {}", self.eps);
        }
        if self.min_samples == 0 {
            bail!("invalid settings: min_samples must be at least 1");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jobs.sqlite"))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            extract_tables: self.extract_tables,
            process_headings: self.process_headings,
            dbscan: Dbscan::new(self.eps, self.min_samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_sources() {
        let s = Settings::from_config(Config::builder().build().unwrap()).unwrap();
        assert_eq!(s.data_dir, PathBuf::from("data"));
        assert_eq!(s.db_path(), PathBuf::from("data").join("jobs.sqlite"));
        assert_eq!(s.min_samples, DEFAULT_MIN_SAMPLES);
        assert!(s.workers >= 1);
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::builder()
            .set_override("workers", 3)
            .unwrap()
            .set_override("eps", 2.5)
            .unwrap()
            .set_override("db_path", "/tmp/jobs.db")
            .unwrap()
            .build()
            .unwrap();
        let s = Settings::from_config(cfg).unwrap();
        assert_eq!(s.workers, 3);
        assert_eq!(s.db_path(), PathBuf::from("/tmp/jobs.db"));
        assert_eq!(s.pipeline_options().dbscan.eps, 2.5);
    }

    #[test]
    fn headings_can_be_switched_off() {
        let cfg = Config::builder()
            .set_override("process_headings", false)
            .unwrap()
            .build()
            .unwrap();
        let s = Settings::from_config(cfg).unwrap();
        assert!(!s.pipeline_options().process_headings);
    }

    #[test]
    fn rejects_bad_clustering_parameters() {
        for eps in [-1.0, 0.0, f64::NAN] {
            let cfg = Config::builder().set_override("eps", eps).unwrap().build().unwrap();
            assert!(Settings::from_config(cfg).is_err(), "eps = {}", eps);
        }
        let cfg = Config::builder()
            .set_override("min_samples", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(Settings::from_config(cfg).is_err());
    }
}
