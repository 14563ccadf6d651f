use crate::error::{Error, Result};
use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;

// Hyper-parameters and data location for a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    // Directory holding the four gzipped MNIST files.
    pub data_dir: PathBuf,
    pub hidden_dim: usize,
    pub epochs: usize,
    pub lr: f64,
    pub batch: usize,
    // Seed for the weight initialisation. Without one the weights come from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            data_dir: PathBuf::from("data"),
            hidden_dim: 500,
            epochs: 10,
            lr: 0.1,
            batch: 100,
            seed: None,
        }
    }
}

impl TrainConfig {
    // The defaults, overridden by any SIMPLE_ML_* environment variables that are set.
    pub fn from_env() -> anyhow::Result<TrainConfig> {
        TrainConfig::from_vars(|key| std::env::var(key).ok())
    }

    // Like `from_env`, reading variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<TrainConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = TrainConfig::default();

        if let Some(dir) = lookup("SIMPLE_ML_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(hidden_dim) = parse_var(&lookup, "SIMPLE_ML_HIDDEN_DIM")? {
            config.hidden_dim = hidden_dim;
        }
        if let Some(epochs) = parse_var(&lookup, "SIMPLE_ML_EPOCHS")? {
            config.epochs = epochs;
        }
        if let Some(lr) = parse_var(&lookup, "SIMPLE_ML_LR")? {
            config.lr = lr;
        }
        if let Some(batch) = parse_var(&lookup, "SIMPLE_ML_BATCH")? {
            config.batch = batch;
        }
        if let Some(seed) = parse_var(&lookup, "SIMPLE_ML_SEED")? {
            config.seed = Some(seed);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(Error::invalid("hidden_dim", self.hidden_dim));
        }
        if self.epochs == 0 {
            return Err(Error::invalid("epochs", self.epochs));
        }
        if self.batch == 0 {
            return Err(Error::invalid("batch", self.batch));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(Error::invalid("lr", self.lr));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("{key} is set to {raw:?}, which does not parse"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = TrainConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.lr, 0.1);
        assert_eq!(config.batch, 100);
    }

    #[test]
    fn no_variables_gives_the_defaults() {
        let config = TrainConfig::from_vars(lookup(&[])).unwrap();
        assert_eq!(config, TrainConfig::default());
    }

    #[test]
    fn variables_override_each_field() {
        let config = TrainConfig::from_vars(lookup(&[
            ("SIMPLE_ML_DATA_DIR", "/tmp/mnist"),
            ("SIMPLE_ML_HIDDEN_DIM", "100"),
            ("SIMPLE_ML_EPOCHS", "3"),
            ("SIMPLE_ML_LR", "0.2"),
            ("SIMPLE_ML_BATCH", " 50 "),
            ("SIMPLE_ML_SEED", "1234"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            TrainConfig {
                data_dir: PathBuf::from("/tmp/mnist"),
                hidden_dim: 100,
                epochs: 3,
                lr: 0.2,
                batch: 50,
                seed: Some(1234),
            }
        );
    }

    #[test]
    fn unparsable_values_name_the_variable() {
        let err = TrainConfig::from_vars(lookup(&[("SIMPLE_ML_BATCH", "ten")])).unwrap_err();
        assert!(err.to_string().contains("SIMPLE_ML_BATCH"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(TrainConfig::from_vars(lookup(&[("SIMPLE_ML_LR", "-0.1")])).is_err());
        assert!(TrainConfig::from_vars(lookup(&[("SIMPLE_ML_EPOCHS", "0")])).is_err());

        let config = TrainConfig {
            lr: f64::INFINITY,
            ..TrainConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::invalid("lr", f64::INFINITY)));
    }
}
