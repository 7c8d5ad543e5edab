use lcdbus_gpio::bus::LineWidth;
use serde::{Deserialize, Serialize};
use std::env::{var, var_os};
use std::ffi::OsStr;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid line number {0:?}")]
    InvalidLine(String),
    #[error("expected 4 or 8 data lines, got {0}")]
    InvalidDataLineCount(usize),
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

/// Lines the display is wired to.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    #[serde(default = "default_chip")]
    pub chip: String,
    pub pin_e: usize,
    pub pin_rs: usize,
    pub pin_rw: usize,
    /// D0 (or D4 on a 4-line bus) first.
    pub pins_data: Vec<usize>,
    /// Enables pull-ups on the data lines while reading.
    #[serde(default)]
    pub data_pull_up: bool,
}

impl Config {
    /// Loads the config from `LCDBUS_CONFIG_FILE` (or `lcdbus.json`), falling back to the
    /// `LCDBUS_*` environment variables when there is no such file.
    pub fn load() -> eyre::Result<Self> {
        let config_str = var_os("LCDBUS_CONFIG_FILE");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new("lcdbus.json"));
        let config_path = Path::new(config_str);
        if config_path.exists() {
            Self::from_file(config_path)
        } else {
            Ok(Self::from_env()?)
        }
    }

    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)?;
        config.line_width()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| var(key).ok())
    }

    fn from_vars(get: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let config = Config {
            chip: get("LCDBUS_GPIO_CHIP").unwrap_or_else(default_chip),
            pin_e: parse_line(&required("LCDBUS_PIN_E")?)?,
            pin_rs: parse_line(&required("LCDBUS_PIN_RS")?)?,
            pin_rw: parse_line(&required("LCDBUS_PIN_RW")?)?,
            pins_data: parse_line_list(&required("LCDBUS_PINS_DATA")?)?,
            data_pull_up: get("LCDBUS_DATA_PULL_UP").is_some_and(|v| v == "1" || v == "true"),
        };
        config.line_width()?;
        Ok(config)
    }

    pub fn line_width(&self) -> Result<LineWidth, ConfigError> {
        LineWidth::from_line_count(self.pins_data.len())
            .ok_or(ConfigError::InvalidDataLineCount(self.pins_data.len()))
    }
}

fn parse_line(s: &str) -> Result<usize, ConfigError> {
    s.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidLine(s.to_string()))
}

fn parse_line_list(s: &str) -> Result<Vec<usize>, ConfigError> {
    s.split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(parse_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|&(k, v)| (k, v.to_string())).collect();
        move |key: &'static str| map.get(key).cloned()
    }

    #[test]
    fn line_lists_accept_mixed_separators() {
        assert_eq!(parse_line_list("26, 16;20 21").unwrap(), [26, 16, 20, 21]);
        assert_eq!(
            parse_line_list("1,x").unwrap_err(),
            ConfigError::InvalidLine("x".to_string())
        );
    }

    #[test]
    fn config_from_env() {
        let config = Config::from_vars(vars(&[
            ("LCDBUS_PIN_E", "17"),
            ("LCDBUS_PIN_RS", "22"),
            ("LCDBUS_PIN_RW", "27"),
            ("LCDBUS_PINS_DATA", "26,16,20,21"),
        ]))
        .unwrap();
        assert_eq!(config.chip, "/dev/gpiochip0");
        assert_eq!(config.pin_e, 17);
        assert_eq!(config.line_width().unwrap(), LineWidth::Four);
        assert!(!config.data_pull_up);
    }

    #[test]
    fn missing_and_invalid_env() {
        assert_eq!(
            Config::from_vars(vars(&[("LCDBUS_PIN_E", "17")])).unwrap_err(),
            ConfigError::Missing("LCDBUS_PIN_RS")
        );
        assert_eq!(
            Config::from_vars(vars(&[
                ("LCDBUS_PIN_E", "17"),
                ("LCDBUS_PIN_RS", "22"),
                ("LCDBUS_PIN_RW", "27"),
                ("LCDBUS_PINS_DATA", "1,2,3,4,5"),
            ]))
            .unwrap_err(),
            ConfigError::InvalidDataLineCount(5)
        );
    }

    #[test]
    fn config_from_json() {
        let config: Config = serde_json::from_str(
            r#"{"pin_e": 1, "pin_rs": 2, "pin_rw": 3, "pins_data": [4, 5, 6, 7, 8, 9, 10, 11], "data_pull_up": true}"#,
        )
        .unwrap();
        assert_eq!(config.line_width().unwrap(), LineWidth::Eight);
        assert_eq!(config.chip, "/dev/gpiochip0");
        assert!(config.data_pull_up);
    }
}
