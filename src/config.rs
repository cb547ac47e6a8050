use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DEFAULT_HIGH_RATE: f64 = 30.0;
const DEFAULT_LOW_RATE: f64 = 15.0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_NODE_NAME: &str = "camera";
const DEFAULT_NAMESPACE: &str = "";
const DEFAULT_DEVICE: &str = "stub://camera";
const DEFAULT_CALIBRATION_DIR: &str = "/data/config/calibrations/camera_intrinsic";

pub const PARAM_HIGH_RATE: &str = "high_rate";
pub const PARAM_LOW_RATE: &str = "low_rate";
pub const PARAM_WIDTH: &str = "resolution_width";
pub const PARAM_HEIGHT: &str = "resolution_height";
pub const PARAM_NODE_NAME: &str = "node_name";
pub const PARAM_NAMESPACE: &str = "namespace";
pub const PARAM_DEVICE: &str = "device";
pub const PARAM_CALIBRATION_DIR: &str = "calibration_dir";

/// Environment overrides, applied on top of the config file.
const ENV_OVERRIDES: &[(&str, &str, EnvKind)] = &[
    ("CAMERA_NODE_HIGH_RATE", PARAM_HIGH_RATE, EnvKind::Float),
    ("CAMERA_NODE_LOW_RATE", PARAM_LOW_RATE, EnvKind::Float),
    ("CAMERA_NODE_WIDTH", PARAM_WIDTH, EnvKind::Integer),
    ("CAMERA_NODE_HEIGHT", PARAM_HEIGHT, EnvKind::Integer),
    ("CAMERA_NODE_NAME", PARAM_NODE_NAME, EnvKind::Text),
    ("CAMERA_NODE_NAMESPACE", PARAM_NAMESPACE, EnvKind::Text),
    ("CAMERA_NODE_DEVICE", PARAM_DEVICE, EnvKind::Text),
    ("CAMERA_NODE_CALIBRATION_DIR", PARAM_CALIBRATION_DIR, EnvKind::Text),
];

#[derive(Clone, Copy)]
enum EnvKind {
    Float,
    Integer,
    Text,
}

/// Key/value parameter store.
///
/// Every parameter the node reads is written back with its resolved value, so
/// the store always shows the effective configuration.
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    values: Map<String, Value>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file (explicit path, else `CAMERA_NODE_CONFIG`) and env overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("CAMERA_NODE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let mut store = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::new(),
        };
        store.apply_env()?;
        Ok(store)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let values: Map<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("parameter {} is not representable", name))?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read `name` (or `default` when unset), echo the value back, and log it.
    pub fn setup_param<T>(&mut self, node_name: &str, name: &str, default: T) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Display,
    {
        let value = match self.values.get(name) {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| anyhow!("parameter {} has the wrong type: {}", name, e))?,
            None => default,
        };
        self.set(name, &value)?;
        log::info!("[{}] {} = {}", node_name, name, value);
        Ok(value)
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }

    fn apply_env(&mut self) -> Result<()> {
        for (var, param, kind) in ENV_OVERRIDES {
            let Ok(raw) = std::env::var(var) else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            let value = match kind {
                EnvKind::Float => {
                    let parsed: f64 = raw
                        .trim()
                        .parse()
                        .map_err(|_| anyhow!("{} must be a number", var))?;
                    Value::from(parsed)
                }
                EnvKind::Integer => {
                    let parsed: u32 = raw
                        .trim()
                        .parse()
                        .map_err(|_| anyhow!("{} must be a positive integer", var))?;
                    Value::from(parsed)
                }
                EnvKind::Text => Value::from(raw),
            };
            self.values.insert(param.to_string(), value);
        }
        Ok(())
    }
}

/// Capture parameters, fixed after startup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraConfig {
    pub high_rate: f64,
    pub low_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            high_rate: DEFAULT_HIGH_RATE,
            low_rate: DEFAULT_LOW_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [(PARAM_HIGH_RATE, self.high_rate), (PARAM_LOW_RATE, self.low_rate)] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(anyhow!("{} must be a positive number of fps", name));
            }
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("resolution must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_name: String,
    pub namespace: String,
    pub device: String,
    pub calibration_dir: PathBuf,
    pub camera: CameraConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: DEFAULT_NODE_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            calibration_dir: PathBuf::from(DEFAULT_CALIBRATION_DIR),
            camera: CameraConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Convenience for `ParamStore::load` followed by `from_params`.
    pub fn load(config_path: Option<&Path>) -> Result<(Self, ParamStore)> {
        let mut params = ParamStore::load(config_path)?;
        let cfg = Self::from_params(&mut params)?;
        Ok((cfg, params))
    }

    /// Resolve every node parameter from `params`, echoing each one back.
    pub fn from_params(params: &mut ParamStore) -> Result<Self> {
        let node_name: String =
            params.setup_param(DEFAULT_NODE_NAME, PARAM_NODE_NAME, DEFAULT_NODE_NAME.to_string())?;
        let node = node_name.as_str();
        let namespace: String =
            params.setup_param(node, PARAM_NAMESPACE, DEFAULT_NAMESPACE.to_string())?;
        let device: String = params.setup_param(node, PARAM_DEVICE, DEFAULT_DEVICE.to_string())?;
        let calibration_dir: String = params.setup_param(
            node,
            PARAM_CALIBRATION_DIR,
            DEFAULT_CALIBRATION_DIR.to_string(),
        )?;
        let camera = CameraConfig {
            high_rate: params.setup_param(node, PARAM_HIGH_RATE, DEFAULT_HIGH_RATE)?,
            low_rate: params.setup_param(node, PARAM_LOW_RATE, DEFAULT_LOW_RATE)?,
            width: params.setup_param(node, PARAM_WIDTH, DEFAULT_WIDTH)?,
            height: params.setup_param(node, PARAM_HEIGHT, DEFAULT_HEIGHT)?,
        };

        let cfg = Self {
            node_name,
            namespace,
            device,
            calibration_dir: PathBuf::from(calibration_dir),
            camera,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(PARAM_NODE_NAME, &self.node_name)?;
        validate_name(PARAM_NAMESPACE, &self.namespace)?;
        if self.device.trim().is_empty() {
            return Err(anyhow!("device must not be empty"));
        }
        self.camera.validate()
    }
}

/// Names end up in file paths and topic names: letters, digits, `_` and `/` only.
pub fn validate_name(what: &str, value: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_/]{0,128}$").expect("valid name regex"));
    if !re.is_match(value) {
        return Err(anyhow!(
            "{} '{}' may only contain letters, digits, '_' and '/'",
            what,
            value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_echoed_into_the_store() -> Result<()> {
        let mut params = ParamStore::new();
        let cfg = NodeConfig::from_params(&mut params)?;

        assert_eq!(cfg.camera, CameraConfig::default());
        assert_eq!(params.get(PARAM_HIGH_RATE), Some(&Value::from(30.0)));
        assert_eq!(params.get(PARAM_LOW_RATE), Some(&Value::from(15.0)));
        assert_eq!(params.get(PARAM_WIDTH), Some(&Value::from(640u32)));
        assert_eq!(params.get(PARAM_HEIGHT), Some(&Value::from(480u32)));
        assert_eq!(params.get(PARAM_DEVICE), Some(&Value::from("stub://camera")));
        Ok(())
    }

    #[test]
    fn stored_values_win_over_defaults() -> Result<()> {
        let mut params = ParamStore::new();
        params.set(PARAM_LOW_RATE, 5.0)?;
        params.set(PARAM_WIDTH, 320)?;
        let cfg = NodeConfig::from_params(&mut params)?;
        assert_eq!(cfg.camera.low_rate, 5.0);
        assert_eq!(cfg.camera.width, 320);
        Ok(())
    }

    #[test]
    fn wrong_parameter_type_is_rejected() -> Result<()> {
        let mut params = ParamStore::new();
        params.set(PARAM_HIGH_RATE, "fast")?;
        assert!(NodeConfig::from_params(&mut params).is_err());
        Ok(())
    }

    #[test]
    fn non_positive_rates_are_rejected() -> Result<()> {
        let mut params = ParamStore::new();
        params.set(PARAM_LOW_RATE, 0.0)?;
        assert!(NodeConfig::from_params(&mut params).is_err());
        Ok(())
    }

    #[test]
    fn namespace_must_be_path_safe() {
        assert!(validate_name("namespace", "/duckiebot_01/").is_ok());
        assert!(validate_name("namespace", "").is_ok());
        assert!(validate_name("namespace", "../etc").is_err());
        assert!(validate_name("namespace", "a b").is_err());
    }
}
