//! Agent configuration: TOML file shape, `${VAR}` expansion, validation.
//!
//! Mirrors the original python loader's two-stage design: deep-merge
//! fragments into one table, then expand `${VAR}` placeholders against the
//! process environment (after `.env` has been loaded), collecting every
//! unresolved reference instead of failing on the first one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::AgentError;

fn default_voice() -> String {
    "Cherry".into()
}

fn default_turn_threshold() -> f32 {
    0.5
}

fn default_silence_duration_ms() -> u32 {
    500
}

fn default_input_sample_rate_hz() -> u32 {
    16000
}

fn default_output_sample_rate_hz() -> u32 {
    24000
}

fn default_channels() -> u16 {
    1
}

fn default_session_max_age_s() -> u64 {
    28 * 60
}

fn default_chunk_ms() -> u32 {
    100
}

fn default_queue_max_chunks() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TurnDetectionConfig {
    #[serde(default = "default_turn_threshold_bits")]
    pub threshold: OrderedF32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

fn default_turn_threshold_bits() -> OrderedF32 {
    OrderedF32(default_turn_threshold())
}

/// f32 wrapper with `PartialEq`/`Eq` so the config struct can derive them;
/// only used for config comparisons in tests, never for numeric ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedF32(pub f32);

impl PartialEq for OrderedF32 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedF32 {}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: OrderedF32(default_turn_threshold()),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,
    #[serde(default = "default_input_sample_rate_hz")]
    pub input_sample_rate_hz: u32,
    #[serde(default = "default_output_sample_rate_hz")]
    pub output_sample_rate_hz: u32,
    #[serde(default = "default_channels")]
    pub input_channels: u16,
    #[serde(default = "default_channels")]
    pub output_channels: u16,
    #[serde(default = "default_session_max_age_s")]
    pub session_max_age_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QwenConfig {
    pub api_key: String,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum InputSource {
    #[default]
    #[serde(rename = "microphone")]
    Microphone,
    #[serde(rename = "process_loopback")]
    ProcessLoopback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioInputConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default)]
    pub source: InputSource,
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u32,
    #[serde(default = "default_queue_max_chunks")]
    pub queue_max_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoopbackConfig {
    pub pid: Option<u32>,
    pub process_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioOutputConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VadConfig {
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    pub input: AudioInputConfig,
    #[serde(default)]
    pub loopback: LoopbackConfig,
    pub output: AudioOutputConfig,
    #[serde(default)]
    pub vad: VadConfig,
}

/// Root configuration, loaded from one or more TOML fragments with
/// `${VAR}` placeholders expanded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub qwen: QwenConfig,
    pub audio: AudioConfig,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.qwen.api_key.trim().is_empty() {
            return Err(AgentError::Configuration("qwen.api_key is empty".into()));
        }
        if self.qwen.realtime.url.trim().is_empty() {
            return Err(AgentError::Configuration("qwen.realtime.url is empty".into()));
        }
        if !matches!(self.audio.input.channels, 1 | 2) {
            return Err(AgentError::Configuration(format!(
                "audio.input.channels must be 1 or 2, got {}",
                self.audio.input.channels
            )));
        }
        if !matches!(self.audio.output.channels, 1 | 2) {
            return Err(AgentError::Configuration(format!(
                "audio.output.channels must be 1 or 2, got {}",
                self.audio.output.channels
            )));
        }
        if self.audio.input.source == InputSource::ProcessLoopback
            && self.audio.loopback.pid.is_none()
            && self.audio.loopback.process_name.is_none()
        {
            return Err(AgentError::Configuration(
                "audio.input.source = process_loopback requires audio.loopback.pid or audio.loopback.process_name"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Effective VAD silence threshold: `audio.vad.silence_duration_ms` overrides
    /// the realtime session default when set.
    pub fn effective_silence_duration_ms(&self) -> u32 {
        self.audio
            .vad
            .silence_duration_ms
            .unwrap_or(self.qwen.realtime.turn_detection.silence_duration_ms)
    }
}

/// One unresolved `${VAR}` reference, collected rather than raised
/// immediately so a single error message can list every missing variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEnvRef {
    pub var_name: String,
    pub key_path: String,
}

/// Deep-merge `overlay` into `base`, recursing into nested tables and
/// letting scalar/array values in `overlay` replace those in `base`.
pub fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Expand every `${VAR}` placeholder found in string values, recursing into
/// tables and arrays. Missing or empty environment variables are recorded
/// in `unresolved` rather than aborting expansion early.
pub fn expand_env_in_value(
    value: &mut toml::Value,
    key_path: &str,
    env: &BTreeMap<String, String>,
    unresolved: &mut Vec<UnresolvedEnvRef>,
) {
    match value {
        toml::Value::String(s) => {
            *s = expand_env_in_string(s, key_path, env, unresolved);
        }
        toml::Value::Table(table) => {
            for (key, v) in table.iter_mut() {
                let child_path = if key_path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", key_path, key)
                };
                expand_env_in_value(v, &child_path, env, unresolved);
            }
        }
        toml::Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                let child_path = format!("{}[{}]", key_path, i);
                expand_env_in_value(v, &child_path, env, unresolved);
            }
        }
        _ => {}
    }
}

fn expand_env_in_string(
    s: &str,
    key_path: &str,
    env: &BTreeMap<String, String>,
    unresolved: &mut Vec<UnresolvedEnvRef>,
) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '$' && s[i..].starts_with("${") {
            if let Some(end) = s[i + 2..].find('}') {
                let var_name = &s[i + 2..i + 2 + end];
                let is_valid_ident = !var_name.is_empty()
                    && var_name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && var_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

                if is_valid_ident {
                    match env.get(var_name).filter(|v| !v.is_empty()) {
                        Some(value) => out.push_str(value),
                        None => unresolved.push(UnresolvedEnvRef {
                            var_name: var_name.to_string(),
                            key_path: key_path.to_string(),
                        }),
                    }
                    for _ in 0..(2 + end + 1) {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}

/// Parse, merge, and env-expand one or more TOML fragments into an
/// [`AgentConfig`]. Fragments are merged in order, later ones winning.
pub fn load_config(
    fragments: &[&str],
    env: &BTreeMap<String, String>,
) -> Result<AgentConfig, AgentError> {
    let mut merged = toml::Value::Table(Default::default());
    for fragment in fragments {
        let parsed: toml::Value = toml::from_str(fragment)
            .map_err(|e| AgentError::Configuration(format!("invalid TOML: {}", e)))?;
        deep_merge(&mut merged, parsed);
    }

    let mut unresolved = Vec::new();
    expand_env_in_value(&mut merged, "", env, &mut unresolved);

    if !unresolved.is_empty() {
        let refs: Vec<String> = unresolved
            .iter()
            .map(|r| format!("{} (at {})", r.var_name, r.key_path))
            .collect();
        return Err(AgentError::Configuration(format!(
            "unresolved environment variables: {}",
            refs.join(", ")
        )));
    }

    merged
        .try_into()
        .map_err(|e| AgentError::Configuration(format!("config shape mismatch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> &'static str {
        r#"
            [qwen]
            api_key = "${QWEN_API_KEY}"

            [qwen.realtime]
            url = "wss://example.invalid/realtime"
            model = "qwen3-omni-flash-realtime"

            [audio.input]
            sample_rate = 48000
            channels = 1

            [audio.output]
            sample_rate = 48000
            channels = 1
        "#
    }

    #[test]
    fn test_load_config_expands_env_var() {
        let mut env = BTreeMap::new();
        env.insert("QWEN_API_KEY".to_string(), "sk-test".to_string());

        let cfg = load_config(&[base_toml()], &env).unwrap();
        assert_eq!(cfg.qwen.api_key, "sk-test");
        assert_eq!(cfg.qwen.realtime.voice, "Cherry");
        assert_eq!(cfg.audio.input.source, InputSource::Microphone);
    }

    #[test]
    fn test_load_config_reports_unresolved_vars() {
        let env = BTreeMap::new();
        let result = load_config(&[base_toml()], &env);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("QWEN_API_KEY"));
    }

    #[test]
    fn test_deep_merge_overlay_wins() {
        let mut env = BTreeMap::new();
        env.insert("QWEN_API_KEY".to_string(), "sk-test".to_string());

        let overlay = r#"
            [qwen.realtime]
            url = "wss://example.invalid/realtime"
            model = "qwen3-omni-flash-realtime"
            voice = "Serena"

            [audio.input]
            sample_rate = 48000
            channels = 1

            [audio.output]
            sample_rate = 48000
            channels = 1
        "#;

        let cfg = load_config(&[base_toml(), overlay], &env).unwrap();
        assert_eq!(cfg.qwen.realtime.voice, "Serena");
    }

    #[test]
    fn test_validate_rejects_missing_api_key() {
        let mut env = BTreeMap::new();
        env.insert("QWEN_API_KEY".to_string(), "".to_string());
        // empty string is "unresolved" per the env-expansion rule, so build
        // the config directly here to exercise validate() in isolation.
        let cfg = AgentConfig {
            qwen: QwenConfig {
                api_key: "".into(),
                realtime: RealtimeConfig {
                    url: "wss://example.invalid".into(),
                    model: "m".into(),
                    voice: default_voice(),
                    instructions: String::new(),
                    turn_detection: TurnDetectionConfig::default(),
                    input_sample_rate_hz: default_input_sample_rate_hz(),
                    output_sample_rate_hz: default_output_sample_rate_hz(),
                    input_channels: 1,
                    output_channels: 1,
                    session_max_age_s: default_session_max_age_s(),
                },
            },
            audio: AudioConfig {
                input: AudioInputConfig {
                    device: None,
                    sample_rate: 48000,
                    channels: 1,
                    source: InputSource::Microphone,
                    chunk_ms: default_chunk_ms(),
                    queue_max_chunks: default_queue_max_chunks(),
                },
                loopback: LoopbackConfig::default(),
                output: AudioOutputConfig {
                    device: None,
                    sample_rate: 48000,
                    channels: 1,
                },
                vad: VadConfig::default(),
            },
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_loopback_target_when_selected() {
        let cfg_toml = r#"
            [qwen]
            api_key = "${QWEN_API_KEY}"

            [qwen.realtime]
            url = "wss://example.invalid/realtime"
            model = "qwen3-omni-flash-realtime"

            [audio.input]
            sample_rate = 48000
            channels = 1
            source = "process_loopback"

            [audio.output]
            sample_rate = 48000
            channels = 1
        "#;
        let mut env = BTreeMap::new();
        env.insert("QWEN_API_KEY".to_string(), "sk-test".to_string());
        let cfg = load_config(&[cfg_toml], &env).unwrap();
        assert!(cfg.validate().is_err());
    }
}
