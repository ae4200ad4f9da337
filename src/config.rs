use anyhow::Context;
use gbx_rs::{Codec, Lzo, Settings, Zlib};
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Files or folders to round-trip. Folders are walked recursively.
    pub input: Vec<PathBuf>,
    /// Where re-serialized files are stored, if anywhere.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub codec: Codecs,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            filter: String::from("info"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecName {
    Lzo,
    Zlib,
    None,
}

impl CodecName {
    fn codec(self) -> Option<Arc<dyn Codec>> {
        match self {
            CodecName::Lzo => Some(Arc::new(Lzo)),
            CodecName::Zlib => Some(Arc::new(Zlib)),
            CodecName::None => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Codecs {
    pub body: CodecName,
    pub section: CodecName,
}

impl Default for Codecs {
    fn default() -> Self {
        Codecs {
            body: CodecName::Lzo,
            section: CodecName::Zlib,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Limits {
    pub max_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_length: Settings::default().max_length,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading config {path}"))?;
        let config = toml::from_str::<Config>(&content).context("Invalid TOML")?;

        anyhow::ensure!(!config.input.is_empty(), "Config names no inputs");
        if let Some(output) = &config.output {
            anyhow::ensure!(
                !output.is_file(),
                "Output {} must be a folder",
                output.display()
            );
        }

        Ok(config)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            body_codec: self.codec.body.codec(),
            section_codec: self.codec.section.codec(),
            cancel: None,
            max_length: self.limits.max_length,
        }
    }
}
