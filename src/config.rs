//! Configuração do woexport carregada a partir de `woexport.toml`.
//!
//! A struct [`ExportConfig`] contém todos os parâmetros configuráveis e é
//! injetada explicitamente em cada componente. Valores não presentes no
//! arquivo usam defaults sensíveis. As variáveis de ambiente
//! `WOEXPORT_DATA_DIR`, `WOEXPORT_STORAGE_MODE` e `WOEXPORT_API_TOKEN` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ExportError;

/// Onde o arquivo final (zip) é persistido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Blob guardado no próprio job store, junto do registro.
    Inline,
    /// Arquivo anexado em `<data_dir>/attachments/<job>/export.zip`.
    Attachment,
}

impl std::str::FromStr for StorageMode {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "attachment" => Ok(Self::Attachment),
            other => Err(ExportError::Config(format!("unknown storage mode: {other}"))),
        }
    }
}

/// Tipo de fonte de dados das ordens de serviço.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Fixtures JSON em disco.
    #[default]
    Directory,
    /// API HTTP de registros.
    Http,
}

/// Seção `[source]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Diretório das fixtures; padrão `<data_dir>/workorders`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// URL base da API, obrigatória quando `kind = "http"`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Token bearer da API.
    #[serde(default)]
    pub api_token: String,
}

/// Configuração de nível superior carregada de `woexport.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Raiz para registros de jobs, artefatos e anexos.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_storage_mode")]
    pub storage_mode: StorageMode,

    /// Ordens de serviço mescladas por passo do merge worker.
    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,

    /// Limite rígido de ids por job.
    #[serde(default = "default_max_source_ids")]
    pub max_source_ids: usize,

    /// Limite de caracteres de `error_message`.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,

    /// Validade do lease por job, em segundos.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Idade do heartbeat a partir da qual o nudger rearma um job parado.
    #[serde(default = "default_stall_after_secs")]
    pub stall_after_secs: u64,

    /// Profundidade máxima de uma cadeia de notificações.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,

    #[serde(default)]
    pub source: SourceConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".woexport")
}

fn default_storage_mode() -> StorageMode {
    StorageMode::Attachment
}

fn default_merge_batch_size() -> usize {
    5
}

fn default_max_source_ids() -> usize {
    50
}

fn default_error_message_limit() -> usize {
    4000
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_stall_after_secs() -> u64 {
    300
}

fn default_max_chain_depth() -> u32 {
    64
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage_mode: default_storage_mode(),
            merge_batch_size: default_merge_batch_size(),
            max_source_ids: default_max_source_ids(),
            error_message_limit: default_error_message_limit(),
            lease_ttl_secs: default_lease_ttl_secs(),
            stall_after_secs: default_stall_after_secs(),
            max_chain_depth: default_max_chain_depth(),
            source: SourceConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Carrega a configuração de `path`, ou de `woexport.toml` no diretório
    /// atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, ExportError> {
        let path = path.unwrap_or_else(|| Path::new("woexport.toml"));
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_toml(contents: &str) -> Result<Self, ExportError> {
        let config: ExportConfig = toml::from_str(contents)?;
        config.validate()
    }

    /// Aplica as variáveis de ambiente lidas por `lookup`.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ExportError> {
        if let Some(dir) = lookup("WOEXPORT_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("WOEXPORT_STORAGE_MODE").filter(|v| !v.is_empty()) {
            self.storage_mode = mode.parse()?;
        }
        if let Some(token) = lookup("WOEXPORT_API_TOKEN").filter(|v| !v.is_empty()) {
            self.source.api_token = token;
        }
        Ok(self)
    }

    fn validate(self) -> Result<Self, ExportError> {
        if self.merge_batch_size == 0 {
            return Err(ExportError::Config("merge_batch_size must be at least 1".into()));
        }
        if self.max_source_ids == 0 {
            return Err(ExportError::Config("max_source_ids must be at least 1".into()));
        }
        if self.error_message_limit < crate::error::TRUNCATION_MARKER.len() {
            return Err(ExportError::Config(
                "error_message_limit is shorter than the truncation marker".into(),
            ));
        }
        Ok(self)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }
}
