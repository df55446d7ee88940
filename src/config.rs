//! Configuração do synthjob carregada a partir de `synthjob.toml`.
//!
//! A struct [`SynthConfig`] reúne as rotas dos fornecedores, os padrões de
//! síntese e a política de polling. Chaves ausentes no arquivo usam defaults.
//! As variáveis de ambiente `HEYGEN_API_KEY`, `AZURE_AVATAR_URL` e
//! `AZURE_AVATAR_KEY` têm precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::state_machine::{Dimension, PollPolicy};
use crate::transport::{ApiKey, CreateMethod, Route};
use crate::vendor::{AzureAvatar, AzureDefaults, HeyGen, HeyGenDefaults, VendorKind, VendorParts};

/// Cabeçalho de credencial usado pelos dois fornecedores.
const KEY_HEADER: &str = "X-Api-Key";

/// Configuração de nível superior carregada de `synthjob.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthConfig {
    /// Fornecedor usado quando a CLI não especifica `--vendor`.
    #[serde(default)]
    pub vendor: VendorKind,

    #[serde(default)]
    pub heygen: HeyGenSection,

    #[serde(default)]
    pub azure: AzureSection,

    #[serde(default)]
    pub polling: PollingSection,
}

/// Seção `[heygen]`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeyGenSection {
    #[serde(default = "default_heygen_base_url")]
    pub base_url: String,

    /// Chave da API HeyGen.
    #[serde(default)]
    pub api_key: Option<ApiKey>,

    #[serde(default = "default_avatar_id")]
    pub avatar_id: String,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_avatar_style")]
    pub avatar_style: String,

    #[serde(default = "default_speed")]
    pub speed: f64,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,
}

/// Seção `[azure]`: o proxy HTTP na frente do Azure Speech.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureSection {
    /// URL base do proxy. Sem ela o fornecedor Azure não pode ser usado.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<ApiKey>,

    #[serde(default = "default_azure_voice")]
    pub voice: String,

    #[serde(default = "default_azure_character")]
    pub character: String,

    #[serde(default = "default_azure_style")]
    pub style: String,
}

/// Seção `[polling]`. Tempos em milissegundos, exceto o prazo total.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Intervalo entre polls. Se ausente, usa o padrão do fornecedor.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

fn default_heygen_base_url() -> String {
    crate::vendor::heygen::DEFAULT_BASE_URL.to_string()
}

fn default_avatar_id() -> String {
    HeyGenDefaults::default().avatar_id
}

fn default_voice_id() -> String {
    HeyGenDefaults::default().voice_id
}

fn default_avatar_style() -> String {
    HeyGenDefaults::default().avatar_style
}

fn default_speed() -> f64 {
    HeyGenDefaults::default().speed
}

fn default_width() -> u32 {
    HeyGenDefaults::default().dimension.width
}

fn default_height() -> u32 {
    HeyGenDefaults::default().dimension.height
}

fn default_azure_voice() -> String {
    AzureDefaults::default().voice
}

fn default_azure_character() -> String {
    AzureDefaults::default().character
}

fn default_azure_style() -> String {
    AzureDefaults::default().style
}

// 2s antes do primeiro poll.
fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_failed_attempts() -> u32 {
    5
}

// 10 minutos.
fn default_max_duration_secs() -> u64 {
    600
}

impl Default for HeyGenSection {
    fn default() -> Self {
        Self {
            base_url: default_heygen_base_url(),
            api_key: None,
            avatar_id: default_avatar_id(),
            voice_id: default_voice_id(),
            avatar_style: default_avatar_style(),
            speed: default_speed(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for AzureSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            voice: default_azure_voice(),
            character: default_azure_character(),
            style: default_azure_style(),
        }
    }
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            poll_interval_ms: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_failed_attempts: default_max_failed_attempts(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl SynthConfig {
    /// Carrega a configuração de `path` e aplica as variáveis de ambiente.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SynthConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo. Valores vazios
    /// são ignorados.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());
        if let Some(key) = var("HEYGEN_API_KEY") {
            self.heygen.api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = var("AZURE_AVATAR_URL") {
            self.azure.base_url = Some(url);
        }
        if let Some(key) = var("AZURE_AVATAR_KEY") {
            self.azure.api_key = Some(ApiKey::new(key));
        }
    }

    /// Rota HTTP do fornecedor.
    pub fn route(&self, vendor: VendorKind) -> Result<Route, ConfigError> {
        let route = match vendor {
            VendorKind::HeyGen => {
                let base = self.heygen.base_url.trim_end_matches('/');
                Route {
                    create_method: CreateMethod::Post,
                    create_url: format!("{base}/v2/video/generate"),
                    status_url: format!("{base}/v1/video_status.get?video_id={{job_id}}"),
                    key_header: Some(KEY_HEADER.to_string()),
                    headers: vec![("Accept".to_string(), "application/json".to_string())],
                }
            }
            VendorKind::Azure => {
                let base = self
                    .azure
                    .base_url
                    .as_deref()
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| {
                        ConfigError::Invalid(
                            "azure.base_url is not set (or AZURE_AVATAR_URL)".to_string(),
                        )
                    })?
                    .trim_end_matches('/');
                Route {
                    create_method: CreateMethod::Post,
                    create_url: format!("{base}/submit"),
                    status_url: format!("{base}/status/{{job_id}}"),
                    key_header: Some(KEY_HEADER.to_string()),
                    headers: Vec::new(),
                }
            }
        };
        Ok(route)
    }

    /// Credencial do fornecedor. HeyGen exige uma; o proxy Azure não.
    pub fn api_key(&self, vendor: VendorKind) -> Result<Option<ApiKey>, ConfigError> {
        match vendor {
            VendorKind::HeyGen => match &self.heygen.api_key {
                Some(key) if !key.is_empty() => Ok(Some(key.clone())),
                _ => Err(ConfigError::Invalid(
                    "heygen.api_key is not set (or HEYGEN_API_KEY)".to_string(),
                )),
            },
            VendorKind::Azure => Ok(self.azure.api_key.clone()),
        }
    }

    /// Codificador e normalizador do fornecedor, com os padrões configurados.
    pub fn vendor_parts(&self, vendor: VendorKind) -> VendorParts {
        match vendor {
            VendorKind::HeyGen => VendorParts::new(HeyGen::new(HeyGenDefaults {
                avatar_id: self.heygen.avatar_id.clone(),
                voice_id: self.heygen.voice_id.clone(),
                avatar_style: self.heygen.avatar_style.clone(),
                speed: self.heygen.speed,
                dimension: Dimension {
                    width: self.heygen.width,
                    height: self.heygen.height,
                },
            })),
            VendorKind::Azure => VendorParts::new(AzureAvatar::new(AzureDefaults {
                voice: self.azure.voice.clone(),
                character: self.azure.character.clone(),
                style: self.azure.style.clone(),
            })),
        }
    }

    /// Política de polling. O intervalo padrão depende do fornecedor:
    /// 2s para HeyGen, 5s para Azure.
    pub fn poll_policy(&self, vendor: VendorKind) -> PollPolicy {
        let p = &self.polling;
        let interval_ms = p.poll_interval_ms.unwrap_or(match vendor {
            VendorKind::HeyGen => 2_000,
            VendorKind::Azure => 5_000,
        });
        PollPolicy {
            initial_delay: Duration::from_millis(p.initial_delay_ms),
            poll_interval: Duration::from_millis(interval_ms),
            backoff_base: Duration::from_millis(p.backoff_base_ms),
            backoff_max: Duration::from_millis(p.backoff_max_ms.max(p.backoff_base_ms)),
            max_failed_attempts: p.max_failed_attempts,
            max_duration: Duration::from_secs(p.max_duration_secs),
        }
    }

    /// Visão da configuração efetiva, com credenciais mascaradas.
    pub fn redacted(&self) -> String {
        let key = |k: &Option<ApiKey>| match k {
            Some(k) => k.to_string(),
            None => "<unset>".to_string(),
        };
        let p = &self.polling;
        let interval = match p.poll_interval_ms {
            Some(ms) => format!("{ms}"),
            None => "vendor default".to_string(),
        };
        format!(
            "vendor = {vendor}\n\n\
             [heygen]\n\
             base_url = {heygen_url}\n\
             api_key = {heygen_key}\n\
             avatar_id = {avatar}\n\
             voice_id = {voice}\n\
             avatar_style = {style}\n\
             speed = {speed}\n\
             dimension = {width}x{height}\n\n\
             [azure]\n\
             base_url = {azure_url}\n\
             api_key = {azure_key}\n\
             voice = {azure_voice}\n\
             character = {character}\n\
             style = {azure_style}\n\n\
             [polling]\n\
             initial_delay_ms = {initial}\n\
             poll_interval_ms = {interval}\n\
             backoff_base_ms = {base}\n\
             backoff_max_ms = {max}\n\
             max_failed_attempts = {attempts}\n\
             max_duration_secs = {duration}",
            vendor = self.vendor,
            heygen_url = self.heygen.base_url,
            heygen_key = key(&self.heygen.api_key),
            avatar = self.heygen.avatar_id,
            voice = self.heygen.voice_id,
            style = self.heygen.avatar_style,
            speed = self.heygen.speed,
            width = self.heygen.width,
            height = self.heygen.height,
            azure_url = self.azure.base_url.as_deref().unwrap_or("<unset>"),
            azure_key = key(&self.azure.api_key),
            azure_voice = self.azure.voice,
            character = self.azure.character,
            azure_style = self.azure.style,
            initial = p.initial_delay_ms,
            base = p.backoff_base_ms,
            max = p.backoff_max_ms,
            attempts = p.max_failed_attempts,
            duration = p.max_duration_secs,
        )
    }
}
