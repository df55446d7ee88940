//! Interface de linha de comando do synthjob baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, config)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::JobRequest;
use crate::vendor::VendorKind;

/// synthjob: submete e acompanha jobs de síntese de vídeo com avatar.
#[derive(Debug, Parser)]
#[command(name = "synthjob", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = "synthjob.toml")]
    pub config: PathBuf,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Fornecedor aceito pela CLI, mapeado para [`VendorKind`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VendorArg {
    /// API de vídeo HeyGen.
    Heygen,
    /// Síntese em lote de avatar do Azure, via proxy.
    Azure,
}

impl From<VendorArg> for VendorKind {
    fn from(arg: VendorArg) -> Self {
        match arg {
            VendorArg::Heygen => VendorKind::HeyGen,
            VendorArg::Azure => VendorKind::Azure,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete um job com o texto fornecido e acompanha até o fim.
    ///
    /// Ctrl-C cancela o job.
    Run {
        /// Texto a ser falado pelo avatar.
        text: String,

        /// Fornecedor; padrão vem do arquivo de configuração.
        #[arg(long)]
        vendor: Option<VendorArg>,

        /// ID do avatar (HeyGen) ou personagem (Azure).
        #[arg(long)]
        avatar: Option<String>,

        /// ID ou nome da voz.
        #[arg(long)]
        voice: Option<String>,

        /// Estilo do avatar.
        #[arg(long)]
        style: Option<String>,

        /// Largura do vídeo em pixels.
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Altura do vídeo em pixels.
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },

    /// Consulta uma vez o status de um job existente.
    Status {
        /// ID do job atribuído pelo fornecedor.
        job_id: String,

        #[arg(long)]
        vendor: Option<VendorArg>,
    },

    /// Mostra a configuração efetiva, com credenciais mascaradas.
    Config,
}

impl Command {
    /// Monta o [`JobRequest`] do subcomando `run`.
    pub fn job_request(&self) -> Option<JobRequest> {
        let Command::Run {
            text,
            avatar,
            voice,
            style,
            width,
            height,
            ..
        } = self
        else {
            return None;
        };
        let mut request = JobRequest::new(text.clone());
        request.avatar = avatar.clone();
        request.voice = voice.clone();
        request.style = style.clone();
        if let (Some(width), Some(height)) = (width, height) {
            request = request.with_dimension(*width, *height);
        }
        Some(request)
    }
}
