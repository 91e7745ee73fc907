//! Interface de linha de comando do woexport baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (create, advance,
//! status, list, nudge, watch) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::state_machine::Stage;

/// woexport: orquestrador de exportação em lote de ordens de serviço.
#[derive(Debug, Parser)]
#[command(name = "woexport", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./woexport.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria um job de exportação e gera o payload.
    Create(CreateArgs),

    /// Grava um novo estágio no job, como faria um ator externo.
    Advance {
        job_id: Uuid,

        /// Estágio de destino (ex.: ready-for-merge).
        #[arg(value_parser = parse_stage)]
        stage: Stage,
    },

    /// Mostra o registro de um job.
    Status { job_id: Uuid },

    /// Lista todos os jobs.
    List,

    /// Rearma jobs parados em estágios "in progress".
    Nudge,

    /// Executa o nudge periodicamente até Ctrl-C.
    Watch {
        /// Intervalo entre varreduras, em segundos.
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
}

/// Origem dos ids: lista na linha de comando ou arquivo JSON `sourceIds`.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct CreateArgs {
    /// Ids das ordens de serviço.
    #[arg(long, num_args = 1..)]
    pub ids: Vec<Uuid>,

    /// Arquivo com o JSON de `sourceIds`.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    raw.parse()
}
