//! Tipos de erro para a recuperação de dados de ordens de serviço.
//!
//! Define [`RetrieveError`] com variantes para ordem inexistente, erros da API,
//! rate limiting, falhas de rede e dados malformados.

use thiserror::Error;

use super::types::WorkOrderId;

/// Erros que podem ocorrer ao buscar ou mapear uma ordem de serviço.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// A fonte não conhece a ordem de serviço.
    #[error("work order {0} not found")]
    NotFound(WorkOrderId),

    /// O servidor retornou HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro erro HTTP (4xx/5xx), com o corpo da resposta.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Falha ao ler a fixture do disco.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Dados recebidos não correspondem ao formato esperado.
    #[error("malformed work order data: {0}")]
    Malformed(String),
}
