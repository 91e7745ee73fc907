//! Tipos de dados de ordens de serviço como retornados pela fonte de dados.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` em camelCase, no
//! formato servido tanto pelo diretório de fixtures quanto pela API HTTP.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identificador de uma ordem de serviço.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(pub Uuid);

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tudo o que é necessário para exportar uma ordem de serviço.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderData {
    pub id: WorkOrderId,
    /// Número legível da ordem (ex.: "WO-00042").
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub service_address: Option<Address>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub surveys: Vec<SurveyResponse>,
    #[serde(default)]
    pub tasks: Vec<ServiceTask>,
    #[serde(default)]
    pub products: Vec<ProductLine>,
}

/// Endereço de atendimento.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Um questionário (survey) respondido em campo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub name: String,
    #[serde(default)]
    pub completed_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

/// Par pergunta/resposta. `order` é a posição da pergunta no questionário.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

/// Tarefa de serviço com percentual de conclusão.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTask {
    pub name: String,
    #[serde(default)]
    pub percent_complete: Option<f64>,
}

/// Produto utilizado na ordem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLine {
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
}
