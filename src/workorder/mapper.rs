//! Normalizes retrieved work-order data into the export model consumed by
//! the document flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RetrieveError;
use super::types::{Address, Answer, WorkOrderData, WorkOrderId};

/// Ordered export models for every work order of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub job_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub work_orders: Vec<ExportModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportModel {
    pub work_order_id: WorkOrderId,
    pub work_order_number: String,
    pub title: Option<String>,
    pub customer: Option<String>,
    /// Single-line service address.
    pub address: Option<String>,
    pub status: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub instructions: Option<String>,
    pub surveys: Vec<SurveyExport>,
    pub tasks: Vec<TaskExport>,
    pub products: Vec<ProductExport>,
    pub summary: ExportSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyExport {
    pub name: String,
    pub completed_on: Option<DateTime<Utc>>,
    pub answers: Vec<AnswerExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerExport {
    pub question: String,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExport {
    pub name: String,
    pub percent_complete: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductExport {
    pub name: String,
    pub quantity: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub survey_count: usize,
    pub answered_questions: usize,
    pub unanswered_questions: usize,
    pub task_count: usize,
    pub tasks_completed: usize,
}

pub struct ExportMapper;

impl ExportMapper {
    /// Map the data retrieved for `requested`. The data must describe that
    /// work order and carry a number.
    pub fn map(requested: WorkOrderId, data: WorkOrderData) -> Result<ExportModel, RetrieveError> {
        if data.id != requested {
            return Err(RetrieveError::Malformed(format!(
                "requested work order {requested} but source returned {}",
                data.id
            )));
        }
        let number = clean(Some(data.number)).ok_or_else(|| {
            RetrieveError::Malformed(format!("work order {requested} has no number"))
        })?;

        let mut surveys: Vec<SurveyExport> = data
            .surveys
            .into_iter()
            .map(|survey| SurveyExport {
                name: survey.name.trim().to_string(),
                completed_on: survey.completed_on,
                answers: ordered_answers(survey.answers),
            })
            .collect();
        surveys.sort_by(|a, b| a.name.cmp(&b.name));

        let tasks: Vec<TaskExport> = data
            .tasks
            .into_iter()
            .map(|task| TaskExport {
                name: task.name.trim().to_string(),
                percent_complete: task.percent_complete.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8,
            })
            .collect();

        let products = data
            .products
            .into_iter()
            .map(|line| ProductExport {
                name: line.name.trim().to_string(),
                quantity: line.quantity,
                unit: clean(line.unit),
            })
            .collect();

        let answers = surveys.iter().flat_map(|s| s.answers.iter());
        let answered = answers.clone().filter(|a| a.answer.is_some()).count();
        let summary = ExportSummary {
            survey_count: surveys.len(),
            answered_questions: answered,
            unanswered_questions: answers.count() - answered,
            task_count: tasks.len(),
            tasks_completed: tasks.iter().filter(|t| t.percent_complete == 100).count(),
        };

        Ok(ExportModel {
            work_order_id: requested,
            work_order_number: number,
            title: clean(data.name),
            customer: clean(data.customer),
            address: data.service_address.as_ref().and_then(single_line),
            status: clean(data.status),
            scheduled_start: data.scheduled_start,
            scheduled_end: data.scheduled_end,
            instructions: clean(data.instructions),
            surveys,
            tasks,
            products,
            summary,
        })
    }
}

/// Questions with an explicit order come first, by order; the rest keep
/// their original position.
fn ordered_answers(mut answers: Vec<Answer>) -> Vec<AnswerExport> {
    answers.sort_by_key(|a| (a.order.is_none(), a.order));
    answers
        .into_iter()
        .map(|a| AnswerExport {
            question: a.question.trim().to_string(),
            answer: clean(a.answer),
        })
        .collect()
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn single_line(address: &Address) -> Option<String> {
    let city_line = [address.postal_code.clone(), address.city.clone()]
        .into_iter()
        .filter_map(clean)
        .collect::<Vec<_>>()
        .join(" ");
    let parts: Vec<String> = [
        clean(address.line1.clone()),
        clean(address.line2.clone()),
        clean(Some(city_line)),
        clean(address.state.clone()),
        clean(address.country.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
