//! Interface de terminal do woexport: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente o
//! avanço de um job no terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatch::ChainSummary;
use crate::state_machine::{JobRecord, Stage};

/// Indicador visual de progresso enquanto uma cadeia de notificações é
/// processada.
///
/// Exibe um spinner animado durante o processamento e o estágio final
/// colorido: verde para concluído, vermelho para erro e amarelo para
/// estágios intermediários.
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com a mensagem dada.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o estado do job após a cadeia.
    pub fn complete(&self, record: &JobRecord, summary: &ChainSummary) {
        self.pb.finish_and_clear();
        let (mark, style) = match record.stage {
            Stage::Completed => ("✓", &self.green),
            Stage::Error => ("✗", &self.red),
            _ => ("•", &self.yellow),
        };
        println!(
            "  {} {} {} ({}/{} units)",
            style.apply_to(mark),
            record.id,
            style.apply_to(record.stage),
            record.done_units,
            record.total_units
        );
        if summary.retry_later {
            println!(
                "  {} Final archive not confirmed yet; `woexport nudge` will retry",
                self.yellow.apply_to("↻")
            );
        }
        if summary.contended > 0 {
            println!(
                "  {} Job is being processed by another worker",
                self.yellow.apply_to("!")
            );
        }
        if !record.error_message.is_empty() {
            println!("  {}", self.red.apply_to(first_line(&record.error_message)));
        }
    }
}

/// Imprime o registro completo de um job.
pub fn print_job(record: &JobRecord) {
    let label = Style::new().bold();
    println!("{} {}", label.apply_to("Job:"), record.id);
    println!("{} {}", label.apply_to("Stage:"), stage_style(record.stage).apply_to(record.stage));
    println!(
        "{} {}/{} (next merge index {})",
        label.apply_to("Progress:"),
        record.done_units,
        record.total_units,
        record.next_merge_index
    );
    println!("{} {}", label.apply_to("Heartbeat:"), record.last_heartbeat.to_rfc3339());
    if !record.progress_message.is_empty() {
        println!("{} {}", label.apply_to("Message:"), record.progress_message);
    }
    println!("{} {}", label.apply_to("Created:"), record.created_at.to_rfc3339());
    if !record.error_message.is_empty() {
        println!("{}", Style::new().red().bold().apply_to("─── Error ───"));
        println!("{}", record.error_message);
    }
}

/// Uma linha por job, do mais recente ao mais antigo.
pub fn print_jobs(records: &[JobRecord]) {
    if records.is_empty() {
        println!("No jobs.");
        return;
    }
    for record in records {
        println!(
            "{}  {} {:>3}/{:<3} {}",
            record.id,
            stage_style(record.stage).apply_to(format!("{:<20}", record.stage.as_str())),
            record.done_units,
            record.total_units,
            record.progress_message
        );
    }
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Completed => Style::new().green(),
        Stage::Error => Style::new().red(),
        s if s.is_in_progress() => Style::new().cyan(),
        _ => Style::new().yellow(),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}
