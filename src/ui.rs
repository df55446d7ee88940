//! Interface de terminal do synthjob: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um job no terminal, assinando as transições da sessão.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::observer::JobObserver;
use crate::state_machine::{JobHandle, JobState};

/// Tom da mensagem final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Success,
    Failure,
    Warning,
}

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner animado enquanto o job está em andamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e cancelamento ou
/// estado desconhecido (amarelo).
pub struct JobProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com a descrição do job e retorna a instância de progresso.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("SUBMITTING: {description}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Observador que atualiza a mensagem do spinner a cada transição.
    pub fn observer(&self) -> SpinnerObserver {
        SpinnerObserver {
            pb: self.pb.clone(),
        }
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    pub fn complete(&self, job: &JobHandle) {
        self.pb.finish_and_clear();
        self.print_outcome(job);
    }

    /// Remove o spinner sem imprimir resultado (ex.: submissão rejeitada).
    pub fn abandon(&self) {
        self.pb.finish_and_clear();
    }

    /// Imprime uma linha colorida com o estado do job.
    pub fn print_outcome(&self, job: &JobHandle) {
        let (tone, line) = summary(job);
        let (style, mark) = match tone {
            Tone::Success => (&self.green, "✓"),
            Tone::Failure => (&self.red, "✗"),
            Tone::Warning => (&self.yellow, "!"),
        };
        println!("  {} {line}", style.apply_to(mark));
    }
}

/// Atualiza o spinner; usado como [`JobObserver`] da sessão.
pub struct SpinnerObserver {
    pb: ProgressBar,
}

impl JobObserver for SpinnerObserver {
    fn on_transition(&mut self, _session: &str, job: &JobHandle) {
        self.pb.set_message(format!("{} [{}] poll #{}", job.state, job.id, job.attempt));
    }
}

fn summary(job: &JobHandle) -> (Tone, String) {
    match &job.state {
        JobState::Succeeded { artifact_url } => (Tone::Success, format!("Video ready: {artifact_url}")),
        JobState::Failed { reason } => (Tone::Failure, format!("Job {} failed: {reason}", job.id)),
        JobState::Cancelled => (Tone::Warning, format!("Job {} cancelled", job.id)),
        JobState::Unknown { raw } => (
            Tone::Warning,
            format!("Job {} ended in an unknown state: {raw}", job.id),
        ),
        state => (Tone::Warning, format!("Job {}: {state}", job.id)),
    }
}

/// Imprime um job (ou só o estado) formatado em JSON.
pub fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
