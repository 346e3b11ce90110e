//! Interactive confirmation gate backed by dialoguer.

use async_trait::async_trait;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use mend_engine::exec::{ConfirmationGate, StepPreview};
use mend_engine::Procedure;

/// Prompts the operator on the terminal. With `yes_safe` set, non-destructive
/// steps are approved without prompting; destructive steps always prompt.
pub struct PromptGate {
    yes_safe: bool,
}

impl PromptGate {
    #[must_use]
    pub fn new(yes_safe: bool) -> Self {
        Self { yes_safe }
    }
}

async fn ask(prompt: String) -> bool {
    // dialoguer blocks on the tty; keep it off the async runtime.
    tokio::task::spawn_blocking(move || {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

#[async_trait]
impl ConfirmationGate for PromptGate {
    async fn confirm_step(&self, preview: &StepPreview) -> bool {
        if self.yes_safe && !preview.destructive {
            return true;
        }

        let marker = if preview.destructive {
            "DESTRUCTIVE".red().bold().to_string()
        } else {
            "mutating".yellow().to_string()
        };
        println!();
        println!("  {} step '{}'", marker, preview.step.bold());
        println!("    command: {}", preview.rendered_command.cyan());
        println!("    effect:  {}", preview.predicted_effect);
        println!("    expects: {}", preview.expects);

        ask(format!("Run step '{}'?", preview.step)).await
    }

    async fn confirm_rollback(&self, procedure: &Procedure) -> bool {
        println!();
        println!(
            "  {} '{}' is available: {}",
            "rollback".yellow().bold(),
            procedure.id.bold(),
            procedure.description
        );
        ask(format!("Run rollback '{}'?", procedure.id)).await
    }
}
