use anyhow::Result;
use async_trait::async_trait;
use coral_agent::toolbox::human::HumanResponder;

/// Puts `ask_human` questions to the terminal user with a cliclack prompt
pub struct CliclackResponder;

#[async_trait]
impl HumanResponder for CliclackResponder {
    async fn ask(&self, question: &str) -> Result<String> {
        let prompt = format!("Agent asks: {}", question);
        // cliclack blocks on the terminal
        let answer = tokio::task::spawn_blocking(move || {
            cliclack::input(prompt)
                .placeholder("Your response")
                .interact::<String>()
        })
        .await??;
        Ok(answer)
    }
}
