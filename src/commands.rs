// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use korektor::config::Config;
use korektor::knowledge::formatting::{format_answer, format_source_list, format_stats};
use korektor::knowledge::types::ReloadOutcome;
use korektor::{ConversationMemory, KnowledgeAssistant};

use crate::cli::Commands;

pub async fn execute(config: &Config, command: Commands) -> Result<()> {
    let assistant = KnowledgeAssistant::from_config(config).await?;

    match command {
        Commands::Ask { question } => {
            prepare(&assistant).await?;
            let mut memory = assistant.new_conversation();
            ask(&assistant, &question.join(" "), &mut memory).await?;
        }
        Commands::Chat => {
            prepare(&assistant).await?;
            chat(&assistant).await?;
        }
        Commands::Reload { force } => {
            assistant.initialize().await?;
            let rebuilt = if force {
                assistant.force_reload().await?
            } else {
                assistant.reload_if_needed().await?
            };
            if rebuilt {
                println!("{}", "Knowledge base rebuilt".green());
            } else {
                println!("Knowledge base is up to date");
            }
        }
        Commands::Stats => {
            prepare(&assistant).await?;
            let memory = assistant.new_conversation();
            print!("{}", format_stats(&assistant.stats(&memory)));
        }
        Commands::Sources => {
            prepare(&assistant).await?;
            println!("{}", format_source_list(&assistant.sources()));
        }
        Commands::ClearCache => {
            let removed = assistant.clear_cache().await?;
            println!("Removed {} cached index table(s)", removed);
        }
    }

    Ok(())
}

/// Load the cached index or build it, then pick up any source changes
async fn prepare(assistant: &KnowledgeAssistant) -> Result<()> {
    match assistant.initialize().await? {
        ReloadOutcome::Rebuilt { chunks } => {
            eprintln!("{}", format!("Indexed {} chunks", chunks).bright_black());
        }
        ReloadOutcome::Cached | ReloadOutcome::Unchanged => {
            assistant.reload_if_needed().await?;
        }
    }
    Ok(())
}

async fn ask(assistant: &KnowledgeAssistant, question: &str, memory: &mut ConversationMemory) -> Result<()> {
    let answer = assistant.answer(question, memory).await?;
    println!("{}", format_answer(&answer));
    Ok(())
}

async fn chat(assistant: &KnowledgeAssistant) -> Result<()> {
    let mut memory = assistant.new_conversation();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "{}",
        "Zadaj pytanie. Polecenia: stats, clear, reload, quit".bright_black()
    );

    loop {
        print!("{} ", ">".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "stats" => print!("{}", format_stats(&assistant.stats(&memory))),
            "clear" => {
                memory.clear();
                println!("{}", "Historia rozmowy wyczyszczona".green());
            }
            "reload" => match assistant.force_reload().await {
                Ok(_) => println!("{}", "Knowledge base rebuilt".green()),
                Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
            },
            question => {
                // Sources may change while the session is open
                if let Err(e) = assistant.reload_if_needed().await {
                    warn!(error = %e, "Reload failed, answering from the previous index");
                }
                if let Err(e) = ask(assistant, question, &mut memory).await {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                }
            }
        }
    }

    Ok(())
}
