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

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "korektor")]
#[command(version, author = "Muvon Un Limited <opensource@muvon.io>")]
#[command(about = "HR knowledge assistant answering from a curated corpus with cited sources", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the system config, created on first run)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging for korektor modules
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question
    Ask {
        /// Question text
        #[arg(required = true)]
        question: Vec<String>,
    },

    /// Interactive conversation keeping the last turns as context
    Chat,

    /// Rebuild the knowledge base if sources changed
    Reload {
        /// Rebuild even when nothing changed
        #[arg(short, long)]
        force: bool,
    },

    /// Show knowledge base statistics
    Stats,

    /// List indexed documents with their citations
    Sources,

    /// Remove the cached index; the next start rebuilds it
    ClearCache,
}
