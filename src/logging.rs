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

use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt::Layer, prelude::*, registry::Registry, EnvFilter};

use crate::config::LoggingConfig;

fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("warn,korektor=debug")
        } else {
            EnvFilter::new("warn,korektor=info")
        }
    })
}

/// Console logging to stderr, plus JSON files with daily rotation when
/// enabled in config. Returns the log directory if file logging is on.
pub fn init_logging(config: &LoggingConfig, debug_mode: bool) -> anyhow::Result<Option<PathBuf>> {
    // Stdout carries answers; logs go to stderr
    let console_layer = Layer::new()
        .with_writer(std::io::stderr)
        .with_target(false);

    if !config.file {
        Registry::default()
            .with(console_layer)
            .with(env_filter(debug_mode))
            .try_init()?;
        return Ok(None);
    }

    let log_dir = crate::storage::get_logs_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "korektor.log");
    let file_layer = Layer::new()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .json();

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter(debug_mode))
        .try_init()?;

    info!(
        log_directory = %log_dir.display(),
        debug_mode,
        "File logging initialized"
    );

    Ok(Some(log_dir))
}
