// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Construction of the slog loggers used throughout the workspace.

use anyhow::Context;
use slog::Drain;

/// On-disk/terminal format for emitted log records.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// slog-term full formatting, for interactive use.
    Human,
    /// Bunyan-style newline-delimited JSON.
    Json,
}

fn async_root(
    drain: slog::Fuse<slog_async::Async>,
    name: &str,
) -> slog::Logger {
    slog::Logger::root(drain, slog::o!("name" => name.to_string()))
}

/// Build the process-wide logger.  Records go to `log_file` when one is
/// given and to stdout otherwise.
pub fn init(
    name: &str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let drain = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            match log_format {
                LogFormat::Json => {
                    // the name lives in the root logger's kv pairs, so
                    // the drain itself can stay 'static
                    let drain = slog_bunyan::new(file).build().fuse();
                    slog_async::Async::new(drain).build().fuse()
                }
                LogFormat::Human => {
                    let decorator = slog_term::PlainDecorator::new(file);
                    let drain =
                        slog_term::FullFormat::new(decorator).build().fuse();
                    slog_async::Async::new(drain).build().fuse()
                }
            }
        }
        None => match log_format {
            LogFormat::Json => {
                let drain =
                    slog_bunyan::new(std::io::stdout()).build().fuse();
                slog_async::Async::new(drain).build().fuse()
            }
            LogFormat::Human => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                slog_async::Async::new(drain).build().fuse()
            }
        },
    };

    Ok(async_root(drain, name))
}
