use clap::{CommandFactory, Parser};
use event_harvest::cli::CliArgs;
use event_harvest::config::DEFAULT_LOG_LEVEL;
use event_harvest::core::processor;
use event_harvest::error::{AppError, AppResult};
use event_harvest::logging::{log, setup_logging, LogLevel};
use event_harvest::replay;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

fn main() -> ExitCode {
    let cli_args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            setup_logging(DEFAULT_LOG_LEVEL);
            if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                let _ = e.print();
                return ExitCode::SUCCESS;
            }
            log(LogLevel::Error, &format!("CLI Argument Error: {}", e));
            let _ = CliArgs::command().print_help();
            return ExitCode::from(2);
        }
    };

    let cfg = match cli_args.build_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            setup_logging(DEFAULT_LOG_LEVEL);
            log(LogLevel::Error, &format!("Invalid configuration: {}", e));
            return ExitCode::from(2);
        }
    };
    setup_logging(&cfg.log_level);

    let runtime = match Builder::new_multi_thread()
        .enable_all()
        .thread_name("harvest-worker")
        .worker_threads(num_cpus::get())
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("FATAL: Failed to build Tokio runtime: {}", e),
            );
            return ExitCode::FAILURE;
        }
    };

    let cfg = Arc::new(cfg);
    let cancel = CancellationToken::new();

    let main_result: AppResult<i32> = runtime.block_on(async {
        if let Some((file, city, page, dest)) = cli_args.reparse_target() {
            return replay::reparse_page(&file, &city, page, &dest)
                .await
                .map(|_| 0);
        }
        let Some(mode) = cli_args.run_mode() else {
            return Err(AppError::Argument("No command given".into()));
        };

        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log(
                    LogLevel::Warning,
                    "Interrupt received: finishing in-flight pages, no new units will start.",
                );
                interrupt.cancel();
            }
        });

        processor::run(cfg, mode, cancel).await
    });

    match main_result {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(e) => match e {
            AppError::ConfigError(_) | AppError::Argument(_) => {
                log(LogLevel::Error, &e.to_string());
                ExitCode::from(2)
            }
            _ => {
                log(LogLevel::Error, &format!("FATAL UNEXPECTED ERROR: {:?}", e));
                ExitCode::FAILURE
            }
        },
    }
}
