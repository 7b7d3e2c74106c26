use std::io::{self, Stderr};

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

type BoxedLayer<S> = Box<dyn LayerTrait<S> + Send + Sync>;

/// Консольный слой. Пишет в stderr: stdout принадлежит выводу CLI.
pub fn console_layer<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stderr = io::stderr;
    let console = &config.console;

    // Один и тот же набор опций для трёх форматов; тип слоя у каждого свой,
    // поэтому стираем его в Box.
    match config.format {
        LogFormat::Json => fmt::layer()
            .event_format(fmt::format().json().with_current_span(true))
            .with_writer(writer)
            .with_ansi(false)
            .with_target(console.with_target)
            .with_thread_ids(console.with_thread_ids)
            .with_line_number(console.with_line_numbers)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .event_format(fmt::format().pretty())
            .with_writer(writer)
            .with_ansi(console.with_ansi)
            .with_target(console.with_target)
            .with_thread_ids(console.with_thread_ids)
            .with_line_number(console.with_line_numbers)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .event_format(fmt::format().compact())
            .with_writer(writer)
            .with_ansi(console.with_ansi)
            .with_target(console.with_target)
            .with_thread_ids(console.with_thread_ids)
            .with_line_number(console.with_line_numbers)
            .boxed(),
    }
}

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// `WorkerGuard` должен жить до конца работы процесса, иначе хвост логов
/// потеряется.
pub fn file_layer<S>(config: &LoggingConfig) -> (BoxedLayer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = daily(&config.file.directory, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .event_format(fmt::format().json())
            .with_writer(writer)
            .with_ansi(false)
            .boxed(),
        _ => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
    };
    (layer, guard)
}
