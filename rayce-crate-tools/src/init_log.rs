use std::io::Write;

use anstyle::{AnsiColor, Color, RgbColor, Style};

fn level_style(level: log::Level) -> Style {
    let color = match level {
        log::Level::Error => AnsiColor::Red,
        log::Level::Warn => AnsiColor::Yellow,
        log::Level::Info => AnsiColor::Green,
        log::Level::Debug => AnsiColor::Blue,
        log::Level::Trace => AnsiColor::Magenta,
    };
    Style::new().fg_color(Some(Color::Ansi(color))).bold()
}

/// 安装全局 logger
///
/// 默认过滤级别为 `info`，可以通过 `RUST_LOG` 覆盖。
/// 重复调用是安全的（例如多个测试都调用），只有第一次生效。
pub fn init_log() {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = level_style(record.level());
            let dim_style = Style::new().fg_color(Some(Color::Rgb(RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {dim_style}[{file}:{line}]{dim_style:#} {}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
