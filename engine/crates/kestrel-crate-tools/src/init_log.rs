use std::io::Write;

fn log_builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let level_style = match record.level() {
                log::Level::Info => buf
                    .default_level_style(log::Level::Info)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
                log::Level::Warn => buf
                    .default_level_style(log::Level::Warn)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
                log::Level::Error => buf
                    .default_level_style(log::Level::Error)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
                level => buf.default_level_style(level),
            };
            let grey_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
            let level = record.level();
            let target = record.target();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5} {}{level_style:#}\n\t {grey_style}{target} @ {file}:{line}{grey_style:#}",
                record.args()
            )
        })
        .filter(None, level)
        // RUST_LOG 可以覆盖默认的等级
        .parse_default_env();
    builder
}

/// 初始化全局 logger，默认等级为 Info
pub fn init_log() {
    log_builder(log::LevelFilter::Info).init();
}

/// 测试中使用：输出交给 test harness 捕获，可以被重复调用
pub fn init_test_log() {
    let _ = log_builder(log::LevelFilter::Debug).is_test(true).try_init();
}
