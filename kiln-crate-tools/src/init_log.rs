use std::io::Write;

use env_logger::fmt::Formatter;

/// 日志格式：`[时间] LEVEL [file:line] msg`
fn format_record(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let info_style =
        buf.default_level_style(log::Level::Info).fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
    let level_style = match record.level() {
        log::Level::Info => info_style,
        log::Level::Warn => {
            buf.default_level_style(log::Level::Warn).fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)))
        }
        log::Level::Error => {
            buf.default_level_style(log::Level::Error).fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)))
        }
        level => buf.default_level_style(level),
    };
    let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
    let text_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

    let line = record.line().unwrap_or(!0);
    // windows 与 unix 的路径分隔符都需要裁剪
    let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
    let time = chrono::Local::now().format("%H:%M:%S%.3f");
    let level = record.level();

    writeln!(
        buf,
        "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
         {text_style}{}{text_style:#}",
        record.args()
    )
}

fn builder(default_filter: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(format_record).filter(None, default_filter);
    // RUST_LOG 优先于默认级别
    builder.parse_default_env();
    builder
}

/// 初始化全局 logger，默认级别为 Info
pub fn init_log() {
    builder(log::LevelFilter::Info).init();
}

/// 以指定的默认级别初始化全局 logger
pub fn init_log_with_level(level: log::LevelFilter) {
    builder(level).init();
}

/// 测试中使用：可重复调用，输出交给 test harness 捕获
pub fn init_log_for_test() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}
