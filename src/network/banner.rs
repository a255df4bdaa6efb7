use std::env;

use atty::Stream;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use sysinfo::System;

/// Полный баннер с информацией об устройстве.
pub const ASCII_FULL: &str = r#"
    PSOS {version}
    ----------------------------------------------
    Mode:             {mode}
    Client:           {client}
    Broker:           {broker}
    Proxy:            {proxy}
    Local prefix:     {prefix}
    PID:              {pid}
    Host:             {host}
    OS/Arch:          {os}/{arch}
    CPU(s):           {cpus}
    Memory:           {mem_value} {mem_unit}
    Git:              {git}
    Build:            {git} ({build_time})
"#;

/// Компактный баннер для вывода.
pub const ASCII_COMPACT: &str = r#"
PSOS {version} | {mode} | {client} -> {broker} | PID {pid}
"#;

/// Что показывать в баннере.
#[derive(Debug, Clone)]
pub struct BannerInfo<'a> {
    pub client_id: &'a str,
    /// Адрес брокера (`Connector::endpoint`)
    pub broker: &'a str,
    /// Адрес сервера прокси, если он включён
    pub proxy: Option<&'a str>,
    pub local_prefix: &'a str,
}

/// Выбор режима: `PSOS_BANNER=full|compact`, иначе полный в debug-сборке.
fn full_mode() -> bool {
    match env::var("PSOS_BANNER").ok().as_deref() {
        Some("full") => true,
        Some("compact") => false,
        _ => cfg!(debug_assertions),
    }
}

fn mode() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

fn build_time() -> String {
    let raw = option_env!("BUILD_TIME").unwrap_or("unknown");
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Local)
            .format("%d.%m.%Y %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Объём памяти в удобных единицах.
fn memory() -> (f64, &'static str) {
    let mut sys = System::new();
    sys.refresh_memory();
    // sysinfo 0.30 отдаёт байты
    let kb = sys.total_memory() as f64 / 1024.0;
    let mb = kb / 1024.0;
    let gb = mb / 1024.0;
    if gb >= 1.0 {
        (gb, "GB")
    } else if mb >= 1.0 {
        (mb, "MB")
    } else {
        (kb, "KB")
    }
}

/// Подставляет значения в шаблон.
pub fn render(
    template: &str,
    info: &BannerInfo<'_>,
) -> String {
    let bits = std::mem::size_of::<usize>() * 8;
    let version = format!("{} ({bits}-bit)", env!("CARGO_PKG_VERSION"));
    let (mem_value, mem_unit) = memory();
    let host = System::host_name().unwrap_or_else(|| "unknown".into());

    template
        .replace("{version}", &version)
        .replace("{mode}", mode())
        .replace("{client}", info.client_id)
        .replace("{broker}", info.broker)
        .replace("{proxy}", info.proxy.unwrap_or("disabled"))
        .replace("{prefix}", info.local_prefix)
        .replace("{pid}", &std::process::id().to_string())
        .replace("{host}", &host)
        .replace("{os}", env::consts::OS)
        .replace("{arch}", env::consts::ARCH)
        .replace("{cpus}", &num_cpus::get().to_string())
        .replace("{mem_value}", &format!("{mem_value:.1}"))
        .replace("{mem_unit}", mem_unit)
        .replace("{git}", option_env!("GIT_COMMIT").unwrap_or("unknown"))
        .replace("{build_time}", &build_time())
}

/// Печатает баннер при старте.
pub fn print_banner(info: &BannerInfo<'_>) {
    let color = atty::is(Stream::Stdout);

    if !full_mode() {
        let s = render(ASCII_COMPACT, info);
        if color {
            println!("{}", s.bold().green());
        } else {
            println!("{s}");
        }
        println!();
        return;
    }

    let s = render(ASCII_FULL, info);
    if !color {
        println!("{s}");
        return;
    }
    for (i, line) in s.lines().enumerate() {
        let label = line.trim_start();
        if i == 1 {
            println!("{}", line.bold().bright_blue());
        } else if label.starts_with("Broker:") || label.starts_with("Proxy:") {
            println!("{}", line.cyan());
        } else if label.starts_with("PID:") {
            println!("{}", line.magenta());
        } else if label.starts_with("Git:") || label.starts_with("Build:") {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }
    println!();
}

/// Строка готовности с точностью до миллисекунд.
pub fn print_startup_log(state: &str) {
    let pid = std::process::id();
    let ts = Local::now().format("%d %b %Y %H:%M:%S%.3f");

    if atty::is(Stream::Stdout) {
        println!(
            "[{}] {} {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "# Router started, PSOS version".dimmed().bold(),
            env!("CARGO_PKG_VERSION").dimmed().bold()
        );
        println!(
            "[{}] {} {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "* Uplink:".green(),
            state
        );
    } else {
        println!(
            "[{pid}] {ts} # Router started, PSOS version {}",
            env!("CARGO_PKG_VERSION")
        );
        println!("[{pid}] {ts} * Uplink: {state}");
    }
}
