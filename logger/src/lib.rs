//! Kernel logging.
//!
//! Two layers:
//! * leveled macros (`error!`, `warn!`, `info!`, `trace!`) filtered by the
//!   using crate's `LOG_LEVEL` constant;
//! * the `debug!('t', ...)` macro, gated on single-character categories
//!   enabled per run with [`enable`] (`t` threads, `f` file system, `a`
//!   address spaces, `x` swap, `d` disk, `e` exceptions, `s` syscalls).

use core::fmt;
use std::io::Write;

#[macro_use]
extern crate lazy_static;

use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    #[derive(Clone, Copy)]
    pub struct Categories: u32 {
        const THREADS = 1 << 0;
        const FILESYS = 1 << 1;
        const ADDRESS = 1 << 2;
        const SWAP    = 1 << 3;
        const DISK    = 1 << 4;
        const EXCEPT  = 1 << 5;
        const SYSCALL = 1 << 6;
    }
}

impl Categories {
    fn from_char(c: char) -> Option<Categories> {
        match c {
            't' => Some(Self::THREADS),
            'f' => Some(Self::FILESYS),
            'a' => Some(Self::ADDRESS),
            'x' => Some(Self::SWAP),
            'd' => Some(Self::DISK),
            'e' => Some(Self::EXCEPT),
            's' => Some(Self::SYSCALL),
            _ => None,
        }
    }
}

lazy_static! {
    static ref ENABLED: Mutex<Categories> = Mutex::new(Categories::empty());
}

/// 打开若干 debug 分类, "+" 表示全部打开
pub fn enable(categories: &str) {
    let mut enabled = ENABLED.lock();
    for c in categories.chars() {
        if c == '+' {
            *enabled = Categories::all();
            return;
        }
        if let Some(flag) = Categories::from_char(c) {
            enabled.insert(flag);
        }
    }
}

pub fn category_enabled(category: char) -> bool {
    match Categories::from_char(category) {
        Some(flag) => ENABLED.lock().contains(flag),
        None => false,
    }
}

#[derive(Debug)]
pub enum Color {
    Red = 31,
    Yellow = 93,
    Blue = 35,
    Green = 32,
    Gray = 34,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    ERROR = 50,
    WARN = 40,
    INFO = 30,
    DEBUG = 20,
    TRACE = 10,
}

pub fn logger_print(color: Color, level: &str, args: fmt::Arguments) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    // 忽略写入错误, 日志失败不应影响内核
    let _ = writeln!(
        out,
        "\x1B[{}m[{:5}]\x1B[0m [nos] {}",
        color as i32, level, args
    );
}

#[macro_export]
macro_rules! log {
    ($color:expr, $level:literal, $($arg:tt)*) => {
        $crate::logger_print($color, $level, format_args!($($arg)*))
    }
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        if $crate::LogLevel::ERROR >= crate::LOG_LEVEL {
            $crate::log!($crate::Color::Red, "ERROR", $($arg)*)
        }
    }
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        if $crate::LogLevel::WARN >= crate::LOG_LEVEL {
            $crate::log!($crate::Color::Yellow, "WARN", $($arg)*)
        }
    }
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        if $crate::LogLevel::INFO >= crate::LOG_LEVEL {
            $crate::log!($crate::Color::Blue, "INFO", $($arg)*)
        }
    }
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::LogLevel::TRACE >= crate::LOG_LEVEL {
            $crate::log!($crate::Color::Gray, "TRACE", $($arg)*)
        }
    }
}

/// 分类调试输出, 第一个参数是单字符分类
#[macro_export]
macro_rules! debug {
    ($category:literal, $($arg:tt)*) => {
        if $crate::category_enabled($category) {
            $crate::log!($crate::Color::Green, "DEBUG", $($arg)*)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const LOG_LEVEL: LogLevel = LogLevel::TRACE;

    #[test]
    fn category_parsing() {
        assert!(!category_enabled('t'));
        enable("tf");
        assert!(category_enabled('t'));
        assert!(category_enabled('f'));
        assert!(!category_enabled('x'));
        enable("+");
        assert!(category_enabled('x'));
        assert!(category_enabled('e'));
    }

    #[test]
    fn unknown_category_is_silent() {
        assert!(!category_enabled('q'));
        enable("q");
        assert!(!category_enabled('q'));
        let _ = LOG_LEVEL;
    }
}
