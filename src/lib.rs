pub mod api;
pub mod cache;
pub mod config;
pub mod generator;
pub mod index;
pub mod store;
pub mod tags;

pub(crate) fn logv(tag: &str, message: &str) {
    eprintln!("[{}] {}", tag, message);
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

pub mod init;
