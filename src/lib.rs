use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod config;
pub mod document;
pub mod docx;
pub mod error;
pub mod frame;
pub mod init;
pub mod parser;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod session;
pub mod timestamp;

pub use error::WiError;
pub use frame::{FfmpegFrameExtractor, FrameExtractor, StaticFrameExtractor};
pub use parser::{Draft, MarkerMatch, Step, parse};
pub use registry::StepRegistry;
pub use session::Session;
pub use timestamp::Timestamp;

pub type LogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<LogHook>>> = Lazy::new(|| Mutex::new(None));

pub fn set_log_hook(hook: Option<LogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

fn forward_to_hook(tag: &str, message: &str) {
    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub fn logi(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::info!("{}", message);
    forward_to_hook("INFO", message);
}

pub fn logok(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::info!(status = "ok", "{}", message);
    forward_to_hook("OK", message);
}

pub fn logw(message: impl AsRef<str>) {
    let message = message.as_ref();
    tracing::warn!("{}", message);
    forward_to_hook("WARN", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_receives_tagged_lines() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }))));

        logw("frame missing");
        set_log_hook(None);
        logi("not forwarded");

        let lines = seen.lock().unwrap();
        assert!(lines.iter().any(|l| l == "[WARN] frame missing"));
        assert!(!lines.iter().any(|l| l.contains("not forwarded")));
    }
}
