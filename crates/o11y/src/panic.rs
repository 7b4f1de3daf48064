use std::{panic, thread};

use metrics::counter;
use once_cell::sync::OnceCell;
use tracing::error;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install a panic hook that logs the panic with its thread and location
/// and bumps `leadforge_panics_total`. The previous hook still runs, so
/// default backtrace printing is preserved. Idempotent.
pub fn install_hook() {
    if INSTALLED.set(()).is_err() {
        return;
    }

    let prev = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let thread = thread::current();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "<unknown>".into());

        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            %location,
            payload = payload_str(info),
            "panic captured"
        );
        counter!("leadforge_panics_total").increment(1);

        prev(info);
    }));
}

fn payload_str<'a>(info: &'a panic::PanicHookInfo<'a>) -> &'a str {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
