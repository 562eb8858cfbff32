//! Joining worker threads without waiting forever.

use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub(crate) fn panic_message(info: &(dyn Any + Send)) -> &str {
    info.downcast_ref::<&str>()
        .copied()
        .or_else(|| info.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Join `handle` if it finishes before `deadline`.
///
/// Returns `None` if the thread panicked or is still running at the deadline;
/// a thread still running is detached and dies with the process.
pub(crate) fn join_until<T>(handle: JoinHandle<T>, deadline: Instant, name: &str) -> Option<T> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(thread = name, "Shutdown timeout, detaching thread");
            return None;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    match handle.join() {
        Ok(value) => Some(value),
        Err(panic_info) => {
            tracing::error!(
                thread = name,
                "Thread panicked: {}",
                panic_message(panic_info.as_ref())
            );
            None
        }
    }
}

/// Join every handle against one shared deadline.
pub(crate) fn join_all_within(handles: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for (name, handle) in handles {
        let _joined = join_until(handle, deadline, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_until_returns_value() {
        let handle = thread::spawn(|| 42);
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(join_until(handle, deadline, "test"), Some(42));
    }

    #[test]
    fn test_join_until_reports_panic_as_none() {
        let handle = thread::spawn(|| -> u32 { panic!("boom") });
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(join_until(handle, deadline, "test"), None);
    }

    #[test]
    fn test_join_until_gives_up_at_deadline() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_secs(5)));
        let start = Instant::now();
        assert!(join_until(handle, start + Duration::from_millis(50), "stuck").is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
