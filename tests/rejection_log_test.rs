use deferred_value::{MicrotaskQueue, Resolution, Runtime};
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::Level;

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn with_captured_log(run: impl FnOnce()) -> String {
    let log = CapturedLog::default();
    let make_writer = {
        let log = log.clone();
        move || log.clone()
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::with_default(subscriber, run);
    log.contents()
}

#[test]
fn sink_declining_report_logs_error_once() {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let log = with_captured_log(|| {
        let queue = MicrotaskQueue::new();
        let sink = reported.clone();
        let runtime = Runtime::builder(queue.clone())
            .rejection_sink(move |reason: &dyn Debug| {
                sink.lock().unwrap().push(format!("{reason:?}"));
                false
            })
            .build();
        let _lost = runtime.rejected::<i32, String>("lost".to_string());
        queue.run_until_idle();
    });

    assert_eq!(*reported.lock().unwrap(), vec!["\"lost\"".to_string()]);
    assert_eq!(log.matches("Uncaught (in deferred value) \"lost\"").count(), 1);
    assert!(log.contains("ERROR"));
}

#[test]
fn missing_sink_logs_error_once() {
    let log = with_captured_log(|| {
        let queue = MicrotaskQueue::new();
        let runtime = Runtime::new(queue.clone());
        let (_deferred, _resolve, reject) = runtime.with_resolvers::<i32, String>();
        reject.reject("lost".to_string());
        reject.reject("again".to_string());
        queue.run_until_idle();
    });

    assert_eq!(log.matches("Uncaught (in deferred value)").count(), 1);
    assert!(log.contains("\"lost\""));
    assert!(!log.contains("again"));
}

#[test]
fn suppressed_report_logs_no_error() {
    let log = with_captured_log(|| {
        let queue = MicrotaskQueue::new();
        let runtime = Runtime::builder(queue.clone())
            .rejection_sink(|_: &dyn Debug| true)
            .build();
        let _quiet = runtime.rejected::<i32, String>("quiet".to_string());
        queue.run_until_idle();
    });

    assert!(!log.contains("Uncaught"));
    assert!(!log.contains("ERROR"));
}

#[test]
fn observed_rejection_is_not_reported() {
    let log = with_captured_log(|| {
        let queue = MicrotaskQueue::new();
        let runtime = Runtime::new(queue.clone());
        let handled = runtime.rejected::<i32, String>("handled".to_string());
        let _recovered = handled.catch(|reason| Ok(Resolution::Value(reason.len() as i32)));
        queue.run_until_idle();
    });

    assert!(!log.contains("Uncaught"));
}
