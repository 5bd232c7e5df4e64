use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use petek_sched::{App, Module, TaskError};

#[test]
fn test_runs_root_and_dependencies() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut app = App::new();
    app.set_workers(2);

    for name in ["storage", "network"] {
        let order = order.clone();
        app.register(Module::new(name, &[], move |ctx| {
            order.lock().unwrap().push(ctx.name().to_string());
            Ok(())
        }));
    }
    {
        let order = order.clone();
        app.register(Module::new("root", &["storage", "network"], move |ctx| {
            order.lock().unwrap().push(ctx.name().to_string());
            Ok(())
        }));
    }

    app.entry();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 3);
    assert_eq!(order.last().unwrap(), "root");
    assert!(order[..2].contains(&"storage".to_string()));
    assert!(order[..2].contains(&"network".to_string()));
}

#[test]
fn test_no_root_module() {
    let mut app = App::new();
    app.register(Module::new("stray", &[], |_| Ok(())));
    // nothing to run; must return rather than hang
    app.entry();
}

#[test]
fn test_module_failure_is_absorbed() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut app = App::new();
    {
        let ran = ran.clone();
        app.register(Module::new("root", &["flaky"], move |_| {
            ran.store(true, Ordering::Release);
            Ok(())
        }));
    }
    app.register(Module::new("flaky", &[], |_| {
        Err(TaskError::Failed("disk on fire".into()))
    }));

    // the driver logs the failure and keeps draining; root fails through
    // dependency propagation and entry() still returns
    app.entry();
    assert!(!ran.load(Ordering::Acquire));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_interrupt_terminates_modules() {
    let polls = Arc::new(AtomicUsize::new(0));
    let mut app = App::new();
    app.set_interrupt_freq(100);
    {
        let polls = polls.clone();
        app.register(Module::new("root", &[], move |ctx| loop {
            ctx.interrupt_point()?;
            polls.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(5));
        }));
    }

    let app = Arc::new(app);
    let runner = {
        let app = app.clone();
        thread::spawn(move || app.entry())
    };

    // let the module spin a little, then ask for shutdown
    while polls.load(Ordering::Relaxed) < 3 {
        thread::sleep(Duration::from_millis(5));
    }
    let begun = Instant::now();
    app.interrupt(TaskError::Terminated);
    runner.join().unwrap();
    assert!(begun.elapsed() < Duration::from_secs(5));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_interrupt_before_entry_is_noop() {
    let mut app = App::new();
    app.register(Module::new("root", &[], |_| Ok(())));
    // no thread recorded yet
    app.interrupt(TaskError::Terminated);
    app.entry();
}
