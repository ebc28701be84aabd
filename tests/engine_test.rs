mod common;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use pyrunner::{execution::TIMEOUT_MESSAGE, ErrorKind};

#[tokio::test]
async fn concurrent_ensure_ready_bootstraps_once() -> Result<()> {
    let Some((manager, _dir)) = common::manager() else {
        return Ok(());
    };

    let calls = (0..8).map(|_| {
        let manager = manager.clone();
        async move { manager.ensure_ready().await }
    });
    let runtimes = join_all(calls).await.into_iter().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(manager.bootstrap_count(), 1);
    assert!(runtimes.iter().all(|r| Arc::ptr_eq(r, &runtimes[0])));
    assert!(manager.is_ready());
    assert!(!manager.is_loading());
    assert!(!manager.is_initializing());
    assert!(manager.last_error().is_none());

    // Later calls reuse the live instance.
    let again = manager.ensure_ready().await?;
    assert!(Arc::ptr_eq(&again, &runtimes[0]));
    assert_eq!(manager.bootstrap_count(), 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn output_does_not_leak_between_calls() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };

    let first = invoker
        .invoke("print('A')\nimport sys\nprint('warn', file=sys.stderr)\nraise ValueError('boom')", None)
        .await;
    assert!(!first.success);
    assert_eq!(first.stdout, "A\n");
    assert_eq!(first.stderr, "warn\n");
    let err = first.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Exception("ValueError".into()));
    assert_eq!(err.message, "boom");
    assert!(err.raw_trace.contains("ValueError: boom"));

    let second = invoker.invoke("print('B')", None).await;
    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.stdout, "B\n");
    assert_eq!(second.stderr, "");
    Ok(())
}

#[tokio::test]
async fn trailing_expression_is_returned() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };

    let res = invoker.invoke("x = 20\nx + 22", None).await;
    assert!(res.success);
    assert_eq!(res.return_value.as_deref(), Some("42"));

    let res = invoker.invoke("x = 1", None).await;
    assert_eq!(res.return_value, None);
    Ok(())
}

#[tokio::test]
async fn library_is_scoped_to_one_call() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };

    let library = "def helper():\n    return 'from library'\n";
    let with = invoker
        .invoke("from library import helper\nprint(helper())", Some(library))
        .await;
    assert!(with.success, "{:?}", with.error);
    assert_eq!(with.stdout, "from library\n");

    let without = invoker.invoke("from library import helper", None).await;
    assert!(!without.success);
    let kind = without.error.unwrap().kind;
    assert!(
        matches!(&kind, ErrorKind::Exception(name) if name == "ModuleNotFoundError" || name == "ImportError"),
        "{}",
        kind
    );

    // Globals of one call are gone in the next.
    invoker.invoke("leftover = 1", None).await;
    let res = invoker.invoke("print(leftover)", None).await;
    assert_eq!(res.error.unwrap().kind, ErrorKind::Exception("NameError".into()));
    Ok(())
}

#[tokio::test]
async fn runaway_program_times_out() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };
    if !invoker.runtime().instance().is_some_and(|r| r.interrupt.is_some()) {
        eprintln!("skipping: interrupts unavailable on this host");
        return Ok(());
    }

    let invoker = invoker.with_timeout(Some(Duration::from_millis(300)));
    let res = invoker.invoke("print('started')\nwhile True:\n    pass", None).await;
    assert!(!res.success);
    assert_eq!(res.stdout, "started\n");
    let err = res.error.unwrap();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.message, TIMEOUT_MESSAGE);
    assert!(!err.to_string().contains("KeyboardInterrupt"));

    // The runtime is still usable, and a user-raised interrupt keeps its name.
    let after = invoker.invoke("raise KeyboardInterrupt", None).await;
    assert_eq!(after.error.unwrap().kind, ErrorKind::Exception("KeyboardInterrupt".into()));
    let ok = invoker.invoke("print('ok')", None).await;
    assert_eq!(ok.stdout, "ok\n");
    Ok(())
}

#[tokio::test]
async fn untimed_call_after_timeout_keeps_interrupt_name() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };
    if !invoker.runtime().instance().is_some_and(|r| r.interrupt.is_some()) {
        eprintln!("skipping: interrupts unavailable on this host");
        return Ok(());
    }

    let timed = invoker.clone().with_timeout(Some(Duration::from_millis(200)));
    let res = timed.invoke("while True:\n    pass", None).await;
    assert_eq!(res.error_kind(), Some(&ErrorKind::Timeout));

    let untimed = invoker.with_timeout(None);
    let res = untimed.invoke("raise KeyboardInterrupt", None).await;
    assert_eq!(res.error_kind(), Some(&ErrorKind::Exception("KeyboardInterrupt".into())));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_right_after_timeout_is_not_interrupted() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };
    if !invoker.runtime().instance().is_some_and(|r| r.interrupt.is_some()) {
        eprintln!("skipping: interrupts unavailable on this host");
        return Ok(());
    }

    let invoker = invoker.with_timeout(Some(Duration::from_millis(100)));
    for _ in 0..3 {
        let res = invoker.invoke("while True:\n    pass", None).await;
        assert_eq!(res.error_kind(), Some(&ErrorKind::Timeout));
        let res = invoker
            .invoke("import time\ntime.sleep(0.05)\nprint('done')", None)
            .await;
        assert!(res.success, "{:?}", res.error);
        assert_eq!(res.stdout, "done\n");
    }
    Ok(())
}

#[tokio::test]
async fn library_is_replaced_between_calls() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };

    let first = invoker
        .invoke("import library\nprint(library.a())", Some("def a():\n    return 1\n"))
        .await;
    assert_eq!(first.stdout, "1\n");

    let second = invoker
        .invoke(
            "import library\nprint(hasattr(library, 'a'), library.b())",
            Some("def b():\n    return 2\n"),
        )
        .await;
    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.stdout, "False 2\n");
    Ok(())
}

#[tokio::test]
async fn overlapping_invokes_are_queued() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };

    let calls = (0..4).map(|i| {
        let invoker = invoker.clone();
        async move { invoker.invoke(&format!("print({})", i), None).await }
    });
    let results = join_all(calls).await;
    for (i, res) in results.iter().enumerate() {
        assert!(res.success);
        assert_eq!(res.stdout, format!("{}\n", i));
    }
    Ok(())
}

#[tokio::test]
async fn crashed_interpreter_is_replaced() -> Result<()> {
    let Some((invoker, _dir)) = common::ready_invoker().await? else {
        return Ok(());
    };
    let manager = invoker.runtime().clone();

    let res = invoker.invoke("import os\nos._exit(3)", None).await;
    assert_eq!(res.error_kind(), Some(&ErrorKind::RuntimeCrashed));
    assert!(!manager.is_ready());

    manager.ensure_ready().await?;
    assert_eq!(manager.bootstrap_count(), 2);
    assert_eq!(invoker.invoke("print('back')", None).await.stdout, "back\n");
    Ok(())
}
