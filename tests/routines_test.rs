//! Cross-module coverage for `RoutinesScheduler`: persistence across
//! process restart and the internal tick loop firing on its own cadence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarmcore::routines::RoutinesScheduler;
use swarmcore::types::{CronJobState, CronPayload, CronPayloadKind, CronScope, CronSchedule, Routine};

fn every_routine(id: &str, every_ms: i64, routine_name: &str) -> Routine {
    Routine {
        id: id.to_owned(),
        name: id.to_owned(),
        enabled: true,
        schedule: CronSchedule::Every { every_ms },
        payload: CronPayload {
            kind: CronPayloadKind::SystemEvent,
            message: String::new(),
            deliver: false,
            channel: None,
            to: None,
            scope: CronScope::System,
            routine: Some(routine_name.to_owned()),
            bot: None,
            metadata: HashMap::new(),
        },
        state: CronJobState {
            next_run_at_ms: 0,
            last_run_at_ms: None,
            last_status: None,
            last_error: None,
        },
        created_at_ms: 0,
        updated_at_ms: 0,
        delete_after_run: false,
    }
}

#[tokio::test]
async fn routines_survive_a_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("routines.json");

    {
        let scheduler = RoutinesScheduler::load(store_path.clone()).await.unwrap();
        scheduler.add_routine(every_routine("r1", 60_000, "team_check_in")).await.unwrap();
        scheduler.add_routine(every_routine("r2", 30_000, "bot_focus")).await.unwrap();
        scheduler.enable_routine("r2", false).await.unwrap();
    }

    // Fresh scheduler instance over the same store path, simulating a restart.
    let reloaded = RoutinesScheduler::load(store_path).await.unwrap();
    let mut routines = reloaded.list_routines(None).await;
    routines.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(routines.len(), 2);
    assert_eq!(routines[0].id, "r1");
    assert!(routines[0].enabled);
    assert_eq!(routines[1].id, "r2");
    assert!(!routines[1].enabled);
}

#[tokio::test(start_paused = true)]
async fn start_dispatches_on_its_own_tick_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(RoutinesScheduler::load(dir.path().join("routines.json")).await.unwrap());

    let mut routine = every_routine("r1", 2_000, "team_check_in");
    // Force the first tick to fire almost immediately.
    routine.state.next_run_at_ms = 0;
    scheduler.add_routine(routine).await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    scheduler
        .register_handler(
            "team_check_in",
            Arc::new(move |_payload: &swarmcore::types::CronPayload| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

    let handle = tokio::spawn(Arc::clone(&scheduler).start());

    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;

    scheduler.stop();
    let _ = handle.await;

    assert!(fired.load(Ordering::SeqCst) >= 1, "expected the handler to have fired at least once");
}
