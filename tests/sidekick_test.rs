//! Cross-task coverage for `SidekickOrchestrator`: wall-clock timeouts and
//! fairness across concurrently fanned-out parents.

use std::collections::HashMap;
use std::time::Duration;

use swarmcore::sidekick::{SidekickLimits, SidekickOrchestrator};
use swarmcore::types::{SidekickOutputFormat, SidekickStatus, SidekickTaskEnvelope};

fn envelope(task_id: &str, parent: &str, room: &str) -> SidekickTaskEnvelope {
    SidekickTaskEnvelope {
        task_id: task_id.to_owned(),
        parent_bot_id: parent.to_owned(),
        room_id: room.to_owned(),
        goal: "do the thing".to_owned(),
        input: HashMap::new(),
        constraints: HashMap::new(),
        output_format: SidekickOutputFormat::Text,
        parent_is_sidekick: false,
    }
}

#[tokio::test(start_paused = true)]
async fn slow_sub_task_times_out_and_still_releases_its_slot() {
    let orchestrator = SidekickOrchestrator::new(SidekickLimits {
        max_per_bot: 1,
        max_per_room: 1,
        timeout: Duration::from_secs(1),
    });

    let task = envelope("t1", "coordinator", "room-1");
    let run = orchestrator.run(vec![task], |_| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("too slow".to_owned())
    });

    tokio::time::pause();
    // Drive the timeout forward; `run` races the sleeping sub-task against
    // the orchestrator's own per-task timeout.
    let (results, ()) = tokio::join!(run, async {
        tokio::time::advance(Duration::from_secs(2)).await;
    });
    let results = results.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SidekickStatus::Timeout);
    assert!(orchestrator.can_spawn("coordinator", "room-1", 1).await);
}

#[tokio::test]
async fn independent_parents_do_not_contend_for_each_others_caps() {
    let orchestrator = SidekickOrchestrator::new(SidekickLimits {
        max_per_bot: 1,
        max_per_room: 5,
        timeout: Duration::from_secs(5),
    });

    let alpha = envelope("alpha-1", "research", "room-1");
    let beta = envelope("beta-1", "design", "room-1");

    let (alpha_result, beta_result) = tokio::join!(
        orchestrator.run(vec![alpha], |t| async move { Ok(t.task_id) }),
        orchestrator.run(vec![beta], |t| async move { Ok(t.task_id) }),
    );

    assert!(alpha_result.is_ok());
    assert!(beta_result.is_ok());
    assert!(orchestrator.can_spawn("research", "room-1", 1).await);
    assert!(orchestrator.can_spawn("design", "room-1", 1).await);
}

#[tokio::test]
async fn room_cap_is_shared_across_parents_in_the_same_room() {
    let orchestrator = SidekickOrchestrator::new(SidekickLimits {
        max_per_bot: 5,
        max_per_room: 1,
        timeout: Duration::from_secs(5),
    });

    assert!(orchestrator.can_spawn("research", "shared-room", 1).await);

    let alpha = envelope("alpha-1", "research", "shared-room");
    let result = orchestrator.run(vec![alpha], |t| async move { Ok(t.task_id) }).await.unwrap();
    assert_eq!(result.len(), 1);

    // After release, the room's slot is free again for a different parent.
    assert!(orchestrator.can_spawn("design", "shared-room", 1).await);
}
