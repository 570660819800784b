//! Failure policies: fail-fast aborts, best-effort skips dependents.

use crew::{Config, Crew, Error, FailurePolicy, FailureReason, TaskStatus};

use crate::fixtures::{failing_agent, recording_agent, task, CallLog};

#[tokio::test]
async fn test_fail_fast_stops_at_first_failure() {
    let log = CallLog::new();
    let broken = failing_agent("Broken", "boom");
    let worker = recording_agent("Worker", &log);

    let t1 = task("t1", broken.id());
    let t2 = task("t2", worker.id()).depends_on(&[t1.id]);
    let t3 = task("t3", worker.id());
    let (t1_id, t2_id, t3_id) = (t1.id, t2.id, t3.id);
    let crew = Crew::new(vec![broken, worker], vec![t1, t2, t3]);

    match crew.kickoff().await {
        Err(Error::Execution { task, message }) => {
            assert_eq!(task, "t1");
            assert_eq!(message, "boom");
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }

    assert!(log.calls().is_empty());
    assert_eq!(
        crew.task_status(&t1_id).await,
        Some(TaskStatus::Failed {
            reason: FailureReason::Execution {
                message: "boom".to_string()
            }
        })
    );
    assert_eq!(crew.task_status(&t2_id).await, Some(TaskStatus::Pending));
    assert_eq!(crew.task_status(&t3_id).await, Some(TaskStatus::Pending));
    assert!(crew.tasks().await.iter().all(|t| t.output.is_none()));
}

#[tokio::test]
async fn test_fail_fast_keeps_earlier_outputs() {
    let log = CallLog::new();
    let worker = recording_agent("Worker", &log);
    let broken = failing_agent("Broken", "late failure");

    let early = task("early", worker.id());
    let late = task("late", broken.id()).depends_on(&[early.id]);
    let early_id = early.id;
    let crew = Crew::new(vec![worker, broken], vec![early, late]);

    assert!(crew.kickoff().await.is_err());
    assert_eq!(crew.task_status(&early_id).await, Some(TaskStatus::Done));
    let stored = crew.tasks().await;
    assert!(stored[0].output.is_some());
}

#[tokio::test]
async fn test_best_effort_skips_dependents() {
    let log = CallLog::new();
    let broken = failing_agent("Broken", "boom");
    let worker = recording_agent("Worker", &log);

    let t1 = task("t1", broken.id());
    let t2 = task("t2", worker.id()).depends_on(&[t1.id]);
    let t3 = task("t3", worker.id());
    let (t1_id, t2_id, t3_id) = (t1.id, t2.id, t3.id);
    let crew = Crew::new(vec![broken, worker], vec![t1, t2, t3])
        .with_policy(FailurePolicy::BestEffort);

    let output = crew.kickoff().await.unwrap();

    assert_eq!(log.calls(), vec!["t3"]);
    assert!(!output.is_success());
    assert_eq!(
        output.status(&t2_id),
        Some(&TaskStatus::Failed {
            reason: FailureReason::UpstreamFailure { upstream: t1_id }
        })
    );
    assert!(output.get(&t2_id).is_none());
    assert!(output.get(&t3_id).is_some());

    assert!(matches!(
        output.require(&t1_id),
        Err(Error::Execution { .. })
    ));
    match output.require(&t2_id) {
        Err(Error::UpstreamFailure { task, upstream }) => {
            assert_eq!(task, "t2");
            assert_eq!(upstream, t1_id);
        }
        other => panic!("Expected UpstreamFailure, got {:?}", other),
    }

    let failed: Vec<&str> = output.failures().map(|t| t.name.as_str()).collect();
    assert_eq!(failed, vec!["t1", "t2"]);
}

#[tokio::test]
async fn test_best_effort_skip_is_transitive() {
    let log = CallLog::new();
    let broken = failing_agent("Broken", "boom");
    let worker = recording_agent("Worker", &log);

    let t1 = task("t1", broken.id());
    let t2 = task("t2", worker.id()).depends_on(&[t1.id]);
    let t3 = task("t3", worker.id()).depends_on(&[t2.id]);
    let (t2_id, t3_id) = (t2.id, t3.id);
    let crew = Crew::new(vec![broken, worker], vec![t1, t2, t3])
        .with_policy(FailurePolicy::BestEffort);

    let output = crew.kickoff().await.unwrap();

    assert!(log.calls().is_empty());
    assert_eq!(
        output.status(&t3_id),
        Some(&TaskStatus::Failed {
            reason: FailureReason::UpstreamFailure { upstream: t2_id }
        })
    );
}

#[tokio::test]
async fn test_policy_comes_from_config() {
    let config = Config {
        failure_policy: FailurePolicy::BestEffort,
        ..Config::default()
    };
    let broken = failing_agent("Broken", "boom");
    let t1 = task("t1", broken.id());
    let crew = Crew::from_config(vec![broken], vec![t1], &config);

    assert_eq!(crew.policy(), FailurePolicy::BestEffort);
    let output = crew.kickoff().await.unwrap();
    assert_eq!(output.failures().count(), 1);
}
