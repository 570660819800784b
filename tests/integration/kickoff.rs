//! Kickoff ordering, outputs and validation.

use std::collections::HashMap;

use serde_json::json;
use tokio::sync::mpsc;

use crew::{Agent, Crew, CrewEvent, Error, Task, TaskStatus};

use crate::fixtures::{length_agent, recording_agent, task, CallLog};

#[tokio::test]
async fn test_single_task_counts_hello() {
    let counter = length_agent();
    let hello = Task::new("count", "hello", "the number of characters", counter.id());
    let hello_id = hello.id;
    let crew = Crew::new(vec![counter], vec![hello]);

    let output = crew.kickoff().await.unwrap();

    assert_eq!(output.get(&hello_id).unwrap().value, json!(5));
    assert_eq!(output.final_output().unwrap().raw(), "5");
    assert!(output.is_success());
    assert_eq!(crew.task_status(&hello_id).await, Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_dependencies_run_before_dependents() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);

    // Declared before its dependency.
    let analyze = task("analyze", agent.id());
    let report = task("report", agent.id()).depends_on(&[analyze.id]);
    let extra = task("extra", agent.id());
    let crew = Crew::new(vec![agent], vec![report, analyze, extra]);

    let order = crew.validate().await.unwrap();
    assert_eq!(order.len(), 3);

    let output = crew.kickoff().await.unwrap();
    assert_eq!(log.calls(), vec!["analyze", "report", "extra"]);

    let names: Vec<&str> = output
        .outputs_in_order()
        .iter()
        .map(|o| o.task_name.as_str())
        .collect();
    assert_eq!(names, vec!["analyze", "report", "extra"]);
}

#[tokio::test]
async fn test_independent_tasks_keep_declaration_order() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let tasks = vec![
        task("first", agent.id()),
        task("second", agent.id()),
        task("third", agent.id()),
    ];
    let crew = Crew::new(vec![agent], tasks);

    crew.kickoff().await.unwrap();
    crew.kickoff().await.unwrap();

    assert_eq!(
        log.calls(),
        vec!["first", "second", "third", "first", "second", "third"]
    );
}

#[tokio::test]
async fn test_diamond_runs_each_task_once() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);

    let a = task("a", agent.id());
    let b = task("b", agent.id()).depends_on(&[a.id]);
    let c = task("c", agent.id()).depends_on(&[a.id]);
    let d = task("d", agent.id()).depends_on(&[b.id, c.id]);
    let d_id = d.id;
    let crew = Crew::new(vec![agent], vec![a, b, c, d]);

    let output = crew.kickoff().await.unwrap();

    for name in ["a", "b", "c", "d"] {
        assert_eq!(log.count(name), 1, "{} should run exactly once", name);
    }
    assert_eq!(log.calls().first().map(String::as_str), Some("a"));
    assert_eq!(log.calls().last().map(String::as_str), Some("d"));
    assert_eq!(output.final_output().unwrap().task_id, d_id);
}

#[tokio::test]
async fn test_upstream_outputs_reach_dependents() {
    let counter = length_agent();
    let doubler = Agent::from_fn("Doubler", "Double upstream numbers", |_task, ctx| {
        let n = ctx
            .last()
            .and_then(|o| o.value.as_u64())
            .ok_or("no upstream number")?;
        Ok(json!(n * 2))
    });

    let count = Task::new("count", "abcd", "a number", counter.id());
    let double = Task::new("double", "double it", "a number", doubler.id()).depends_on(&[count.id]);
    let double_id = double.id;
    let crew = Crew::new(vec![counter, doubler], vec![count, double]);

    let output = crew.kickoff().await.unwrap();
    assert_eq!(output.get(&double_id).unwrap().value, json!(8));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_execution() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);

    let mut t1 = task("t1", agent.id());
    let t2 = task("t2", agent.id()).depends_on(&[t1.id]);
    t1 = t1.depends_on(&[t2.id]);
    let ids = [t1.id, t2.id];
    let crew = Crew::new(vec![agent], vec![t1, t2]);

    let err = crew.kickoff().await.unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }), "got {:?}", err);
    assert!(log.calls().is_empty());
    for id in &ids {
        assert_eq!(crew.task_status(id).await, Some(TaskStatus::Pending));
    }
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let mut lonely = task("lonely", agent.id());
    lonely = lonely.clone().depends_on(&[lonely.id]);
    let crew = Crew::new(vec![agent], vec![lonely]);

    assert!(matches!(
        crew.kickoff().await,
        Err(Error::CycleDetected { .. })
    ));
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_agent_is_rejected_before_execution() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let stranger = length_agent();

    let fine = task("fine", agent.id());
    let orphan = task("orphan", stranger.id()).depends_on(&[fine.id]);
    let fine_id = fine.id;
    let crew = Crew::new(vec![agent], vec![fine, orphan]);

    match crew.kickoff().await {
        Err(Error::UnknownAgent { task, agent }) => {
            assert_eq!(task, "orphan");
            assert_eq!(agent, stranger.id());
        }
        other => panic!("Expected UnknownAgent, got {:?}", other),
    }
    assert!(log.calls().is_empty());
    assert_eq!(crew.task_status(&fine_id).await, Some(TaskStatus::Pending));
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let ghost = task("ghost", agent.id());
    let needy = task("needy", agent.id()).depends_on(&[ghost.id]);
    let crew = Crew::new(vec![agent], vec![needy]);

    match crew.kickoff().await {
        Err(Error::UnknownTask { task, dependency }) => {
            assert_eq!(task, "needy");
            assert_eq!(dependency, ghost.id);
        }
        other => panic!("Expected UnknownTask, got {:?}", other),
    }
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_empty_crew_succeeds() {
    let crew = Crew::new(vec![], vec![]);
    let output = crew.kickoff().await.unwrap();
    assert!(output.outputs_in_order().is_empty());
    assert!(output.final_output().is_none());
    assert!(output.is_success());
}

#[tokio::test]
async fn test_inputs_fill_placeholders() {
    let echo = Agent::from_fn("Echo", "Repeat the description", |task, _ctx| {
        Ok(json!(task.description))
    });
    let greet = Task::new("greet", "Hello {name}, {unknown} stays", "a greeting", echo.id());
    let greet_id = greet.id;
    let crew = Crew::new(vec![echo], vec![greet]);

    let inputs = HashMap::from([("name".to_string(), "Ada".to_string())]);
    let output = crew.kickoff_with_inputs(inputs).await.unwrap();
    assert_eq!(
        output.get(&greet_id).unwrap().value,
        json!("Hello Ada, {unknown} stays")
    );

    // The stored task keeps its template.
    let stored = crew.tasks().await;
    assert_eq!(stored[0].description, "Hello {name}, {unknown} stays");
}

#[tokio::test]
async fn test_events_follow_execution() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let agent_id = agent.id();
    let first = task("first", agent.id());
    let second = task("second", agent.id()).depends_on(&[first.id]);
    let (first_id, second_id) = (first.id, second.id);

    let (tx, mut rx) = mpsc::channel(32);
    let crew = Crew::new(vec![agent], vec![first, second]).with_events(tx);
    crew.kickoff().await.unwrap();
    drop(crew);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(
        events,
        vec![
            CrewEvent::KickoffStarted { tasks: 2 },
            CrewEvent::TaskStarted {
                task_id: first_id,
                agent_id
            },
            CrewEvent::TaskCompleted { task_id: first_id },
            CrewEvent::TaskStarted {
                task_id: second_id,
                agent_id
            },
            CrewEvent::TaskCompleted { task_id: second_id },
            CrewEvent::KickoffFinished {
                completed: 2,
                failed: 0,
                cancelled: false
            },
        ]
    );
}

#[tokio::test]
async fn test_rerun_resets_state() {
    let log = CallLog::new();
    let agent = recording_agent("Worker", &log);
    let only = task("only", agent.id());
    let only_id = only.id;
    let crew = Crew::new(vec![agent], vec![only]);

    let first = crew.kickoff().await.unwrap();
    let second = crew.kickoff().await.unwrap();

    assert_eq!(log.count("only"), 2);
    assert!(second.get(&only_id).unwrap().produced_at >= first.get(&only_id).unwrap().produced_at);
    assert_eq!(crew.task_status(&only_id).await, Some(TaskStatus::Done));
    assert!(!crew.is_running());
}
