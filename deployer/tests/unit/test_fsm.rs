//! FSM unit tests

use std::time::Duration;

use chrono::Utc;

use agent_deployer::deploy::fsm::{
    check_finish, check_start, DeploymentEvent, DeploymentFsm, StartMode,
};
use agent_deployer::deploy::orchestrator::ConcurrencyPolicy;
use agent_deployer::errors::DeployerError;
use agent_deployer::models::{DeploymentRecord, DeploymentStatus};

const STALE_AFTER: Duration = Duration::from_secs(1800);

fn record(status: DeploymentStatus, started_secs_ago: Option<i64>) -> DeploymentRecord {
    let mut record = DeploymentRecord::new("abc123", "user-1");
    record.status = status;
    record.deployment_started =
        started_secs_ago.map(|secs| Utc::now() - chrono::Duration::seconds(secs));
    record
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new(DeploymentStatus::Created);
    assert_eq!(fsm.status(), DeploymentStatus::Created);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Created);

    // Created -> Deploying
    fsm.process(DeploymentEvent::Deploy(StartMode::Fresh)).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Deploying);

    // Deploying -> Deployed
    fsm.process(DeploymentEvent::DeploySuccess).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Deployed);

    // Deployed -> Deploying again
    fsm.process(DeploymentEvent::Deploy(StartMode::Fresh)).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Deploying);
}

#[test]
fn test_fsm_deploy_failure_flow() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Deployed);

    fsm.process(DeploymentEvent::Deploy(StartMode::Fresh)).unwrap();
    fsm.process(DeploymentEvent::DeployFailed("test error".to_string()))
        .unwrap();

    assert_eq!(fsm.status(), DeploymentStatus::DeploymentFailed);
    assert_eq!(fsm.error(), Some("test error"));

    // A retry clears the previous error
    fsm.process(DeploymentEvent::Deploy(StartMode::Fresh)).unwrap();
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Created);
    assert!(fsm.process(DeploymentEvent::DeploySuccess).is_err());
    assert!(fsm
        .process(DeploymentEvent::DeployFailed("x".to_string()))
        .is_err());

    let mut fsm = DeploymentFsm::new(DeploymentStatus::Deploying);
    assert!(fsm.process(DeploymentEvent::Deploy(StartMode::Fresh)).is_err());
    assert_eq!(fsm.status(), DeploymentStatus::Deploying);
}

#[test]
fn test_idle_records_start_fresh() {
    for status in [
        DeploymentStatus::Created,
        DeploymentStatus::Deployed,
        DeploymentStatus::DeploymentFailed,
    ] {
        let mode = check_start(
            &record(status, None),
            ConcurrencyPolicy::Reject,
            STALE_AFTER,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(mode, StartMode::Fresh);
    }
}

#[test]
fn test_in_flight_record_is_rejected() {
    let result = check_start(
        &record(DeploymentStatus::Deploying, Some(60)),
        ConcurrencyPolicy::Reject,
        STALE_AFTER,
        Utc::now(),
    );
    assert!(matches!(result, Err(DeployerError::AlreadyDeploying(_))));
}

#[test]
fn test_in_flight_record_is_superseded() {
    let mode = check_start(
        &record(DeploymentStatus::Deploying, Some(60)),
        ConcurrencyPolicy::Supersede,
        STALE_AFTER,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(mode, StartMode::Superseded);
}

#[test]
fn test_stale_records_are_taken_over() {
    for started in [Some(3600), None] {
        let mode = check_start(
            &record(DeploymentStatus::Deploying, started),
            ConcurrencyPolicy::Reject,
            STALE_AFTER,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(mode, StartMode::Stale);
    }
}

#[test]
fn test_finish_outcomes() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::Deploying);
    assert_eq!(
        check_finish(&mut fsm, Ok(())).unwrap(),
        DeploymentStatus::Deployed
    );

    let mut fsm = DeploymentFsm::new(DeploymentStatus::Deploying);
    let err = DeployerError::Timeout("build b-1 did not finish within 60s".to_string());
    assert_eq!(
        check_finish(&mut fsm, Err(&err)).unwrap(),
        DeploymentStatus::DeploymentFailed
    );
    assert_eq!(
        fsm.error(),
        Some("Timed out: build b-1 did not finish within 60s")
    );
}
