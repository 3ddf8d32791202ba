//! Checkpoint scenarios against the fake comparison service
//!
//! Run with: cargo test --package eyes-e2e --test checkpoints

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::Rgba;

use eyes_common::{Error, FailureReports, Location, MouseAction, Region, Size, TestResultsStatus};
use eyes_e2e::{client_config, init_tracing, Behavior, FakeServer, RecordedEnd, SyntheticApp};
use eyes_sdk::{Checkpoint, Eyes, EyesConfig};

async fn setup(behavior: Behavior) -> Result<(FakeServer, Arc<SyntheticApp>)> {
    init_tracing();
    let server = FakeServer::spawn(behavior).await?;
    Ok((server, Arc::new(SyntheticApp::new(120, 80))))
}

fn client(config: EyesConfig, app: &Arc<SyntheticApp>) -> Result<Eyes> {
    Ok(Eyes::new(config, app.clone())?)
}

#[tokio::test]
async fn passing_test_reports_passed() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Home page", Some(Size::new(120, 80))).await?;
    assert!(eyes.check(Checkpoint::window("landing")).await?.as_expected);
    app.show_banner(Region::new(10, 10, 30, 10), Rgba([0, 0, 255, 255]));
    assert!(eyes.check(Checkpoint::window("with banner")).await?.as_expected);

    let results = eyes.close(true).await?;
    assert_eq!(results.status, TestResultsStatus::Passed);
    assert_eq!(results.steps, 2);
    assert_eq!(results.matches, 2);
    assert!(results.url.is_some());

    assert_eq!(server.starts(), 1);
    assert_eq!(
        server.ends(),
        vec![RecordedEnd {
            aborted: false,
            update_baseline: false
        }]
    );
    Ok(())
}

#[tokio::test]
async fn second_checkpoint_is_delta_encoded() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Delta", None).await?;
    eyes.check(Checkpoint::window("first")).await?;
    app.show_banner(Region::new(0, 0, 10, 10), Rgba([255, 0, 0, 255]));
    eyes.check(Checkpoint::window("second")).await?;
    eyes.close(false).await?;

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(!uploads[0].is_delta);
    assert!(uploads[1].is_delta);
    Ok(())
}

#[tokio::test]
async fn opening_twice_aborts_the_running_test() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "First", None).await?;
    eyes.check(Checkpoint::window("step")).await?;

    let err = eyes.open("Shop", "Second", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(ref m) if m == "A test is already running"));
    assert_eq!(
        server.ends(),
        vec![RecordedEnd {
            aborted: true,
            update_baseline: false
        }]
    );

    // the manager is usable again
    eyes.open("Shop", "Third", None).await?;
    eyes.close(false).await?;
    Ok(())
}

#[tokio::test]
async fn long_running_match_is_polled_to_completion() -> Result<()> {
    let (server, app) = setup(Behavior {
        poll_rounds: 3,
        ..Default::default()
    })
    .await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Slow", None).await?;
    assert!(eyes.check(Checkpoint::window("slow")).await?.as_expected);
    let results = eyes.close(true).await?;

    assert!(results.is_passed());
    // three 202 answers and the final 201, for both the match and the end
    assert_eq!(server.polls(), 8);
    Ok(())
}

#[tokio::test]
async fn task_gone_twice_is_fatal() -> Result<()> {
    let (server, app) = setup(Behavior {
        gone_polls: 2,
        ..Default::default()
    })
    .await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Gone", None).await?;
    let err = eyes
        .check(Checkpoint::window("gone").with_retry_timeout(Duration::ZERO))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TaskGone { .. }));
    assert!(err.to_string().contains("task has gone"));
    assert_eq!(server.long_requests(), 2);

    eyes.abort_if_not_closed().await?;
    Ok(())
}

#[tokio::test]
async fn task_gone_once_is_retried() -> Result<()> {
    let (server, app) = setup(Behavior {
        gone_polls: 1,
        ..Default::default()
    })
    .await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Gone once", None).await?;
    let result = eyes
        .check(Checkpoint::window("retried").with_retry_timeout(Duration::ZERO))
        .await?;
    assert!(result.as_expected);
    assert_eq!(server.uploads().len(), 2);

    eyes.close(true).await?;
    Ok(())
}

#[tokio::test]
async fn mismatch_reported_on_close() -> Result<()> {
    let (server, app) = setup(Behavior {
        default_match: false,
        ..Default::default()
    })
    .await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Broken", None).await?;
    assert!(!eyes.check(Checkpoint::window("broken")).await?.as_expected);

    let uploads = server.uploads();
    let (last, retries) = uploads.split_last().expect("at least one upload");
    assert!(!last.ignore_mismatch);
    assert!(!retries.is_empty());
    assert!(retries.iter().all(|u| u.ignore_mismatch));

    // the next checkpoint runs once instead of looping
    let before = server.uploads().len();
    eyes.check(Checkpoint::window("still broken")).await?;
    assert_eq!(server.uploads().len(), before + 1);

    let err = eyes.close(true).await.unwrap_err();
    assert!(matches!(err, Error::DiffsFound { .. }));
    let results = err.test_results().expect("results attached");
    assert_eq!(results.mismatches, 2);
    assert_eq!(results.status, TestResultsStatus::Unresolved);
    Ok(())
}

#[tokio::test]
async fn mismatch_reported_immediately() -> Result<()> {
    let (server, app) = setup(Behavior {
        default_match: false,
        ..Default::default()
    })
    .await?;
    let config = EyesConfig {
        failure_reports: FailureReports::Immediate,
        ..client_config(&server)
    };
    let mut eyes = client(config, &app)?;

    eyes.open("Shop", "Checkout", None).await?;
    let err = eyes
        .check(Checkpoint::window("cart").with_retry_timeout(Duration::ZERO))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Mismatch found in 'Checkout' of 'Shop'");

    eyes.abort_if_not_closed().await?;
    Ok(())
}

#[tokio::test]
async fn retry_recovers_from_transient_mismatch() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    server.script(&[false, false, true]);
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Flaky", None).await?;
    assert!(eyes.check(Checkpoint::window("animated")).await?.as_expected);

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 3);
    assert!(uploads.iter().all(|u| u.ignore_mismatch));

    let results = eyes.close(true).await?;
    assert_eq!(results.steps, 1);
    Ok(())
}

#[tokio::test]
async fn new_baseline_is_saved() -> Result<()> {
    let (server, app) = setup(Behavior {
        new_baseline: true,
        ..Default::default()
    })
    .await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Brand new", None).await?;
    eyes.check(Checkpoint::window("first ever")).await?;
    let results = eyes.close(true).await?;

    assert!(results.is_new);
    assert_eq!(
        server.ends(),
        vec![RecordedEnd {
            aborted: false,
            update_baseline: true
        }]
    );
    Ok(())
}

#[tokio::test]
async fn triggers_travel_with_the_next_checkpoint() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Login", None).await?;
    eyes.check(Checkpoint::window("form")).await?;
    eyes.add_text_trigger(Region::new(10, 10, 50, 12), "user@example.com");
    eyes.add_mouse_trigger(MouseAction::Click, Region::new(10, 40, 30, 12), Location::new(5, 5));
    eyes.check(Checkpoint::window("filled")).await?;
    eyes.close(true).await?;

    let uploads = server.uploads();
    assert_eq!(uploads[0].user_inputs, 0);
    assert_eq!(uploads[1].user_inputs, 2);
    Ok(())
}

#[tokio::test]
async fn region_checkpoint_and_replace() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let mut eyes = client(client_config(&server), &app)?;

    eyes.open("Shop", "Regions", None).await?;
    eyes.check(Checkpoint::region("header", Region::new(0, 0, 120, 20)))
        .await?;
    eyes.replace_window(1, Checkpoint::window("whole page")).await?;
    eyes.close(true).await?;

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[1].replace_step, Some(1));
    Ok(())
}

#[tokio::test]
async fn wrong_api_key_is_a_protocol_error() -> Result<()> {
    let (server, app) = setup(Behavior::default()).await?;
    let config = EyesConfig {
        api_key: Some("wrong".into()),
        ..client_config(&server)
    };
    let mut eyes = client(config, &app)?;

    eyes.open("Shop", "Denied", None).await?;
    let err = eyes.check(Checkpoint::window("x")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { status: 401, .. }));

    // no session was started, so there is nothing to end
    assert!(eyes.close(false).await?.is_passed());
    Ok(())
}
