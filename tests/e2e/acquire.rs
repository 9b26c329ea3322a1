use super::*;

#[tokio::test]
async fn acquisition_completes_naturally_and_reports_idle() {
    let sim = SimDetector::spawn().await;
    let mut detector = TcpDetector::connect(&sim.addr()).await.unwrap();

    let result = quick_poller()
        .run_to_idle(
            &mut detector,
            Duration::from_millis(80),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    assert_eq!(result.final_state, DetectorState::Idle);
    assert!(!result.forced_stop);
    assert!(
        result.duration() >= Duration::from_millis(60),
        "an 80 ms exposure cannot settle early: {:?}",
        result.duration()
    );
    assert!(
        result.duration() < Duration::from_secs(2),
        "took too long: {:?}",
        result.duration()
    );
}

#[tokio::test]
async fn forced_stop_cuts_a_long_acquisition_short() {
    let sim = SimDetector::spawn().await;
    let mut detector = TcpDetector::connect(&sim.addr()).await.unwrap();

    let result = quick_poller()
        .run_with_forced_stop(
            &mut detector,
            Duration::from_millis(500),
            Duration::ZERO,
            Duration::from_millis(50),
        )
        .await
        .unwrap();

    assert!(result.forced_stop);
    assert_eq!(result.final_state, DetectorState::Idle);
    assert!(
        result.duration() < Duration::from_millis(300),
        "the stop must land well before natural completion: {:?}",
        result.duration()
    );
}

#[tokio::test]
async fn state_reflects_start_and_abort() {
    let sim = SimDetector::spawn().await;
    let mut detector = TcpDetector::connect(&sim.addr()).await.unwrap();

    assert_eq!(detector.state().await.unwrap(), DetectorState::Idle);

    detector
        .set_exposure_time(Duration::from_millis(500))
        .await
        .unwrap();
    detector.start().await.unwrap();
    assert_eq!(detector.state().await.unwrap(), DetectorState::Busy);

    detector.stop().await.unwrap();
    assert_eq!(detector.state().await.unwrap(), DetectorState::Idle);
}

#[tokio::test]
async fn cycle_loop_runs_clean_cycles_back_to_back() {
    let sim = SimDetector::spawn().await;
    let mut detector = TcpDetector::connect(&sim.addr()).await.unwrap();
    let plan = CyclePlan {
        exposure: Duration::from_millis(40),
        latency: Duration::from_millis(5),
        stop_after: None,
    };
    let cancel = CancellationToken::new();

    let summary = run_cycles(&mut detector, &quick_poller(), plan, 2, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.faults, 0);
    assert!(summary.all_idle());
}
