use std::{
    collections::BTreeSet,
    sync::Arc,
    thread,
    time::Duration,
};

use postcopy_core::{
    CoreConfig, EventRecorder, MigrationError, MigrationEvent, PageId, Phase, SourceResidency,
    TargetResidency,
};
use postcopy_runtime::{MigrationController, ResumeTimings, ScriptedAccess};

fn config(total_pages: u64, free_page_ratio: f64, link_speed_mbps: f64) -> CoreConfig {
    CoreConfig::builder()
        .total_pages(total_pages)
        .free_page_ratio(free_page_ratio)
        .link_speed_mbps(link_speed_mbps)
        .seed(0x5eed)
        .build()
        .expect("valid configuration")
}

fn controller(config: CoreConfig) -> MigrationController {
    MigrationController::new(config).with_timings(ResumeTimings::fast())
}

////////////////////////////////////////////////////////////////////////////////
// Scenarios
////////////////////////////////////////////////////////////////////////////////

#[test]
fn small_guest_transfers_minimum_critical_set() -> Result<(), MigrationError> {
    let mut controller = controller(config(100, 0.0, 1000.0));
    assert_eq!(controller.config().non_pageable_pages(), 5);

    controller.prepare()?;
    controller.downtime()?;

    assert_eq!(
        controller.page_table().transferred_pages(),
        (0..5).map(PageId).collect::<Vec<_>>()
    );
    Ok(())
}

#[test]
fn large_guest_caps_critical_set() {
    let config = config(1_000_000, 0.2, 1000.0);

    assert_eq!(config.non_pageable_pages(), 50);
    assert_eq!(config.page_transfer_time(), Duration::from_millis(1));
}

#[test]
fn untouched_pages_never_leave_the_source() -> Result<(), MigrationError> {
    let touched = [PageId(10), PageId(11), PageId(200), PageId(10), PageId(999)];

    let mut controller = controller(config(1_000, 0.0, 100_000.0))
        .with_access_pattern(ScriptedAccess::new(touched));
    let report = controller.run()?;

    let table = controller.page_table();
    let non_pageable = controller.config().non_pageable_pages();
    assert_eq!(non_pageable, 5);

    let accessed: BTreeSet<_> = touched.into_iter().collect();
    for &page in &accessed {
        assert_eq!(table.target(page)?, TargetResidency::Present);
    }

    let resident: BTreeSet<_> = accessed
        .iter()
        .copied()
        .chain((0..non_pageable).map(PageId))
        .collect();

    for page in (0..table.len()).map(PageId) {
        if !resident.contains(&page) {
            assert_eq!(table.target(page)?, TargetResidency::NotPresent);
        }
    }

    assert!(!report.cancelled);
    assert_eq!(report.total_transferred, resident.len() as u64);
    assert_eq!(report.never_transferred, 1_000 - resident.len() as u64);
    assert_eq!(report.page_faults, accessed.len() as u64);
    assert_eq!(report.memory_accesses, touched.len() as u64);
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Invariants
////////////////////////////////////////////////////////////////////////////////

#[test]
fn random_workload_keeps_tables_consistent() -> Result<(), MigrationError> {
    let recorder = Arc::new(EventRecorder::new());
    let mut controller =
        controller(config(20_000, 0.2, 100_000.0)).with_observer(recorder.clone());

    let report = controller.run()?;
    let table = controller.page_table();

    assert_eq!(table.find_inconsistency(), None);
    assert!(report.total_transferred >= report.non_pageable_pages);
    assert!(report.total_transferred <= report.total_pages);
    assert_eq!(report.memory_accesses, 20);
    assert!(report.page_faults <= report.memory_accesses);
    assert_eq!(
        report.demand_transferred,
        report.total_transferred - report.non_pageable_pages
    );

    for page in table.transferred_pages() {
        assert_eq!(table.source(page)?, SourceResidency::Transferred);
        assert_eq!(table.target(page)?, TargetResidency::Present);
    }

    let demand = recorder.count(|event| matches!(event, MigrationEvent::PageTransferred { .. }));
    assert_eq!(demand as u64, report.demand_transferred);
    Ok(())
}

#[test]
fn duplicate_faults_transfer_once() -> Result<(), MigrationError> {
    let mut controller = controller(config(100, 0.0, 100_000.0))
        .with_access_pattern(ScriptedAccess::new([PageId(50); 8]));

    let report = controller.run()?;

    assert_eq!(report.page_faults, 1);
    assert_eq!(report.demand_transferred, 1);
    assert_eq!(report.total_transferred, 6);
    Ok(())
}

#[test]
fn report_phases_are_ordered() -> Result<(), MigrationError> {
    let mut controller = controller(config(100, 0.0, 1000.0))
        .with_access_pattern(ScriptedAccess::new([PageId(42)]));

    let report = controller.run()?;
    let metrics = controller.metrics();

    assert!(metrics.started <= metrics.downtime_started);
    assert!(metrics.downtime_started <= metrics.downtime_ended);
    assert!(metrics.downtime_ended <= metrics.completed);
    assert!(report.downtime >= Duration::from_millis(5));
    assert!(report.total >= report.downtime + report.resume);
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Cancellation and ordering
////////////////////////////////////////////////////////////////////////////////

#[test]
fn outside_cancellation_stops_resume() -> Result<(), MigrationError> {
    // A slow link and a long workload that cannot finish on its own in time.
    let mut controller = MigrationController::new(config(1_000, 0.0, 1.0)).with_timings(
        ResumeTimings {
            instruction_delay: Duration::from_millis(5),
            ..ResumeTimings::fast()
        },
    );

    let cancel = controller.cancellation();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });

    let report = controller.run()?;
    canceller.join().expect("canceller thread");

    assert_eq!(controller.phase(), Phase::Completed);
    assert!(report.cancelled);
    assert!(report.unresponsive_actors.is_empty());
    assert!(report.memory_accesses < 20);
    assert_eq!(controller.page_table().find_inconsistency(), None);
    Ok(())
}

#[test]
fn completed_controller_refuses_more_phases() -> Result<(), MigrationError> {
    let mut controller = controller(config(100, 0.0, 100_000.0))
        .with_access_pattern(ScriptedAccess::default());

    controller.run()?;

    assert!(matches!(
        controller.prepare(),
        Err(MigrationError::InvalidPhase {
            expected: Phase::Initialized,
            actual: Phase::Completed,
        })
    ));
    assert!(matches!(
        controller.run(),
        Err(MigrationError::InvalidPhase { .. })
    ));
    assert!(controller.report().is_ok());
    Ok(())
}
