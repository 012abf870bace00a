//! Best-effort unmount and detach

mod common;

use common::{World, volume};

#[test]
fn test_unmounts_then_detaches_each_volume() {
    let world = World::new();
    world.cloud.attach_in_bdm("/dev/sdf", "vol-a");
    world.cloud.attach_in_bdm("/dev/sdg", "vol-b");
    let profile = world.profile(vec![volume("/dev/sdf", "/mnt/a"), volume("/dev/sdg", "/mnt/b")]);

    let reports = world.orchestrator(&profile).unmount_snapshots(&profile.volumes);

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.unmounted));
    assert_eq!(reports[0].detached.as_deref(), Some("vol-a"));
    assert_eq!(reports[1].detached.as_deref(), Some("vol-b"));
    assert_eq!(
        world.runner.calls_of("umount"),
        vec![vec!["/dev/xvdf".to_string()], vec!["/dev/xvdg".to_string()]]
    );

    let umount = world.position("run umount /dev/xvdf").expect("unmounted");
    let detach = world.position("cloud detach_volume vol-a").expect("detached");
    assert!(umount < detach);
}

#[test]
fn test_failed_umount_still_detaches() {
    let world = World::new();
    world.cloud.attach_in_bdm("/dev/sdf", "vol-a");
    world.runner.fail("umount");
    let profile = world.profile(vec![volume("/dev/sdf", "/mnt/a")]);

    let reports = world.orchestrator(&profile).unmount_snapshots(&profile.volumes);

    assert!(!reports[0].unmounted);
    assert_eq!(reports[0].detached.as_deref(), Some("vol-a"));
}

#[test]
fn test_detach_timeout_is_reported_not_raised() {
    let world = World::new();
    world.cloud.attach_in_bdm("/dev/sdf", "vol-a");
    world.cloud.attach_in_bdm("/dev/sdg", "vol-b");
    world.cloud.never_detach.set(true);
    let profile = world.profile(vec![volume("/dev/sdf", "/mnt/a"), volume("/dev/sdg", "/mnt/b")]);

    let reports = world.orchestrator(&profile).unmount_snapshots(&profile.volumes);

    assert!(reports.iter().all(|r| r.detached.is_none()));
    assert_eq!(
        world.clock.sleeps.get(),
        2 * world.settings.detach.max_attempts,
        "every volume polled to the ceiling"
    );
    assert_eq!(world.cloud.count("cloud detach_volume"), 2);
}

#[test]
fn test_unknown_device_is_skipped_for_detach() {
    let world = World::new();
    world.cloud.attach_in_bdm("/dev/sdg", "vol-b");
    let profile = world.profile(vec![volume("/dev/sdf", "/mnt/a"), volume("/dev/sdg", "/mnt/b")]);

    let reports = world.orchestrator(&profile).unmount_snapshots(&profile.volumes);

    assert!(reports[0].unmounted);
    assert!(reports[0].detached.is_none());
    assert_eq!(reports[1].detached.as_deref(), Some("vol-b"));
    assert_eq!(world.cloud.count("cloud detach_volume"), 1);
}

#[test]
fn test_unmount_runs_no_hooks() {
    let world = World::new();
    world.cloud.attach_in_bdm("/dev/sdf", "vol-a");
    let profile = world.profile(vec![volume("/dev/sdf", "/mnt/a")]);

    world.orchestrator(&profile).unmount_snapshots(&profile.volumes);

    assert!(world.position("hook").is_none());
}
