//! Shared fakes for integration tests
//!
//! `World` wires an in-memory cloud, a recording command runner, a virtual
//! host filesystem and a manual clock together. Cloud calls and commands are
//! written to one shared journal so tests can assert on global ordering.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use ebsnap::cloud::BlockDeviceMapping;
use ebsnap::{
    AttachRequest, Backends, Clock, CloudVolumeService, CommandError, CommandOutput, CommandRunner,
    HostFs, Identity, InstanceMetadata, Orchestrator, Profile, ProfileContext, SnapError,
    SnapshotHandle, SnapshotRef, Tags, VolumeDescriptor, VolumeHandle, VolumeInfo, VolumeRequest,
    VolumeState,
};
use ebsnap::{Result, Settings};

pub type Journal = Rc<RefCell<Vec<String>>>;

pub const INSTANCE_ID: &str = "i-0123456789";
pub const ZONE: &str = "us-east-1a";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid date") // test: fixed epoch
}

/// `/dev/sdX` → `/dev/xvdX`, as the kernel exposes attached devices
/// Server-side tag filtering: every filter tag present with the same value
fn has_tags(tags: &Tags, filter: &Tags) -> bool {
    filter.iter().all(|(k, v)| tags.get(k) == Some(v))
}

fn kernel_device(device: &Path) -> PathBuf {
    PathBuf::from(device.display().to_string().replacen("/dev/sd", "/dev/xvd", 1))
}

// ============================================================================
// Cloud
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeVolume {
    pub state: VolumeState,
    pub tags: Tags,
    pub snapshot_id: Option<String>,
    pub size: u32,
}

/// In-memory block storage
pub struct FakeCloud {
    journal: Journal,
    devices: Rc<RefCell<BTreeSet<PathBuf>>>,
    pub bdm: RefCell<BlockDeviceMapping>,
    pub snapshots: RefCell<Vec<SnapshotRef>>,
    pub volumes: RefCell<BTreeMap<String, FakeVolume>>,
    pub resource_tags: RefCell<BTreeMap<String, Tags>>,
    pub deleted: RefCell<Vec<String>>,
    /// Attached volumes stay `available` and the device never appears
    pub never_attach: Cell<bool>,
    /// Detached volumes stay `in-use`
    pub never_detach: Cell<bool>,
    pub fail_tagging: Cell<bool>,
    pub bdm_calls: Cell<u32>,
    pub list_snapshot_calls: Cell<u32>,
    next_id: Cell<u32>,
}

impl FakeCloud {
    fn new(journal: Journal, devices: Rc<RefCell<BTreeSet<PathBuf>>>) -> Self {
        Self {
            journal,
            devices,
            bdm: RefCell::new(BlockDeviceMapping::new()),
            snapshots: RefCell::new(Vec::new()),
            volumes: RefCell::new(BTreeMap::new()),
            resource_tags: RefCell::new(BTreeMap::new()),
            deleted: RefCell::new(Vec::new()),
            never_attach: Cell::new(false),
            never_detach: Cell::new(false),
            fail_tagging: Cell::new(false),
            bdm_calls: Cell::new(0),
            list_snapshot_calls: Cell::new(0),
            next_id: Cell::new(1),
        }
    }

    fn log(&self, entry: String) {
        self.journal.borrow_mut().push(entry);
    }

    fn next(&self, prefix: &str) -> String {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        format!("{}-new{}", prefix, id)
    }

    /// Seed a snapshot tagged with the given mount point and identity
    pub fn add_snapshot(&self, id: &str, mount_point: &str, identity: &Identity, age: ChronoDuration) {
        let mut tags = identity.to_tags();
        tags.insert("mount_point", mount_point);
        self.snapshots.borrow_mut().push(SnapshotRef {
            id: id.to_string(),
            volume_id: Some(format!("vol-src-{}", id)),
            created: t0() - age,
            tags,
        });
    }

    pub fn attach_in_bdm(&self, device: &str, volume_id: &str) {
        self.bdm
            .borrow_mut()
            .insert(device.to_string(), volume_id.to_string());
        self.volumes.borrow_mut().insert(
            volume_id.to_string(),
            FakeVolume {
                state: VolumeState::InUse,
                tags: Tags::new(),
                snapshot_id: None,
                size: 1,
            },
        );
    }

    pub fn tags_of(&self, resource_id: &str) -> Option<Tags> {
        self.resource_tags.borrow().get(resource_id).cloned()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.journal
            .borrow()
            .iter()
            .filter(|e| e.starts_with(operation))
            .count()
    }
}

impl CloudVolumeService for FakeCloud {
    fn instance_metadata(&self) -> Result<InstanceMetadata> {
        Ok(InstanceMetadata {
            instance_id: INSTANCE_ID.to_string(),
            availability_zone: ZONE.to_string(),
            userdata: None,
        })
    }

    fn block_device_mapping(&self, instance_id: &str) -> Result<BlockDeviceMapping> {
        self.bdm_calls.set(self.bdm_calls.get() + 1);
        self.log(format!("cloud block_device_mapping {}", instance_id));
        Ok(self.bdm.borrow().clone())
    }

    fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeHandle> {
        let id = self.next("vol");
        self.log(format!(
            "cloud create_volume {} {} {}",
            request.size,
            request.availability_zone,
            request.snapshot_id.as_deref().unwrap_or("-")
        ));
        self.volumes.borrow_mut().insert(
            id.clone(),
            FakeVolume {
                state: VolumeState::Creating,
                tags: Tags::new(),
                snapshot_id: request.snapshot_id.clone(),
                size: request.size,
            },
        );
        Ok(VolumeHandle {
            id,
            state: VolumeState::Creating,
        })
    }

    fn attach_volume(&self, request: &AttachRequest) -> Result<()> {
        self.log(format!(
            "cloud attach_volume {} {}",
            request.volume_id,
            request.device.display()
        ));
        if self.never_attach.get() {
            return Ok(());
        }
        if let Some(volume) = self.volumes.borrow_mut().get_mut(&request.volume_id) {
            volume.state = VolumeState::InUse;
        }
        self.devices.borrow_mut().insert(kernel_device(&request.device));
        self.bdm
            .borrow_mut()
            .insert(request.device.display().to_string(), request.volume_id.clone());
        Ok(())
    }

    fn set_delete_on_termination(&self, instance_id: &str, device: &Path) -> Result<()> {
        self.log(format!(
            "cloud set_delete_on_termination {} {}",
            instance_id,
            device.display()
        ));
        Ok(())
    }

    fn detach_volume(&self, volume_id: &str) -> Result<bool> {
        self.log(format!("cloud detach_volume {}", volume_id));
        if !self.never_detach.get() {
            if let Some(volume) = self.volumes.borrow_mut().get_mut(volume_id) {
                volume.state = VolumeState::Available;
            }
        }
        Ok(true)
    }

    fn volume_state(&self, volume_id: &str) -> Result<VolumeState> {
        let mut volumes = self.volumes.borrow_mut();
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| SnapError::cloud(format!("no volume {}", volume_id)))?;
        // Creation completes on the first poll
        if volume.state == VolumeState::Creating {
            volume.state = VolumeState::Available;
        }
        Ok(volume.state.clone())
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.log(format!("cloud delete_volume {}", volume_id));
        let mut volumes = self.volumes.borrow_mut();
        match volumes.get(volume_id).map(|v| v.state.clone()) {
            Some(VolumeState::InUse) => Err(SnapError::cloud(format!("VolumeInUse: {}", volume_id))),
            Some(_) => {
                volumes.remove(volume_id);
                self.deleted.borrow_mut().push(volume_id.to_string());
                Ok(())
            }
            None => Err(SnapError::cloud(format!("no volume {}", volume_id))),
        }
    }

    fn list_volumes(&self, filter: &Tags) -> Result<Vec<VolumeInfo>> {
        self.log("cloud list_volumes".to_string());
        Ok(self
            .volumes
            .borrow()
            .iter()
            .filter(|(_, v)| has_tags(&v.tags, filter))
            .map(|(id, v)| VolumeInfo {
                id: id.clone(),
                state: v.state.clone(),
                tags: v.tags.clone(),
            })
            .collect())
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotHandle> {
        let id = self.next("snap");
        self.log(format!("cloud create_snapshot {} {}", volume_id, description));
        self.snapshots.borrow_mut().push(SnapshotRef {
            id: id.clone(),
            volume_id: Some(volume_id.to_string()),
            created: t0(),
            tags: Tags::new(),
        });
        Ok(SnapshotHandle {
            id,
            volume_id: volume_id.to_string(),
        })
    }

    fn list_snapshots(&self, filter: &Tags) -> Result<Vec<SnapshotRef>> {
        self.list_snapshot_calls.set(self.list_snapshot_calls.get() + 1);
        self.log("cloud list_snapshots".to_string());
        Ok(self
            .snapshots
            .borrow()
            .iter()
            .filter(|s| has_tags(&s.tags, filter))
            .cloned()
            .collect())
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.log(format!("cloud delete_snapshot {}", snapshot_id));
        self.snapshots.borrow_mut().retain(|s| s.id != snapshot_id);
        self.deleted.borrow_mut().push(snapshot_id.to_string());
        Ok(())
    }

    fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        self.log(format!("cloud tag_resource {}", resource_id));
        if self.fail_tagging.get() {
            return Err(SnapError::cloud("RequestLimitExceeded"));
        }
        self.resource_tags
            .borrow_mut()
            .insert(resource_id.to_string(), tags.clone());
        if let Some(volume) = self.volumes.borrow_mut().get_mut(resource_id) {
            volume.tags = tags.clone();
        }
        for snapshot in self.snapshots.borrow_mut().iter_mut() {
            if snapshot.id == resource_id {
                snapshot.tags = tags.clone();
            }
        }
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Records every command; programs in `failing` exit 1
pub struct RecordingRunner {
    journal: Journal,
    pub calls: RefCell<Vec<Vec<String>>>,
    pub failing: RefCell<BTreeSet<String>>,
}

impl RecordingRunner {
    pub fn fail(&self, program: &str) {
        self.failing.borrow_mut().insert(program.to_string());
    }

    /// Recorded calls of `program`, arguments only
    pub fn calls_of(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c[0] == program)
            .map(|c| c[1..].to_vec())
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> std::result::Result<CommandOutput, CommandError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.journal.borrow_mut().push(format!("run {}", call.join(" ")));
        self.calls.borrow_mut().push(call);

        if self.failing.borrow().contains(program) {
            return Err(CommandError::Failed {
                program: program.to_string(),
                args: args.to_vec(),
                code: Some(1),
                output: format!("{}: simulated failure", program),
            });
        }
        Ok(CommandOutput::default())
    }
}

// ============================================================================
// Host
// ============================================================================

/// Virtual filesystem: a set of existing paths plus paths on the root device
pub struct FakeHost {
    paths: Rc<RefCell<BTreeSet<PathBuf>>>,
    pub root_paths: RefCell<BTreeSet<PathBuf>>,
    pub created_dirs: RefCell<Vec<PathBuf>>,
}

impl FakeHost {
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.paths.borrow_mut().insert(path.into());
    }

    pub fn mark_root(&self, path: impl Into<PathBuf>) {
        self.root_paths.borrow_mut().insert(path.into());
    }
}

impl HostFs for FakeHost {
    fn exists(&self, path: &Path) -> bool {
        self.paths.borrow().contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        self.created_dirs.borrow_mut().push(path.to_path_buf());
        self.paths.borrow_mut().insert(path.to_path_buf());
        Ok(())
    }

    fn shares_root_device(&self, path: &Path) -> std::io::Result<bool> {
        Ok(path == Path::new("/") || self.root_paths.borrow().contains(path))
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Fixed time; counts sleeps instead of sleeping
pub struct FakeClock {
    pub now: Cell<DateTime<Utc>>,
    pub sleeps: Cell<u32>,
    pub slept: RefCell<Vec<Duration>>,
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.slept.borrow_mut().push(duration);
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Fixed volumes; every hook call is journaled as `hook <name> [mount point]`
pub struct RecordingProfile {
    journal: Journal,
    pub volumes: Vec<VolumeDescriptor>,
    pub failing_hook: Option<&'static str>,
}

impl RecordingProfile {
    fn record(&self, hook: &'static str, volume: Option<&VolumeDescriptor>) -> Result<()> {
        let entry = match volume {
            Some(v) => format!("hook {} {}", hook, v.mount_point.display()),
            None => format!("hook {}", hook),
        };
        self.journal.borrow_mut().push(entry);
        if self.failing_hook == Some(hook) {
            return Err(SnapError::hook(hook, "simulated hook failure"));
        }
        Ok(())
    }
}

impl Profile for RecordingProfile {
    fn name(&self) -> &str {
        "recording"
    }

    fn volumes(&self, _ctx: &ProfileContext<'_>) -> Result<Vec<VolumeDescriptor>> {
        Ok(self.volumes.clone())
    }

    fn pre_snapshots(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.record("pre_snapshots", None)
    }

    fn post_snapshots(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.record("post_snapshots", None)
    }

    fn pre_snapshot(&self, _runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.record("pre_snapshot", Some(volume))
    }

    fn post_snapshot(&self, _runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.record("post_snapshot", Some(volume))
    }

    fn pre_mounts(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.record("pre_mounts", None)
    }

    fn post_mounts(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.record("post_mounts", None)
    }

    fn pre_mount(&self, _runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.record("pre_mount", Some(volume))
    }

    fn post_mount(&self, _runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.record("post_mount", Some(volume))
    }
}

// ============================================================================
// World
// ============================================================================

pub struct World {
    pub journal: Journal,
    pub cloud: FakeCloud,
    pub runner: RecordingRunner,
    pub host: FakeHost,
    pub clock: FakeClock,
    pub settings: Settings,
    pub identity: Identity,
    pub instance: InstanceMetadata,
}

impl World {
    pub fn new() -> Self {
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let paths = Rc::new(RefCell::new(BTreeSet::new()));

        let mut settings = Settings::default();
        settings.log_dir = None;

        Self {
            cloud: FakeCloud::new(journal.clone(), paths.clone()),
            runner: RecordingRunner {
                journal: journal.clone(),
                calls: RefCell::new(Vec::new()),
                failing: RefCell::new(BTreeSet::new()),
            },
            host: FakeHost {
                paths,
                root_paths: RefCell::new(BTreeSet::new()),
                created_dirs: RefCell::new(Vec::new()),
            },
            clock: FakeClock {
                now: Cell::new(t0()),
                sleeps: Cell::new(0),
                slept: RefCell::new(Vec::new()),
            },
            settings,
            identity: Identity::new("db", "main", "prod"),
            instance: InstanceMetadata {
                instance_id: INSTANCE_ID.to_string(),
                availability_zone: ZONE.to_string(),
                userdata: None,
            },
            journal,
        }
    }

    pub fn profile(&self, volumes: Vec<VolumeDescriptor>) -> RecordingProfile {
        RecordingProfile {
            journal: self.journal.clone(),
            volumes,
            failing_hook: None,
        }
    }

    pub fn backends(&self) -> Backends<'_> {
        Backends {
            cloud: &self.cloud,
            runner: &self.runner,
            host: &self.host,
            clock: &self.clock,
        }
    }

    pub fn orchestrator<'a>(&'a self, profile: &'a dyn Profile) -> Orchestrator<'a> {
        Orchestrator::new(self.backends(), &self.settings, &self.identity, &self.instance, profile)
    }

    /// Index of the first journal entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.journal.borrow().iter().position(|e| e.starts_with(prefix))
    }

    pub fn entries(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

pub fn volume(device: &str, mount_point: &str) -> VolumeDescriptor {
    VolumeDescriptor::new(device, mount_point, 5).expect("valid volume") // test: fixture
}
