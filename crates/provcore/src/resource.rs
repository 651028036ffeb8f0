use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

const PROJECT: &str = r"[a-z]([-.:a-z0-9]*[a-z0-9])?";
const RFC1035: &str = r"[a-z]([-a-z0-9]*[a-z0-9])?";
const API_PREFIX: &str = r"(https://www\.googleapis\.com/compute/[a-z0-9]+/)?";

fn global_url(collection: &str) -> Regex {
    let pattern = format!(
        r"^{API_PREFIX}(projects/(?P<project>{PROJECT})/)?global/{collection}/(?P<name>{RFC1035})$"
    );
    Regex::new(&pattern).expect("static resource pattern")
}

fn zonal_url(collection: &str) -> Regex {
    let pattern = format!(
        r"^{API_PREFIX}(projects/(?P<project>{PROJECT})/)?zones/(?P<zone>{RFC1035})/{collection}/(?P<name>{RFC1035})$"
    );
    Regex::new(&pattern).expect("static resource pattern")
}

static INSTANCE_URL: LazyLock<Regex> = LazyLock::new(|| zonal_url("instances"));
static DISK_URL: LazyLock<Regex> = LazyLock::new(|| zonal_url("disks"));
static MACHINE_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| global_url("machineImages"));
static SNAPSHOT_URL: LazyLock<Regex> = LazyLock::new(|| global_url("snapshots"));
static RFC1035_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{RFC1035}$")).expect("static name pattern"));

/// Kinds of named resources tracked by registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Disk,
    Instance,
    MachineImage,
    Snapshot,
    PatchJob,
}

impl ResourceKind {
    pub fn url_pattern(&self) -> Option<&'static Regex> {
        match self {
            ResourceKind::Disk => Some(&DISK_URL),
            ResourceKind::Instance => Some(&INSTANCE_URL),
            ResourceKind::MachineImage => Some(&MACHINE_IMAGE_URL),
            ResourceKind::Snapshot => Some(&SNAPSHOT_URL),
            ResourceKind::PatchJob => None,
        }
    }

    pub fn matches_url(&self, s: &str) -> bool {
        self.url_pattern().is_some_and(|re| re.is_match(s))
    }

    pub fn parse_url(&self, s: &str) -> Option<ResourceUrl> {
        let caps = self.url_pattern()?.captures(s)?;
        Some(ResourceUrl {
            project: caps.name("project").map(|m| m.as_str().to_string()),
            zone: caps.name("zone").map(|m| m.as_str().to_string()),
            name: caps.name("name")?.as_str().to_string(),
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Instance => "instance",
            ResourceKind::MachineImage => "machine image",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::PatchJob => "PatchJob",
        };
        f.write_str(s)
    }
}

/// Components of a (possibly partial) resource URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUrl {
    pub project: Option<String>,
    pub zone: Option<String>,
    pub name: String,
}

/// Qualify a partial URL such as `zones/z/disks/d` with a project
pub fn extend_partial_url(url: &str, project: &str) -> String {
    if url.starts_with("projects/") || url.starts_with("https://") {
        return url.to_string();
    }
    format!("projects/{}/{}", project, url)
}

pub fn is_rfc1035(name: &str) -> bool {
    name.len() <= 63 && RFC1035_NAME.is_match(name)
}
