//! Names of the strategies a ref may declare, and the argument keys they read.

/// Clones the target with the interception proxy in place of its first
/// container; the developer's local process attaches to that clone.
pub const TELEPRESENCE: &str = "telepresence";

/// Clones the target running a developer-supplied image.
pub const PREPARED_IMAGE: &str = "prepared-image";

/// Routes to the target itself without creating a workload.
pub const EXISTING: &str = "existing";

pub const ARG_IMAGE: &str = "image";
pub const ARG_VERSION: &str = "version";

pub const DEFAULT_TELEPRESENCE_VERSION: &str = "0.109";
pub const TELEPRESENCE_IMAGE: &str = "datawire/telepresence-k8s";
