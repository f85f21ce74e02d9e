//! Mount points, the mount registry, the storage wrapper pipeline and the
//! providers that produce mounts.

mod cache;
mod manager;
mod mount_point;
mod pipeline;
mod provider;

pub use cache::{CachedMountInfo, MemoryUserMountCache, UserMountCache};
pub use manager::MountManager;
pub use mount_point::{MountKind, MountLifecycle, MountOptions, MountPoint};
pub use pipeline::{
    StorageWrapper, StorageWrapperPipeline, WRAPPER_AVAILABILITY, WRAPPER_ENCODING, WRAPPER_QUOTA, WRAPPER_READONLY,
    WRAPPER_SHARING_PERMISSIONS, builtin_wrappers,
};
pub(crate) use provider::tag;
pub use provider::{
    HOME_PROVIDER_ID, HomeMountProvider, LocalHomeProvider, MemoryHomeProvider, MountProvider, MountProviderArgs,
    MountProviderCollection, PartialMountProvider, RootMountProvider,
};
