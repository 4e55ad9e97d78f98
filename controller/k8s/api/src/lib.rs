#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod istio;
pub mod openshift;
pub mod session;
pub mod store;

pub use self::{
    session::{Session, SessionSpec, SessionStatus},
    store::{KubeStore, MemoryStore, Object, ObjectStore, StoreError},
};
pub use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    Client, Resource,
};
