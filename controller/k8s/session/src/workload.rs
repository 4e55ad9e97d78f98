use ike_controller_k8s_api::{openshift::DeploymentConfig, Deployment, Object, PodTemplateSpec};
use std::collections::BTreeMap;

/// A workload kind whose pods can be located by a ref and cloned into a
/// session variant.
pub trait Workload: Object {
    /// The kind recorded in ref targets and ledger entries.
    const KIND_NAME: &'static str;

    /// Labels carried by the workload's pods.
    fn template_labels(&self) -> BTreeMap<String, String>;

    fn template_mut(&mut self) -> &mut PodTemplateSpec;

    fn set_replicas(&mut self, replicas: i32);

    fn set_selector_label(&mut self, key: &str, value: &str);

    fn clear_status(&mut self);
}

impl Workload for Deployment {
    const KIND_NAME: &'static str = "Deployment";

    fn template_labels(&self) -> BTreeMap<String, String> {
        self.spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.clone())
            .unwrap_or_default()
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    }

    fn set_selector_label(&mut self, key: &str, value: &str) {
        self.spec
            .get_or_insert_with(Default::default)
            .selector
            .match_labels
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }

    fn clear_status(&mut self) {
        self.status = None;
    }
}

impl Workload for DeploymentConfig {
    const KIND_NAME: &'static str = "DeploymentConfig";

    fn template_labels(&self) -> BTreeMap<String, String> {
        self.spec
            .template
            .as_ref()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|meta| meta.labels.clone())
            .unwrap_or_default()
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        self.spec.template.get_or_insert_with(Default::default)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.replicas = Some(replicas);
    }

    fn set_selector_label(&mut self, key: &str, value: &str) {
        self.spec
            .selector
            .insert(key.to_string(), value.to_string());
    }

    // Status is not modeled for deployment configs.
    fn clear_status(&mut self) {}
}
