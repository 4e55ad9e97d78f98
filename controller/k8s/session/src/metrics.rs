use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ReconcileMetrics {
    reconciles: Family<ResultLabels, Counter>,
    ref_operations: Family<OperationLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OperationLabels {
    operation: String,
    result: String,
}

impl ReconcileMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconciles",
            "Count of session reconciliations by outcome",
            reconciles.clone(),
        );

        let ref_operations = Family::default();
        prom.register(
            "ref_operations",
            "Count of ref mutations and reverts by outcome",
            ref_operations.clone(),
        );

        Self {
            reconciles,
            ref_operations,
        }
    }

    pub(crate) fn reconciled(&self, result: &str) {
        self.reconciles
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }

    pub(crate) fn ref_operation(&self, operation: &str, ok: bool) {
        self.ref_operations
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }
}
